use crate::auth_results::message_origin;
use crate::canonicalization::{BodyCanonicalizer, Type};
use crate::hash::{canonical_headers, digest_bytes, HashAlgo, LimitHasher};
use crate::header::{domain_suffix_match, SignatureHeaderBuilder, SignatureKind};
use crate::message::{MessageEvent, MessageParser, RawHeader};
use crate::{DKIMError, DkimPrivateKey};
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::Signer as EdDsaSigner;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::Sha256;

/// Builder for the Signer
#[derive(Debug)]
pub struct SignerBuilder {
    signed_headers: Option<Vec<String>>,
    private_key: Option<DkimPrivateKey>,
    selector: Option<String>,
    signing_domain: Option<String>,
    kind: SignatureKind,
    hash_algo: Option<HashAlgo>,
    identity: Option<String>,
    body_limit: Option<usize>,
    header_canonicalization: Type,
    body_canonicalization: Type,
    time: Option<chrono::DateTime<chrono::offset::Utc>>,
    expiry: Option<chrono::Duration>,
}

impl SignerBuilder {
    pub fn new() -> Self {
        Self {
            signed_headers: None,
            private_key: None,
            selector: None,
            signing_domain: None,
            kind: SignatureKind::Dkim,
            hash_algo: None,
            identity: None,
            body_limit: None,
            header_canonicalization: Type::Simple,
            body_canonicalization: Type::Simple,
            time: None,
            expiry: None,
        }
    }

    /// Headers to cover with the signature; From is required.
    pub fn with_signed_headers(
        mut self,
        headers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, DKIMError> {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();

        if !headers.iter().any(|h| h == "from") {
            return Err(DKIMError::BuilderError("missing From in signed headers"));
        }

        self.signed_headers = Some(headers);
        Ok(self)
    }

    pub fn with_private_key(mut self, key: DkimPrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn with_selector(mut self, value: impl Into<String>) -> Self {
        self.selector = Some(value.into());
        self
    }

    pub fn with_signing_domain(mut self, value: impl Into<String>) -> Self {
        self.signing_domain = Some(value.into());
        self
    }

    /// Emit a legacy `DomainKey-Signature` instead of a
    /// `DKIM-Signature`.
    pub fn with_signature_kind(mut self, kind: SignatureKind) -> Self {
        self.kind = kind;
        self
    }

    /// Override the signing algorithm; defaults to the strongest the
    /// key supports (the legacy form only knows rsa-sha1).
    pub fn with_hash_algo(mut self, value: HashAlgo) -> Self {
        self.hash_algo = Some(value);
        self
    }

    /// Identity (`i=`) to record in the signature; its domain must be
    /// the signing domain or a subdomain, which the verifier enforces.
    pub fn with_identity(mut self, value: impl Into<String>) -> Self {
        self.identity = Some(value.into());
        self
    }

    /// Cover only the first `limit` canonical body octets (`l=`).
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    pub fn with_header_canonicalization(mut self, value: Type) -> Self {
        self.header_canonicalization = value;
        self
    }

    pub fn with_body_canonicalization(mut self, value: Type) -> Self {
        self.body_canonicalization = value;
        self
    }

    /// Fix the signing time; mostly used for testing.
    pub fn with_time(mut self, value: chrono::DateTime<chrono::offset::Utc>) -> Self {
        self.time = Some(value);
        self
    }

    pub fn with_expiry(mut self, value: chrono::Duration) -> Self {
        self.expiry = Some(value);
        self
    }

    /// Must be provided: signed_headers, private_key, selector and
    /// signing_domain.
    pub fn build(self) -> Result<Signer, DKIMError> {
        use DKIMError::BuilderError;

        let private_key = self
            .private_key
            .ok_or(BuilderError("missing required private key"))?;

        let hash_algo = match (self.kind, &private_key, self.hash_algo) {
            (SignatureKind::DomainKey, DkimPrivateKey::Rsa(_), None | Some(HashAlgo::RsaSha1)) => {
                HashAlgo::RsaSha1
            }
            (SignatureKind::DomainKey, _, _) => {
                return Err(BuilderError(
                    "legacy signatures are always rsa-sha1 over an RSA key",
                ))
            }
            (SignatureKind::Dkim, DkimPrivateKey::Rsa(_), None) => HashAlgo::RsaSha256,
            (
                SignatureKind::Dkim,
                DkimPrivateKey::Rsa(_),
                Some(algo @ (HashAlgo::RsaSha1 | HashAlgo::RsaSha256)),
            ) => algo,
            (SignatureKind::Dkim, DkimPrivateKey::Ed25519(_), None | Some(HashAlgo::Ed25519Sha256)) => {
                HashAlgo::Ed25519Sha256
            }
            _ => return Err(BuilderError("hash algorithm does not fit the private key")),
        };

        for canon in [self.header_canonicalization, self.body_canonicalization] {
            let allowed = match self.kind {
                SignatureKind::DomainKey => canon != Type::Relaxed,
                SignatureKind::Dkim => canon != Type::Nowsp,
            };
            if !allowed {
                return Err(BuilderError(
                    "canonicalization is not defined for this signature form",
                ));
            }
        }

        Ok(Signer {
            signed_headers: self
                .signed_headers
                .ok_or(BuilderError("missing required signed headers"))?,
            private_key,
            selector: self
                .selector
                .ok_or(BuilderError("missing required selector"))?,
            signing_domain: self
                .signing_domain
                .ok_or(BuilderError("missing required signing domain"))?,
            kind: self.kind,
            identity: self.identity,
            body_limit: self.body_limit,
            header_canonicalization: self.header_canonicalization,
            body_canonicalization: self.body_canonicalization,
            expiry: self.expiry,
            hash_algo,
            time: self.time,
        })
    }
}

impl Default for SignerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a message was signed or skipped by the domain guard.
#[derive(Debug, Clone, PartialEq)]
pub enum SigningOutcome {
    /// The finished header line, terminator excluded; prepend it to
    /// the outgoing message.
    Signed(String),
    Skipped(&'static str),
}

#[derive(Debug)]
pub struct Signer {
    signed_headers: Vec<String>,
    private_key: DkimPrivateKey,
    selector: String,
    signing_domain: String,
    kind: SignatureKind,
    identity: Option<String>,
    body_limit: Option<usize>,
    header_canonicalization: Type,
    body_canonicalization: Type,
    expiry: Option<chrono::Duration>,
    hash_algo: HashAlgo,
    time: Option<chrono::DateTime<chrono::offset::Utc>>,
}

/// Mail signer. Use the [SignerBuilder] to build an instance.
impl Signer {
    /// Sign a message, returning the finished signature header line.
    /// The message streams through the same parser and canonicalizer
    /// pipeline verification uses.
    pub fn sign(&self, message: &[u8]) -> Result<String, DKIMError> {
        let mut parser = MessageParser::new();
        let mut events = parser.feed(message)?;
        events.extend(parser.finish()?);

        let mut headers: Vec<RawHeader> = Vec::new();
        let mut body_canon = BodyCanonicalizer::new(self.body_canonicalization);
        let mut body_hasher = LimitHasher::new(self.hash_algo, self.body_limit);
        // Legacy signatures share one digest between headers and body,
        // so the header half is hashed the moment headers end.
        let mut builder: Option<SignatureHeaderBuilder> = None;

        for event in events {
            match event {
                MessageEvent::Header(header) => headers.push(header),
                MessageEvent::EndOfHeaders => {
                    if self.kind == SignatureKind::DomainKey {
                        let legacy = self.header_builder()?;
                        let unsigned = legacy.clone().add_tag("b", "").build();
                        body_hasher.hash_unlimited(&self.canonical_headers(
                            &headers,
                            &unsigned.emit(false),
                        ));
                        builder = Some(legacy);
                    }
                }
                MessageEvent::Body(chunk) => body_canon.write(&chunk, &mut body_hasher),
                MessageEvent::End => {}
            }
        }
        body_canon.finish(&mut body_hasher);

        let (builder, digest) = match self.kind {
            SignatureKind::Dkim => {
                let body_hash = body_hasher.finalize();
                let builder = self.header_builder()?.add_tag("bh", &body_hash);
                let unsigned = builder.clone().add_tag("b", "").build();
                let header_bytes = self.canonical_headers(&headers, &unsigned.emit(false));
                (builder, digest_bytes(self.hash_algo, &header_bytes))
            }
            SignatureKind::DomainKey => {
                let builder = builder.expect("legacy builder set at end of headers");
                (builder, body_hasher.finalize_bytes())
            }
        };

        let signature = self.sign_digest(&digest)?;
        let signed = builder
            .add_tag("b", &general_purpose::STANDARD.encode(signature))
            .build();

        Ok(format!("{}: {}", self.kind.header_name(), signed.emit(true)))
    }

    /// Sign with the domain guard applied: messages whose Sender (or
    /// From) domain does not lie under the signing domain are skipped.
    pub fn sign_message(&self, message: &[u8]) -> Result<SigningOutcome, DKIMError> {
        let mut parser = MessageParser::new();
        let mut events = parser.feed(message)?;
        events.extend(parser.finish()?);
        let headers: Vec<RawHeader> = events
            .into_iter()
            .filter_map(|ev| match ev {
                MessageEvent::Header(h) => Some(h),
                _ => None,
            })
            .collect();

        let Some(origin) = message_origin(&headers) else {
            return Ok(SigningOutcome::Skipped("no sender or from address"));
        };
        let Some(domain) = origin.domain() else {
            return Ok(SigningOutcome::Skipped("origin address has no domain"));
        };
        if !domain_suffix_match(domain, &self.signing_domain) {
            return Ok(SigningOutcome::Skipped(
                "origin domain is outside the signing domain",
            ));
        }

        Ok(SigningOutcome::Signed(self.sign(message)?))
    }

    fn canonical_headers(&self, headers: &[RawHeader], sig_value: &str) -> Vec<u8> {
        canonical_headers(
            self.header_canonicalization,
            &self.signed_headers,
            headers,
            self.kind.header_name().as_bytes(),
            // the leading space appears in the final header line too
            format!(" {sig_value}").as_bytes(),
        )
    }

    fn header_builder(&self) -> Result<SignatureHeaderBuilder, DKIMError> {
        let canon = if self.header_canonicalization == self.body_canonicalization {
            self.header_canonicalization.canon_name().to_string()
        } else {
            format!(
                "{}/{}",
                self.header_canonicalization.canon_name(),
                self.body_canonicalization.canon_name()
            )
        };

        let mut builder = SignatureHeaderBuilder::new(self.kind);
        match self.kind {
            SignatureKind::Dkim => {
                builder = builder
                    .add_tag("v", "1")
                    .add_tag("a", self.hash_algo.algo_name())
                    .add_tag(
                        "c",
                        &format!(
                            "{}/{}",
                            self.header_canonicalization.canon_name(),
                            self.body_canonicalization.canon_name()
                        ),
                    )
                    .add_tag("d", &self.signing_domain)
                    .add_tag("s", &self.selector)
                    .set_signed_headers(&self.signed_headers);

                if let Some(identity) = &self.identity {
                    builder = builder.add_tag("i", identity);
                }
                if let Some(limit) = self.body_limit {
                    builder = builder.add_tag("l", &limit.to_string());
                }

                let time = self.time.unwrap_or_else(chrono::offset::Utc::now);
                builder = builder.set_time(time);
                if let Some(expiry) = self.expiry {
                    builder = builder.set_expiry(expiry)?;
                }
            }
            SignatureKind::DomainKey => {
                builder = builder
                    .add_tag("a", self.hash_algo.algo_name())
                    .add_tag("c", &canon)
                    .add_tag("d", &self.signing_domain)
                    .add_tag("q", "dns")
                    .add_tag("s", &self.selector)
                    .set_signed_headers(&self.signed_headers);
            }
        }
        Ok(builder)
    }

    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, DKIMError> {
        match &self.private_key {
            DkimPrivateKey::Rsa(private_key) => private_key
                .sign(
                    match self.hash_algo {
                        HashAlgo::RsaSha1 => Pkcs1v15Sign::new::<Sha1>(),
                        HashAlgo::RsaSha256 => Pkcs1v15Sign::new::<Sha256>(),
                        algo => {
                            return Err(DKIMError::UnsupportedHashAlgorithm(
                                algo.algo_name().to_owned(),
                            ))
                        }
                    },
                    digest,
                )
                .map_err(|err| DKIMError::FailedToSign(err.to_string())),
            DkimPrivateKey::Ed25519(signing_key) => Ok(signing_key.sign(digest).to_bytes().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_key() -> DkimPrivateKey {
        DkimPrivateKey::Rsa(
            rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key"),
        )
    }

    #[test]
    fn test_sign_rsa_header_shape() {
        let email = "Subject: subject\r\nFrom: Alice <alice@example.com>\r\n\r\nHello Alice\r\n \r\n";
        let time = chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 1).unwrap();

        let signer = SignerBuilder::new()
            .with_signed_headers(["From", "Subject"])
            .unwrap()
            .with_private_key(test_key())
            .with_selector("s20")
            .with_signing_domain("example.com")
            .with_time(time)
            .build()
            .unwrap();
        let header = signer.sign(email.as_bytes()).unwrap();

        // everything up to b= is deterministic, b= depends on the key
        assert!(
            header.starts_with(
                "DKIM-Signature: v=1; a=rsa-sha256; c=simple/simple; d=example.com; \
                 h=from:subject; s=s20; t=1609459201; \
                 bh=u+qEVNZkvzGEULlUcyPqYjOhLtpAoF3loa4Vc/ADN9I=; b="
            ),
            "got: {header}"
        );
    }

    #[test]
    fn test_sign_legacy_header_shape() {
        let email = "Subject: subject\r\nFrom: Alice <alice@example.com>\r\n\r\nHello Alice\r\n";

        let signer = SignerBuilder::new()
            .with_signed_headers(["From", "Subject"])
            .unwrap()
            .with_private_key(test_key())
            .with_selector("beta")
            .with_signing_domain("example.com")
            .with_signature_kind(SignatureKind::DomainKey)
            .with_header_canonicalization(Type::Nowsp)
            .with_body_canonicalization(Type::Nowsp)
            .build()
            .unwrap();
        let header = signer.sign(email.as_bytes()).unwrap();

        assert!(
            header.starts_with(
                "DomainKey-Signature: a=rsa-sha1; c=nowsp; d=example.com; \
                 h=from:subject; q=dns; s=beta; b="
            ),
            "got: {header}"
        );
    }

    #[test]
    fn test_builder_requires_from() {
        assert_eq!(
            SignerBuilder::new()
                .with_signed_headers(["Subject"])
                .unwrap_err(),
            DKIMError::BuilderError("missing From in signed headers")
        );
    }

    #[test]
    fn test_builder_rejects_legacy_relaxed() {
        let res = SignerBuilder::new()
            .with_signed_headers(["From"])
            .unwrap()
            .with_private_key(test_key())
            .with_selector("sel")
            .with_signing_domain("example.com")
            .with_signature_kind(SignatureKind::DomainKey)
            .with_header_canonicalization(Type::Relaxed)
            .build();
        assert!(matches!(res.unwrap_err(), DKIMError::BuilderError(_)));
    }

    #[test]
    fn test_builder_rejects_mismatched_algo() {
        let res = SignerBuilder::new()
            .with_signed_headers(["From"])
            .unwrap()
            .with_private_key(test_key())
            .with_selector("sel")
            .with_signing_domain("example.com")
            .with_hash_algo(HashAlgo::Ed25519Sha256)
            .build();
        assert!(matches!(res.unwrap_err(), DKIMError::BuilderError(_)));
    }

    #[test]
    fn test_sign_message_domain_guard() {
        let signer = SignerBuilder::new()
            .with_signed_headers(["From"])
            .unwrap()
            .with_private_key(test_key())
            .with_selector("sel")
            .with_signing_domain("example.com")
            .build()
            .unwrap();

        let inside = b"From: a@mail.example.com\r\n\r\nhi\r\n";
        assert!(matches!(
            signer.sign_message(inside).unwrap(),
            SigningOutcome::Signed(_)
        ));

        let outside = b"From: a@elsewhere.org\r\n\r\nhi\r\n";
        assert_eq!(
            signer.sign_message(outside).unwrap(),
            SigningOutcome::Skipped("origin domain is outside the signing domain")
        );

        // Sender beats From for the guard
        let sender = b"Sender: a@elsewhere.org\r\nFrom: a@example.com\r\n\r\nhi\r\n";
        assert_eq!(
            signer.sign_message(sender).unwrap(),
            SigningOutcome::Skipped("origin domain is outside the signing domain")
        );
    }
}
