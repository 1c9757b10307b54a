use crate::hash::HashAlgo;
use crate::header::{domain_suffix_match, SignatureHeader, SignatureKind};
use crate::{dns, parser, DKIMError, DkimPublicKey, DNS_NAMESPACE};
use base64::engine::general_purpose;
use base64::Engine;
use rsa::{pkcs1, pkcs8};
use std::collections::HashMap;

const RSA_KEY_TYPE: &str = "rsa";
const ED25519_KEY_TYPE: &str = "ed25519";

/// A public key record published in DNS, parsed from its TXT form.
/// Immutable once constructed; owned by the signature that fetched it.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    key_type: String,
    key_data: Vec<u8>,
    granularity: Option<String>,
    allowed_hashes: Option<Vec<String>>,
    service_types: Vec<String>,
    flags: Vec<String>,
}

impl KeyRecord {
    pub fn parse(txt: &str) -> Result<Self, DKIMError> {
        let (_, tags) = parser::tag_list(txt).map_err(|err| {
            tracing::warn!("key syntax error: {}", err);
            DKIMError::KeySyntaxError
        })?;

        let mut tags_map = HashMap::new();
        for tag in tags {
            tags_map.insert(tag.name.clone(), tag);
        }

        if let Some(version) = tags_map.get("v") {
            if version.value != "DKIM1" {
                return Err(DKIMError::KeyIncompatibleVersion);
            }
        }

        let key_type = match tags_map.get("k") {
            Some(v) => {
                if v.value != RSA_KEY_TYPE && v.value != ED25519_KEY_TYPE {
                    return Err(DKIMError::InappropriateKeyAlgorithm(v.value.clone()));
                }
                v.value.clone()
            }
            None => RSA_KEY_TYPE.to_string(),
        };

        let key_data = match tags_map.get("p") {
            None => return Err(DKIMError::NoKeyForSignature),
            // An empty p= is how a key is revoked; keep the record so
            // the caller can tell revocation apart from absence.
            Some(tag) if tag.value.is_empty() => Vec::new(),
            Some(tag) => general_purpose::STANDARD.decode(&tag.value).map_err(|err| {
                tracing::warn!("failed to decode public key: {}", err);
                DKIMError::KeySyntaxError
            })?,
        };

        let granularity = tags_map.get("g").map(|t| t.value.clone());
        let allowed_hashes = tags_map.get("h").map(|t| {
            t.value
                .split(':')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect()
        });
        let service_types = match tags_map.get("s") {
            Some(t) => t
                .value
                .split(':')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect(),
            None => vec!["*".to_string()],
        };
        let flags = match tags_map.get("t") {
            Some(t) => t
                .value
                .split(':')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect(),
            None => vec![],
        };

        Ok(Self {
            key_type,
            key_data,
            granularity,
            allowed_hashes,
            service_types,
            flags,
        })
    }

    pub fn revoked(&self) -> bool {
        self.key_data.is_empty()
    }

    /// Key published for testing; verifiers should not treat a failure
    /// as significant.
    pub fn testing(&self) -> bool {
        self.flags.iter().any(|f| f == "y")
    }

    /// The `i=` domain must equal `d=` exactly, subdomains excluded.
    pub fn strict_identity(&self) -> bool {
        self.flags.iter().any(|f| f == "s")
    }

    /// Effective granularity pattern. The legacy form reads an empty
    /// `g=` as the wildcard; the v1 form reads it as match-nothing.
    fn granularity(&self, kind: SignatureKind) -> &str {
        match &self.granularity {
            None => "*",
            Some(g) if g.is_empty() && kind == SignatureKind::DomainKey => "*",
            Some(g) => g,
        }
    }

    pub fn matches_local_part(&self, kind: SignatureKind, local: &str) -> bool {
        match_granularity(self.granularity(kind), local)
    }

    pub fn allows_hash(&self, algo: HashAlgo) -> bool {
        match &self.allowed_hashes {
            None => true,
            Some(hashes) => hashes.iter().any(|h| h == algo.hash_name()),
        }
    }

    pub fn allows_email_service(&self) -> bool {
        self.service_types.iter().any(|s| s == "*" || s == "email")
    }

    pub(crate) fn public_key(&self) -> Result<DkimPublicKey, DKIMError> {
        if self.revoked() {
            return Err(DKIMError::KeyRevoked);
        }
        if self.key_type == RSA_KEY_TYPE {
            Ok(DkimPublicKey::Rsa(
                pkcs8::DecodePublicKey::from_public_key_der(&self.key_data)
                    .or_else(|_| pkcs1::DecodeRsaPublicKey::from_pkcs1_der(&self.key_data))
                    .map_err(|err| {
                        DKIMError::KeyUnavailable(format!("failed to parse public key: {}", err))
                    })?,
            ))
        } else {
            let bytes: [u8; 32] = self.key_data.as_slice().try_into().map_err(|_| {
                DKIMError::KeyUnavailable(format!(
                    "invalid ed25519 key length: {}",
                    self.key_data.len()
                ))
            })?;
            Ok(DkimPublicKey::Ed25519(
                ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|err| {
                    DKIMError::KeyUnavailable(format!("failed to parse public key: {}", err))
                })?,
            ))
        }
    }
}

/// Local-part pattern from `g=`: literal match with at most one `*`
/// standing for any run of characters.
pub(crate) fn match_granularity(pattern: &str, local: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.is_empty() {
        return false;
    }
    match pattern.split_once('*') {
        None => pattern == local,
        Some((prefix, suffix)) => {
            local.len() >= prefix.len() + suffix.len()
                && local.starts_with(prefix)
                && local.ends_with(suffix)
        }
    }
}

/// Fetch and parse the key record named by (selector, domain).
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.2>
pub(crate) async fn retrieve_key_record(
    resolver: &dyn dns::Lookup,
    domain: &str,
    selector: &str,
) -> Result<KeyRecord, DKIMError> {
    let dns_name = format!("{}.{}.{}", selector, DNS_NAMESPACE, domain);
    let res = resolver.lookup_txt(&dns_name).await?;
    let txt = res.first().ok_or(DKIMError::NoKeyForSignature)?;
    if txt.trim().is_empty() {
        return Err(DKIMError::NoKeyForSignature);
    }
    tracing::debug!("key record TXT: {:?}", txt);
    KeyRecord::parse(txt)
}

/// Checks a fetched key against the signature that requested it.
pub(crate) fn check_key(record: &KeyRecord, sig: &SignatureHeader) -> Result<(), DKIMError> {
    if record.revoked() {
        return Err(DKIMError::KeyRevoked);
    }

    let algo = sig.hash_algo()?;
    if record.key_type != algo.key_type() {
        return Err(DKIMError::InappropriateKeyAlgorithm(
            record.key_type.clone(),
        ));
    }
    if !record.allows_hash(algo) {
        return Err(DKIMError::KeyHashNotAllowed(algo.hash_name().to_owned()));
    }
    if !record.allows_email_service() {
        return Err(DKIMError::InappropriateServiceType);
    }

    let identity = sig.identity();
    let (local, identity_domain) = identity.split_once('@').unwrap_or(("", identity.as_str()));
    if record.strict_identity() && !identity_domain.eq_ignore_ascii_case(sig.domain()) {
        return Err(DKIMError::DomainMismatch);
    }
    if !domain_suffix_match(identity_domain, sig.domain()) {
        return Err(DKIMError::DomainMismatch);
    }
    if !record.matches_local_part(sig.kind(), local) {
        return Err(DKIMError::GranularityMismatch);
    }

    Ok(())
}
