use crate::canonicalization::BodyCanonicalizer;
use crate::dns;
use crate::hash::{canonical_headers, digest_bytes, HashAlgo, LimitHasher};
use crate::header::{SignatureHeader, SignatureKind};
use crate::message::{MessageEvent, MessageParser, RawHeader};
use crate::public_key::{check_key, retrieve_key_record, KeyRecord};
use crate::result::{DKIMResult, SignatureResult};
use crate::{verify_signature, DKIMError, DkimPublicKey};

/// Cap on processed signature headers, limiting the damage a message
/// stuffed with signatures can do. Extra ones are carried as ordinary
/// headers.
const MAX_SIGNATURES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ReadingHeaders,
    ReadingBody,
    Finished,
}

/// Per-signature hashing pipeline, created at end-of-headers once the
/// public key is in hand. The v1 form carries a precomputed header
/// digest and an expected body hash; the legacy form hashes headers
/// and body as one stream.
struct Pipeline {
    algo: HashAlgo,
    key: DkimPublicKey,
    signature: Vec<u8>,
    body_canon: BodyCanonicalizer,
    body_hasher: LimitHasher,
    header_digest: Option<Vec<u8>>,
    expected_body_hash: Option<String>,
}

struct SignatureState {
    kind: SignatureKind,
    raw_name: Vec<u8>,
    header: Option<SignatureHeader>,
    result: Option<SignatureResult>,
    pipeline: Option<Pipeline>,
    testing: bool,
}

impl SignatureState {
    fn reject(&mut self, err: &DKIMError) {
        self.result = Some(SignatureResult::rejected(err, self.testing));
    }
}

/// Streaming verifier for one message. Feed it chunks, then `finish`;
/// per-signature problems never abort the run, only a message parse
/// error does.
pub struct Verifier<'r> {
    resolver: &'r dyn dns::Lookup,
    parser: MessageParser,
    phase: Phase,
    headers: Vec<RawHeader>,
    signatures: Vec<SignatureState>,
}

impl<'r> Verifier<'r> {
    pub fn new(resolver: &'r dyn dns::Lookup) -> Self {
        Self {
            resolver,
            parser: MessageParser::new(),
            phase: Phase::ReadingHeaders,
            headers: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub async fn process_chunk(&mut self, chunk: &[u8]) -> Result<(), DKIMError> {
        let events = self.parser.feed(chunk)?;
        self.handle_events(events).await
    }

    pub async fn finish(&mut self) -> Result<(), DKIMError> {
        let events = self.parser.finish()?;
        self.handle_events(events).await?;
        self.finish_message();
        Ok(())
    }

    pub fn finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Raw header lines as received, in order.
    pub fn headers(&self) -> &[RawHeader] {
        &self.headers
    }

    /// Collated verdict over all signatures.
    pub fn result(&self) -> DKIMResult {
        match self.best_index() {
            None => DKIMResult::none(),
            Some(idx) => {
                let state = &self.signatures[idx];
                DKIMResult::collated(
                    state.result.as_ref().expect("best state has a result"),
                    state.header.as_ref().map(|h| h.domain()),
                    state.kind,
                )
            }
        }
    }

    /// The signature backing the collated verdict, when it parsed.
    pub fn signature(&self) -> Option<&SignatureHeader> {
        self.best_index()
            .and_then(|idx| self.signatures[idx].header.as_ref())
    }

    /// Per-signature results in order of appearance.
    pub fn signature_results(&self) -> Vec<&SignatureResult> {
        self.signatures
            .iter()
            .filter_map(|s| s.result.as_ref())
            .collect()
    }

    fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, state) in self.signatures.iter().enumerate() {
            let Some(result) = &state.result else {
                continue;
            };
            let better = match best {
                None => true,
                // ties go to the earliest signature
                Some(b) => {
                    result.verdict()
                        > self.signatures[b]
                            .result
                            .as_ref()
                            .expect("best candidate has a result")
                            .verdict()
                }
            };
            if better {
                best = Some(idx);
            }
        }
        best
    }

    async fn handle_events(&mut self, events: Vec<MessageEvent>) -> Result<(), DKIMError> {
        for event in events {
            match event {
                MessageEvent::Header(header) => self.push_header(header),
                MessageEvent::EndOfHeaders => self.finish_headers().await,
                MessageEvent::Body(chunk) => self.push_body(&chunk),
                MessageEvent::End => {}
            }
        }
        Ok(())
    }

    fn push_header(&mut self, header: RawHeader) {
        if let Some(kind) = SignatureKind::from_header_name(header.name()) {
            if self.signatures.len() < MAX_SIGNATURES {
                let value = String::from_utf8_lossy(header.value_bytes()).into_owned();
                let mut state = SignatureState {
                    kind,
                    raw_name: header.name_bytes().to_vec(),
                    header: None,
                    result: None,
                    pipeline: None,
                    testing: false,
                };
                match SignatureHeader::parse(kind, &value) {
                    Ok(sig) => {
                        let checked = sig.validate();
                        state.header = Some(sig);
                        if let Err(err) = checked {
                            state.reject(&err);
                        }
                    }
                    Err(err) => state.reject(&err),
                }
                self.signatures.push(state);
            }
        }
        self.headers.push(header);
    }

    /// End-of-headers: resolve keys and bring up one pipeline per
    /// still-viable signature, replaying the accumulated headers.
    async fn finish_headers(&mut self) {
        self.phase = Phase::ReadingBody;
        for idx in 0..self.signatures.len() {
            if self.signatures[idx].result.is_some() {
                continue;
            }
            let Some(sig) = self.signatures[idx].header.clone() else {
                continue;
            };
            let raw_name = self.signatures[idx].raw_name.clone();

            match retrieve_key_record(self.resolver, sig.domain(), sig.selector()).await {
                Err(err) => self.signatures[idx].reject(&err),
                Ok(record) => {
                    self.signatures[idx].testing = record.testing();
                    match self.build_pipeline(&sig, &raw_name, &record) {
                        Ok(pipeline) => self.signatures[idx].pipeline = Some(pipeline),
                        Err(err) => self.signatures[idx].reject(&err),
                    }
                }
            }
        }
    }

    fn build_pipeline(
        &self,
        sig: &SignatureHeader,
        raw_name: &[u8],
        record: &KeyRecord,
    ) -> Result<Pipeline, DKIMError> {
        check_key(record, sig)?;
        let key = record.public_key()?;

        let (header_canon, body_canon) = sig.canonicalization()?;
        let algo = sig.hash_algo()?;
        let signature = sig.signature_bytes()?;
        let limit = sig.body_limit()?;

        let hashable = sig.hashable_value();
        let header_bytes = canonical_headers(
            header_canon,
            &sig.signed_header_names(),
            &self.headers,
            raw_name,
            hashable.as_bytes(),
        );

        Ok(match sig.kind() {
            SignatureKind::Dkim => Pipeline {
                algo,
                key,
                signature,
                body_canon: BodyCanonicalizer::new(body_canon),
                body_hasher: LimitHasher::new(algo, limit),
                header_digest: Some(digest_bytes(algo, &header_bytes)),
                expected_body_hash: Some(sig.get_required_tag("bh").to_string()),
            },
            SignatureKind::DomainKey => {
                let mut body_hasher = LimitHasher::new(algo, limit);
                body_hasher.hash_unlimited(&header_bytes);
                Pipeline {
                    algo,
                    key,
                    signature,
                    body_canon: BodyCanonicalizer::new(body_canon),
                    body_hasher,
                    header_digest: None,
                    expected_body_hash: None,
                }
            }
        })
    }

    fn push_body(&mut self, chunk: &[u8]) {
        for state in &mut self.signatures {
            if let Some(Pipeline {
                body_canon,
                body_hasher,
                ..
            }) = state.pipeline.as_mut()
            {
                body_canon.write(chunk, body_hasher);
            }
        }
    }

    fn finish_message(&mut self) {
        self.phase = Phase::Finished;
        for state in &mut self.signatures {
            if state.result.is_some() {
                continue;
            }
            let Some(pipeline) = state.pipeline.take() else {
                state.reject(&DKIMError::UnknownInternalError(
                    "signature never activated".to_owned(),
                ));
                continue;
            };
            match finalize_pipeline(pipeline) {
                Ok(()) => state.result = Some(SignatureResult::pass(state.testing)),
                Err(err) => state.reject(&err),
            }
        }
    }
}

fn finalize_pipeline(pipeline: Pipeline) -> Result<(), DKIMError> {
    let Pipeline {
        algo,
        key,
        signature,
        body_canon,
        mut body_hasher,
        header_digest,
        expected_body_hash,
    } = pipeline;

    body_canon.finish(&mut body_hasher);

    match (header_digest, expected_body_hash) {
        (Some(digest), Some(expected)) => {
            let computed = body_hasher.finalize();
            tracing::debug!("computed body hash {}", computed);
            if computed != expected {
                return Err(DKIMError::BodyHashDidNotVerify);
            }
            if !verify_signature(algo, &digest, &signature, &key)? {
                return Err(DKIMError::SignatureDidNotVerify);
            }
        }
        _ => {
            // Legacy: one digest over canonical headers and body.
            let digest = body_hasher.finalize_bytes();
            if !verify_signature(algo, &digest, &signature, &key)? {
                return Err(DKIMError::SignatureDidNotVerify);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Verdict;
    use futures::future::BoxFuture;

    struct NoResolver;

    impl dns::Lookup for NoResolver {
        fn lookup_txt<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Vec<String>, DKIMError>> {
            Box::pin(async { Err(DKIMError::NoKeyForSignature) })
        }
    }

    async fn run(message: &str) -> DKIMResult {
        let resolver = NoResolver;
        let mut verifier = Verifier::new(&resolver);
        verifier
            .process_chunk(message.replace('\n', "\r\n").as_bytes())
            .await
            .unwrap();
        verifier.finish().await.unwrap();
        verifier.result()
    }

    #[tokio::test]
    async fn test_no_signatures_is_none() {
        let result = run("From: a@b.c\nSubject: hi\n\nbody\n").await;
        assert_eq!(result.verdict(), Verdict::None);
        assert_eq!(result.to_detail_string(), "none");
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_is_invalid() {
        let result = run(
            "DKIM-Signature: v=1; a=rsa-md5; d=example.com; s=sel; h=from; bh=aGFzaA==; b=c2ln\nFrom: a@example.com\n\nbody\n",
        )
        .await;
        assert_eq!(result.verdict(), Verdict::Invalid);
        assert_eq!(
            result.to_detail_string(),
            "invalid (unsupported algorithm rsa-md5)"
        );
        assert_eq!(result.domain_used(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_unparseable_signature_is_invalid() {
        let result = run("DKIM-Signature: ;;;\nFrom: a@b.c\n\nbody\n").await;
        assert_eq!(result.verdict(), Verdict::Invalid);
    }

    #[tokio::test]
    async fn test_no_key_is_invalid() {
        let result = run(
            "DKIM-Signature: v=1; a=rsa-sha256; d=bogus.example; s=sel; h=from; bh=aGFzaA==; b=c2ln\nFrom: a@bogus.example\n\nbody\n",
        )
        .await;
        assert_eq!(result.verdict(), Verdict::Invalid);
        assert_eq!(result.to_detail_string(), "invalid (no key)");
    }

    #[tokio::test]
    async fn test_signature_cap() {
        let sig = "DKIM-Signature: v=1; a=rsa-md5; d=e.com; s=sel; h=from; bh=a; b=b\n";
        let message = format!("{}From: a@e.com\n\nbody\n", sig.repeat(25));
        let resolver = NoResolver;
        let mut verifier = Verifier::new(&resolver);
        verifier
            .process_chunk(message.replace('\n', "\r\n").as_bytes())
            .await
            .unwrap();
        verifier.finish().await.unwrap();
        assert_eq!(verifier.signature_results().len(), MAX_SIGNATURES);
        // the extra headers are still part of the header section
        assert_eq!(verifier.headers().len(), 26);
    }
}
