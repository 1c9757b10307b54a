/// Coarse failure class, used to decide between permanent and
/// transient handling when reporting results upstream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Permfail,
    Tempfail,
}

quick_error! {
    #[derive(Debug, PartialEq, Clone)]
    /// Errors raised while parsing, canonicalizing, signing or verifying.
    /// The `Display` text doubles as the per-signature result detail.
    pub enum DKIMError {
        ParseError(err: String) {
            display("message parse error: {}", err)
        }
        SignatureSyntaxError(err: String) {
            display("signature syntax error: {}", err)
        }
        SignatureMissingRequiredTag(name: &'static str) {
            display("signature missing required tag ({})", name)
        }
        UnsupportedVersion(value: String) {
            display("unsupported version {}", value)
        }
        UnsupportedHashAlgorithm(value: String) {
            display("unsupported algorithm {}", value)
        }
        UnsupportedCanonicalizationType(value: String) {
            display("unsupported canonicalization {}", value)
        }
        UnsupportedQueryMethod(value: String) {
            display("unsupported query protocol {}", value)
        }
        SignatureExpired {
            display("signature expired")
        }
        DomainMismatch {
            display("bad identity")
        }
        FromFieldNotSigned {
            display("From field not signed")
        }
        NoKeyForSignature {
            display("no key")
        }
        KeyUnavailable(err: String) {
            display("key unavailable: {}", err)
        }
        KeySyntaxError {
            display("invalid key record")
        }
        KeyIncompatibleVersion {
            display("invalid key record version")
        }
        KeyRevoked {
            display("key revoked")
        }
        InappropriateKeyAlgorithm(value: String) {
            display("unsupported key type {}", value)
        }
        KeyHashNotAllowed(value: String) {
            display("unsupported hash {}", value)
        }
        GranularityMismatch {
            display("granularity mismatch")
        }
        InappropriateServiceType {
            display("inappropriate service type")
        }
        BodyHashDidNotVerify {
            display("body has been altered")
        }
        SignatureDidNotVerify {
            display("signature did not verify")
        }
        UnknownInternalError(err: String) {
            display("internal error: {}", err)
        }
        FailedToSign(err: String) {
            display("failed to sign: {}", err)
        }
        BuilderError(err: &'static str) {
            display("failed to build object: {}", err)
        }
        PrivateKeyLoadError(err: String) {
            display("failed to load private key: {}", err)
        }
    }
}

impl DKIMError {
    pub fn status(&self) -> Status {
        use DKIMError::*;
        match self {
            ParseError(_)
            | SignatureSyntaxError(_)
            | SignatureMissingRequiredTag(_)
            | UnsupportedVersion(_)
            | UnsupportedHashAlgorithm(_)
            | UnsupportedCanonicalizationType(_)
            | UnsupportedQueryMethod(_)
            | SignatureExpired
            | DomainMismatch
            | FromFieldNotSigned
            | NoKeyForSignature
            | KeySyntaxError
            | KeyIncompatibleVersion
            | KeyRevoked
            | InappropriateKeyAlgorithm(_)
            | KeyHashNotAllowed(_)
            | GranularityMismatch
            | InappropriateServiceType
            | BodyHashDidNotVerify
            | SignatureDidNotVerify => Status::Permfail,
            KeyUnavailable(_)
            | UnknownInternalError(_)
            | FailedToSign(_)
            | BuilderError(_)
            | PrivateKeyLoadError(_) => Status::Tempfail,
        }
    }

    /// Whether the signature was structurally usable and the message
    /// itself did not check out. Hash and signature mismatches mean the
    /// mail was altered in transit (`fail`); everything earlier in the
    /// pipeline means the signature never became checkable (`invalid`).
    pub(crate) fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            DKIMError::BodyHashDidNotVerify
                | DKIMError::SignatureDidNotVerify
                | DKIMError::UnknownInternalError(_)
        )
    }
}
