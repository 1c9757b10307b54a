use crate::header::SignatureKind;
use crate::DKIMError;

/// Per-signature outcome. The ordering doubles as the collation rank:
/// a verdict is "better" when it is greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    /// No signature header was present at all.
    None,
    /// A signature header existed but never became checkable.
    Invalid,
    /// The signature was checkable and the message did not verify.
    Fail,
    Pass,
}

impl Verdict {
    pub fn summary(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Invalid => "invalid",
            Self::Fail => "fail",
            Self::Pass => "pass",
        }
    }
}

/// Outcome of checking one signature.
#[derive(Debug, Clone)]
pub struct SignatureResult {
    verdict: Verdict,
    detail: Option<String>,
    testing: bool,
}

impl SignatureResult {
    pub(crate) fn pass(testing: bool) -> Self {
        Self {
            verdict: Verdict::Pass,
            detail: None,
            testing,
        }
    }

    pub(crate) fn rejected(err: &DKIMError, testing: bool) -> Self {
        let verdict = if err.is_verification_failure() {
            Verdict::Fail
        } else {
            Verdict::Invalid
        };
        Self {
            verdict,
            detail: Some(err.to_string()),
            testing,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// The key was published with the testing flag; failures from it
    /// should not be acted on.
    pub fn key_testing(&self) -> bool {
        self.testing
    }

    /// `pass`, or `fail (body has been altered)` style text for the
    /// result header.
    pub fn to_detail_string(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({})", self.verdict.summary(), detail),
            None => self.verdict.summary().to_string(),
        }
    }
}

/// The collated outcome over every signature on a message: the best
/// per-signature result, ranked `pass > fail > invalid > none`.
#[derive(Debug, Clone)]
pub struct DKIMResult {
    verdict: Verdict,
    detail: Option<String>,
    domain_used: Option<String>,
    kind: Option<SignatureKind>,
}

impl DKIMResult {
    pub(crate) fn none() -> Self {
        Self {
            verdict: Verdict::None,
            detail: None,
            domain_used: None,
            kind: None,
        }
    }

    pub(crate) fn collated(
        result: &SignatureResult,
        domain: Option<&str>,
        kind: SignatureKind,
    ) -> Self {
        Self {
            verdict: result.verdict(),
            detail: result.detail().map(|s| s.to_string()),
            domain_used: domain.map(|d| d.to_lowercase()),
            kind: Some(kind),
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn summary(&self) -> &'static str {
        self.verdict.summary()
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn to_detail_string(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({})", self.verdict.summary(), detail),
            None => self.verdict.summary().to_string(),
        }
    }

    /// Domain of the signature backing the verdict, if any.
    pub fn domain_used(&self) -> Option<&str> {
        self.domain_used.as_deref()
    }

    /// Which signature scheme produced the verdict; used to pick the
    /// `dkim=` / `domainkeys=` method token.
    pub fn kind(&self) -> Option<SignatureKind> {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_ranking() {
        assert!(Verdict::Pass > Verdict::Fail);
        assert!(Verdict::Fail > Verdict::Invalid);
        assert!(Verdict::Invalid > Verdict::None);
    }

    #[test]
    fn test_rejected_classification() {
        let res = SignatureResult::rejected(&DKIMError::BodyHashDidNotVerify, false);
        assert_eq!(res.verdict(), Verdict::Fail);
        assert_eq!(res.to_detail_string(), "fail (body has been altered)");

        let res = SignatureResult::rejected(&DKIMError::NoKeyForSignature, false);
        assert_eq!(res.verdict(), Verdict::Invalid);
        assert_eq!(res.to_detail_string(), "invalid (no key)");

        let res = SignatureResult::rejected(
            &DKIMError::UnsupportedHashAlgorithm("rsa-md5".to_owned()),
            false,
        );
        assert_eq!(res.to_detail_string(), "invalid (unsupported algorithm rsa-md5)");
    }
}
