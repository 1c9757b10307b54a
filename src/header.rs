use crate::canonicalization::Type;
use crate::hash::HashAlgo;
use crate::parser::{self, Tag};
use crate::DKIMError;
use base64::engine::general_purpose;
use base64::Engine;
use indexmap::map::IndexMap;
use std::str::FromStr;

pub(crate) const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";
pub(crate) const DOMAINKEY_SIGNATURE_NAME: &str = "DomainKey-Signature";

const SIGN_EXPIRATION_DRIFT_MINS: i64 = 15;

/// Emission order is fixed so a rendering is deterministic; the hash
/// input depends on it.
const EMIT_ORDER: &[&str] = &[
    "v", "a", "c", "d", "h", "i", "l", "q", "s", "t", "x", "bh", "b",
];

/// The two signature schemes carried in mail headers. They share the
/// tag grammar and most semantics; the differences (version tag, body
/// hash, canonicalization sets, key record defaults) hang off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// Legacy `DomainKey-Signature`
    DomainKey,
    /// `DKIM-Signature`
    Dkim,
}

impl SignatureKind {
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::DomainKey => DOMAINKEY_SIGNATURE_NAME,
            Self::Dkim => DKIM_SIGNATURE_NAME,
        }
    }

    /// Method token for `Authentication-Results`.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::DomainKey => "domainkeys",
            Self::Dkim => "dkim",
        }
    }

    pub fn from_header_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME) {
            Some(Self::Dkim)
        } else if name.eq_ignore_ascii_case(DOMAINKEY_SIGNATURE_NAME) {
            Some(Self::DomainKey)
        } else {
            None
        }
    }
}

/// A parsed signature header: the tag map in received order plus the
/// raw value text, which verification hashes with the `b=` value
/// excised.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    kind: SignatureKind,
    tags: IndexMap<String, Tag>,
    raw_value: String,
}

impl SignatureHeader {
    /// Parse the value portion of a signature header. Tag grammar
    /// errors surface here; structural rules are checked separately by
    /// [`SignatureHeader::validate`] so a structurally bad signature
    /// still yields a record to report on.
    pub fn parse(kind: SignatureKind, value: &str) -> Result<Self, DKIMError> {
        let (_, tags) = parser::tag_list(value)
            .map_err(|err| DKIMError::SignatureSyntaxError(err.to_string()))?;

        let mut tags_map = IndexMap::new();
        for mut tag in tags {
            match tag.name.as_str() {
                // Tokens compared case-insensitively live lowercased.
                "a" | "c" | "d" | "q" | "h" => {
                    tag.value = tag.value.to_ascii_lowercase();
                }
                _ => {}
            }
            tags_map.insert(tag.name.clone(), tag);
        }

        Ok(Self {
            kind,
            tags: tags_map,
            raw_value: value.to_owned(),
        })
    }

    pub fn kind(&self) -> SignatureKind {
        self.kind
    }

    pub fn get_tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|v| v.value.as_str())
    }

    pub fn get_raw_tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|v| v.raw_value.as_str())
    }

    /// Get the named tag, parsed into an `R`.
    pub fn parse_tag<R>(&self, name: &str) -> Result<Option<R>, DKIMError>
    where
        R: FromStr,
        <R as FromStr>::Err: std::fmt::Display,
    {
        match self.get_tag(name) {
            None => Ok(None),
            Some(value) => {
                let value: R = value.parse().map_err(|err| {
                    DKIMError::SignatureSyntaxError(format!(
                        "invalid \"{name}\" tag value: {err:#}"
                    ))
                })?;
                Ok(Some(value))
            }
        }
    }

    /// Required tags are guaranteed present once `validate` has run.
    pub fn get_required_tag(&self, name: &str) -> &str {
        match self.get_tag(name) {
            Some(value) => value,
            None => panic!("required tag {name} is not present"),
        }
    }

    pub fn domain(&self) -> &str {
        self.get_required_tag("d")
    }

    pub fn selector(&self) -> &str {
        self.get_required_tag("s")
    }

    /// The identity the signature was made on behalf of; defaults to
    /// `@<d>`.
    pub fn identity(&self) -> String {
        match self.get_tag("i") {
            Some(identity) => identity.to_owned(),
            None => format!("@{}", self.domain()),
        }
    }

    pub fn body_limit(&self) -> Result<Option<usize>, DKIMError> {
        self.parse_tag("l")
    }

    /// Signed header names from `h=`, lowercased, in order.
    pub fn signed_header_names(&self) -> Vec<String> {
        self.get_required_tag("h")
            .split(':')
            .map(|s| s.trim().to_string())
            .collect()
    }

    pub fn hash_algo(&self) -> Result<HashAlgo, DKIMError> {
        parser::parse_hash_algo(self.kind, self.get_tag("a"))
    }

    pub fn canonicalization(&self) -> Result<(Type, Type), DKIMError> {
        parser::parse_canonicalization(self.kind, self.get_tag("c"))
    }

    /// Decoded signature octets from `b=`. The tag grammar has already
    /// stripped folding whitespace out of the value.
    pub fn signature_bytes(&self) -> Result<Vec<u8>, DKIMError> {
        general_purpose::STANDARD
            .decode(self.get_required_tag("b"))
            .map_err(|err| {
                DKIMError::SignatureSyntaxError(format!("failed to decode signature: {}", err))
            })
    }

    /// The received header value with the raw `b=` value excised; this
    /// is what verification feeds to the header canonicalizer so that
    /// the signer's own formatting is preserved byte for byte.
    pub(crate) fn hashable_value(&self) -> String {
        match self.get_raw_tag("b") {
            Some(raw_b) if !raw_b.is_empty() => self.raw_value.replacen(raw_b, "", 1),
            _ => self.raw_value.clone(),
        }
    }

    /// Deterministic rendering in the fixed tag order. With
    /// `include_signature_data` unset the `b=` tag is emitted with an
    /// empty value, the form hashed on the signing side.
    pub fn emit(&self, include_signature_data: bool) -> String {
        let mut parts = Vec::new();
        for &name in EMIT_ORDER {
            match name {
                "b" => {
                    let value = if include_signature_data {
                        self.get_tag("b").unwrap_or("")
                    } else {
                        ""
                    };
                    parts.push(format!("b={value}"));
                }
                _ => {
                    if let Some(value) = self.get_tag(name) {
                        parts.push(format!("{name}={value}"));
                    }
                }
            }
        }
        parts.join("; ")
    }

    /// Structural checks run before a signature is admitted to
    /// processing: required tags, version, algorithm, canonicalization,
    /// query protocol, expiry, identity alignment.
    /// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.1>
    pub fn validate(&self) -> Result<(), DKIMError> {
        match self.kind {
            SignatureKind::Dkim => {
                for required in ["v", "a", "b", "bh", "d", "h", "s"] {
                    if self.get_tag(required).map_or(true, str::is_empty) {
                        return Err(DKIMError::SignatureMissingRequiredTag(required));
                    }
                }
                let version = self.get_required_tag("v");
                if version != "1" {
                    return Err(DKIMError::UnsupportedVersion(version.to_owned()));
                }
            }
            SignatureKind::DomainKey => {
                // The legacy form predates the version tag; one showing
                // up means this is not a DomainKey signature at all.
                if let Some(version) = self.get_tag("v") {
                    return Err(DKIMError::UnsupportedVersion(version.to_owned()));
                }
                for required in ["b", "d", "h", "s"] {
                    if self.get_tag(required).map_or(true, str::is_empty) {
                        return Err(DKIMError::SignatureMissingRequiredTag(required));
                    }
                }
            }
        }

        self.hash_algo()?;
        self.canonicalization()?;

        if let Some(query_method) = self.get_tag("q") {
            if query_method != "dns" && query_method != "dns/txt" {
                return Err(DKIMError::UnsupportedQueryMethod(query_method.to_owned()));
            }
        }

        if !self
            .signed_header_names()
            .iter()
            .any(|h| h == "from")
        {
            return Err(DKIMError::FromFieldNotSigned);
        }

        if let Some(identity) = self.get_tag("i") {
            let Some((_local, domain)) = identity.split_once('@') else {
                return Err(DKIMError::DomainMismatch);
            };
            if !domain_suffix_match(domain, self.domain()) {
                return Err(DKIMError::DomainMismatch);
            }
        }

        if let Some(expiration) = self.get_tag("x") {
            let expiration: i64 = expiration.parse().map_err(|err| {
                DKIMError::SignatureSyntaxError(format!("invalid \"x\" tag value: {err}"))
            })?;
            let mut expiration = chrono::DateTime::from_timestamp(expiration, 0)
                .ok_or(DKIMError::SignatureExpired)?;
            expiration += chrono::Duration::minutes(SIGN_EXPIRATION_DRIFT_MINS);
            if chrono::Utc::now() > expiration {
                return Err(DKIMError::SignatureExpired);
            }
        }

        Ok(())
    }
}

/// True when `child` equals `parent` or lies under it, on label
/// boundaries.
pub(crate) fn domain_suffix_match(child: &str, parent: &str) -> bool {
    let child = child.trim_end_matches('.').to_ascii_lowercase();
    let parent = parent.trim_end_matches('.').to_ascii_lowercase();
    child == parent || child.ends_with(&format!(".{parent}"))
}

/// Assembles a fresh signature header tag by tag; used by the signer.
#[derive(Clone, Debug)]
pub(crate) struct SignatureHeaderBuilder {
    kind: SignatureKind,
    tags: IndexMap<String, Tag>,
    time: Option<chrono::DateTime<chrono::offset::Utc>>,
}

impl SignatureHeaderBuilder {
    pub(crate) fn new(kind: SignatureKind) -> Self {
        Self {
            kind,
            tags: IndexMap::new(),
            time: None,
        }
    }

    pub(crate) fn add_tag(mut self, name: &str, value: &str) -> Self {
        let tag = Tag {
            name: name.to_owned(),
            value: value.to_owned(),
            raw_value: value.to_owned(),
        };
        self.tags.insert(name.to_owned(), tag);
        self
    }

    pub(crate) fn set_signed_headers(self, headers: &[String]) -> Self {
        let value = headers.join(":");
        self.add_tag("h", &value)
    }

    pub(crate) fn set_time(mut self, time: chrono::DateTime<chrono::offset::Utc>) -> Self {
        self.time = Some(time);
        self.add_tag("t", &time.timestamp().to_string())
    }

    pub(crate) fn set_expiry(self, duration: chrono::Duration) -> Result<Self, DKIMError> {
        let time = self.time.ok_or(DKIMError::BuilderError(
            "set_time must be called prior to calling set_expiry",
        ))?;
        let expiry = (time + duration).timestamp();
        Ok(self.add_tag("x", &expiry.to_string()))
    }

    pub(crate) fn build(self) -> SignatureHeader {
        let mut header = SignatureHeader {
            kind: self.kind,
            tags: self.tags,
            raw_value: String::new(),
        };
        header.raw_value = header.emit(true);
        header
    }
}
