use crate::canonicalization::{canon_header_into, Type};
use crate::message::RawHeader;
use base64::engine::general_purpose;
use base64::Engine;
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    RsaSha1,
    RsaSha256,
    Ed25519Sha256,
}

impl HashAlgo {
    pub fn algo_name(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }

    /// Name of the digest half, as it appears in a key record's `h=`.
    pub fn hash_name(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "sha1",
            Self::RsaSha256 | Self::Ed25519Sha256 => "sha256",
        }
    }

    /// Key type this algorithm pairs with, as in a key record's `k=`.
    pub fn key_type(&self) -> &'static str {
        match self {
            Self::RsaSha1 | Self::RsaSha256 => "rsa",
            Self::Ed25519Sha256 => "ed25519",
        }
    }
}

pub(crate) enum HashImpl {
    Sha1(Sha1),
    Sha256(Sha256),
    #[cfg(test)]
    Copy(Vec<u8>),
}

impl HashImpl {
    pub fn from_algo(algo: HashAlgo) -> Self {
        match algo {
            HashAlgo::RsaSha1 => Self::Sha1(Sha1::new()),
            HashAlgo::RsaSha256 | HashAlgo::Ed25519Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    #[cfg(test)]
    pub fn copy_data() -> Self {
        Self::Copy(vec![])
    }

    pub fn hash(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(bytes),
            Self::Sha256(hasher) => hasher.update(bytes),
            #[cfg(test)]
            Self::Copy(data) => data.extend_from_slice(bytes),
        }
    }

    pub fn finalize(self) -> String {
        general_purpose::STANDARD.encode(self.finalize_bytes())
    }

    pub fn finalize_bytes(self) -> Vec<u8> {
        match self {
            Self::Sha1(hasher) => hasher.finalize().to_vec(),
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            #[cfg(test)]
            Self::Copy(data) => data,
        }
    }
}

/// Hasher that stops counting after `limit` bytes, implementing the
/// `l=` body length cap. Bytes beyond the limit are discarded.
pub(crate) struct LimitHasher {
    pub limit: usize,
    pub hashed: usize,
    pub hasher: HashImpl,
}

impl LimitHasher {
    pub fn new(algo: HashAlgo, limit: Option<usize>) -> Self {
        Self {
            hasher: HashImpl::from_algo(algo),
            limit: limit.unwrap_or(usize::MAX),
            hashed: 0,
        }
    }

    /// Seed the hasher with bytes not subject to the body limit; used
    /// by the legacy form where headers and body share one digest.
    pub fn hash_unlimited(&mut self, bytes: &[u8]) {
        self.hasher.hash(bytes);
    }

    pub fn hash(&mut self, bytes: &[u8]) {
        let remain = self.limit - self.hashed;
        let len = bytes.len().min(remain);
        self.hasher.hash(&bytes[..len]);
        self.hashed += len;
    }

    pub fn finalize(self) -> String {
        self.hasher.finalize()
    }

    pub fn finalize_bytes(self) -> Vec<u8> {
        self.hasher.finalize_bytes()
    }
}

pub(crate) fn digest_bytes(algo: HashAlgo, bytes: &[u8]) -> Vec<u8> {
    let mut hasher = HashImpl::from_algo(algo);
    hasher.hash(bytes);
    hasher.finalize_bytes()
}

/// Pick the headers covered by `h=`, in list order. Each name takes
/// the bottom-most occurrence not already used, which is the view the
/// signer had when a header is duplicated. Names listed more often
/// than present contribute nothing.
pub(crate) fn select_headers<'a>(
    signed_names: &[String],
    headers: &'a [RawHeader],
) -> Vec<&'a RawHeader> {
    let mut selected = vec![];
    let num_headers = headers.len();
    let mut last_index: HashMap<&str, usize> = HashMap::new();

    'outer: for name in signed_names {
        let index = *last_index.get(name.as_str()).unwrap_or(&num_headers);
        for (header_index, header) in headers
            .iter()
            .enumerate()
            .rev()
            .skip(num_headers - index)
        {
            if header.is_named(name) {
                selected.push(header);
                last_index.insert(name, header_index);
                continue 'outer;
            }
        }
        last_index.insert(name, 0);
    }

    selected
}

/// Assemble the canonical header stream for one signature: the signed
/// headers in `h=` order, then the signature header itself with its
/// `b=` value blanked, without a trailing CRLF.
pub(crate) fn canonical_headers(
    mode: Type,
    signed_names: &[String],
    headers: &[RawHeader],
    sig_name: &[u8],
    sig_value: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    for header in select_headers(signed_names, headers) {
        canon_header_into(mode, header.name_bytes(), header.value_bytes(), &mut out);
    }

    let mut sig = Vec::new();
    canon_header_into(mode, sig_name, sig_value, &mut sig);
    sig.truncate(sig.len().saturating_sub(2));
    out.extend_from_slice(&sig);
    out
}
