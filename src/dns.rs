use crate::DKIMError;
use futures::future::BoxFuture;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;

/// How the verifier reaches DNS: fetch the TXT records published at
/// `name`. One string per record; a record split into several
/// character-strings is joined without a delimiter, which is how key
/// records longer than 255 octets are published.
pub trait Lookup: Sync + Send {
    fn lookup_txt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<String>, DKIMError>>;
}

/// [`Lookup`] backed by hickory's tokio resolver.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Resolver configured from the host's resolv.conf.
    pub fn new() -> Result<Self, DKIMError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf().map_err(|err| {
            DKIMError::UnknownInternalError(format!("failed to create DNS resolver: {}", err))
        })?;
        Ok(Self { inner })
    }

    /// Wrap an already-configured resolver.
    pub fn from_resolver(inner: TokioAsyncResolver) -> Self {
        Self { inner }
    }
}

impl Lookup for SystemResolver {
    fn lookup_txt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<String>, DKIMError>> {
        Box::pin(async move {
            let answer = self.inner.txt_lookup(name).await.map_err(classify)?;
            let mut records = Vec::new();
            for txt in answer {
                let mut joined = String::new();
                for part in txt.txt_data() {
                    joined.push_str(&String::from_utf8_lossy(part));
                }
                records.push(joined);
            }
            Ok(records)
        })
    }
}

/// A name with no TXT records means no key was published; everything
/// else, timeouts included, is a transient lookup failure.
fn classify(err: ResolveError) -> DKIMError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DKIMError::NoKeyForSignature,
        ResolveErrorKind::Timeout => {
            DKIMError::KeyUnavailable(format!("DNS query timed out: {}", err))
        }
        _ => DKIMError::KeyUnavailable(format!("failed to query DNS: {}", err)),
    }
}
