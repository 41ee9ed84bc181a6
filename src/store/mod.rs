//! Object store access and the per-cycle archive catalog.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;

use crate::charts::ARCHIVE_SUFFIX;

mod local;

pub use local::LocalObjectStore;

#[cfg(feature = "gcs")]
mod gcs;

#[cfg(feature = "gcs")]
pub use gcs::GcsObjectStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// One page of a paginated listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Token for the next page; `None` means the listing is complete.
    pub next_page_token: Option<String>,
}

/// Minimal surface the indexer needs from a bucket-like store.
///
/// Keys are opaque `/`-separated strings. Implementations are responsible for
/// bounding every remote operation with a finite timeout.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ListPage, Error>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error>;

    /// Stream an object to `path` without buffering it whole in memory.
    async fn fetch_to_path(&self, key: &str, path: &Path) -> Result<(), Error>;

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error>;
}

/// Fully drain a paginated listing of `prefix` into one catalog snapshot.
///
/// Only archive objects (`.tgz`) are included; the index document itself and
/// any unrelated files under the prefix are not charts. Any page failure
/// fails the whole listing: a partial catalog must never reach
/// reconciliation, where missing keys would read as deletions.
pub async fn list_archive_keys(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<BTreeSet<String>, Error> {
    let mut keys = BTreeSet::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = store.list_page(prefix, page_token.as_deref()).await?;
        keys.extend(
            page.keys
                .into_iter()
                .filter(|key| key.ends_with(ARCHIVE_SUFFIX)),
        );
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    Ok(keys)
}
