//! Startup configuration. Everything here is validated once, before the
//! first cycle; a bad value is fatal and the process exits non-zero.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(&'static str),
    #[error("invalid repository URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Bucket holding the chart repository, when using a remote store.
    pub bucket: Option<String>,
    /// Key prefix of the repository inside the store, normalized to end in
    /// `/` (or empty for the root).
    pub prefix: String,
    /// Public base URL recorded in generated index entries.
    pub repo_url: Url,
    /// Pause between reconciliation cycles.
    pub interval: Duration,
    /// Optional persistent mirror of the chart archives.
    pub cache_dir: Option<PathBuf>,
    /// Upper bound for any single remote operation.
    pub operation_timeout: Duration,
}

impl IndexerConfig {
    pub fn new(
        bucket: Option<&str>,
        prefix: &str,
        repo_url: Option<Url>,
        interval: Duration,
        cache_dir: Option<PathBuf>,
        operation_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let bucket = bucket.filter(|b| !b.is_empty()).map(str::to_string);
        let prefix = normalize_prefix(prefix);
        let repo_url = match (repo_url, &bucket) {
            (Some(url), _) => url,
            (None, Some(bucket)) => public_bucket_url(bucket, &prefix)?,
            (None, None) => return Err(ConfigError::Missing("a bucket or a repository URL")),
        };
        if operation_timeout.is_zero() {
            return Err(ConfigError::Invalid("operation timeout must be positive"));
        }
        Ok(Self {
            bucket,
            prefix,
            repo_url,
            interval,
            cache_dir,
            operation_timeout,
        })
    }
}

/// Collapse a prefix to `""` or a string with exactly one trailing slash, so
/// keys can be built by plain concatenation.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Where anonymous clients fetch the published charts from; handed to the
/// generator as `--url` so entry URLs resolve publicly.
fn public_bucket_url(bucket: &str, prefix: &str) -> Result<Url, url::ParseError> {
    format!("https://storage.googleapis.com/{}/{}", bucket, prefix).parse()
}
