//! Local mirror of the chart archives backing the index.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::charts::ARCHIVE_SUFFIX;
use crate::store::{self, ObjectStore};

/// Suffix for in-flight downloads; renamed away once the transfer completes.
const STAGING_SUFFIX: &str = ".part";

/// Per-sync accounting, for the cycle log line.
#[derive(Debug, Default, PartialEq)]
pub struct CacheSummary {
    pub fetched: usize,
    pub pruned: usize,
    pub errors: usize,
}

/// Keeps a directory of chart archives mirroring a target key set.
///
/// The mirror is advisory: it exists so the index generator can run over
/// local files instead of fresh downloads, and it can always be rebuilt from
/// the store. Presence is checked by path, not content; archives are
/// immutable once published, so a file that exists is assumed current.
pub struct ChartCache {
    directory: PathBuf,
}

impl ChartCache {
    pub fn new(directory: impl Into<PathBuf>) -> std::io::Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            std::fs::create_dir_all(&directory)?;
        }
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name(key: &str) -> &str {
        key.rsplit('/').next().unwrap_or(key)
    }

    /// Bring the mirror in line with `target`: fetch archives missing
    /// locally, then delete local archives whose key is gone from the target
    /// set.
    ///
    /// Individual fetch failures are logged and skipped so one bad archive
    /// cannot stall the rest; the whole operation is safe to re-run. Pruning
    /// only ever consults the target set passed to this call, and only
    /// touches `.tgz` files.
    pub async fn sync(&self, store: &dyn ObjectStore, target: &BTreeSet<String>) -> CacheSummary {
        let mut summary = CacheSummary::default();

        for key in target {
            let dest = self.directory.join(Self::file_name(key));
            if dest.exists() {
                continue;
            }
            match self.fetch_one(store, key, &dest).await {
                Ok(()) => summary.fetched += 1,
                Err(e) => {
                    log::warn!("Failed to fetch {}: {}", key, e);
                    summary.errors += 1;
                }
            }
        }

        let keep: BTreeSet<&str> = target.iter().map(|key| Self::file_name(key)).collect();
        match self.prune(&keep) {
            Ok(pruned) => summary.pruned = pruned,
            Err(e) => {
                log::warn!("Failed to prune chart cache: {}", e);
                summary.errors += 1;
            }
        }

        summary
    }

    async fn fetch_one(
        &self,
        store: &dyn ObjectStore,
        key: &str,
        dest: &Path,
    ) -> Result<(), store::Error> {
        // Download under a staging name so an interrupted transfer never
        // leaves a file that looks complete.
        let staging = dest.with_extension("tgz.part");
        let fetched = store.fetch_to_path(key, &staging).await;
        if fetched.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        fetched?;
        tokio::fs::rename(&staging, dest).await?;
        Ok(())
    }

    fn prune(&self, keep: &BTreeSet<&str>) -> std::io::Result<usize> {
        let mut pruned = 0;
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            // Abandoned staging files are judged by the archive they were
            // staging for.
            let archive_name = name.strip_suffix(STAGING_SUFFIX).unwrap_or(&name);
            if !archive_name.ends_with(ARCHIVE_SUFFIX) {
                continue;
            }
            if !keep.contains(archive_name) {
                std::fs::remove_file(entry.path())?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}
