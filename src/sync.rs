//! The convergence loop: list, reconcile, publish, sleep, forever.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::cache::ChartCache;
use crate::config::IndexerConfig;
use crate::generator::{self, IndexGenerator};
use crate::index::{IndexDocument, INDEX_FILE_NAME};
use crate::reconcile::{apply_removals, reconcile};
use crate::store::{self, list_archive_keys, ObjectStore};

/// Why one cycle failed. Each variant names the stage that gave up; every
/// variant sends the loop to sleep, never to exit.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("listing archives failed: {0}")]
    Listing(store::Error),
    #[error("fetching the index document failed: {0}")]
    FetchIndex(store::Error),
    #[error("index document is unreadable: {0}")]
    Index(#[from] serde_yaml::Error),
    #[error("index generation failed: {0}")]
    Generation(#[from] generator::Error),
    #[error("publishing the index failed: {0}")]
    Publish(store::Error),
}

/// What one successful cycle did.
#[derive(Debug, Default, PartialEq)]
pub struct CycleSummary {
    pub added: usize,
    pub removed: usize,
    pub published: bool,
}

/// Drives reconciliation cycles against one store prefix.
///
/// The syncer assumes it is the only writer under the prefix while a cycle
/// runs; a race with an external writer makes one cycle publish a stale view,
/// which the next cycle repairs.
pub struct Syncer {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn IndexGenerator>,
    prefix: String,
    repo_url: Url,
    interval: Duration,
    cache: Option<ChartCache>,
}

impl Syncer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        generator: Arc<dyn IndexGenerator>,
        config: &IndexerConfig,
        cache: Option<ChartCache>,
    ) -> Self {
        Self {
            store,
            generator,
            prefix: config.prefix.clone(),
            repo_url: config.repo_url.clone(),
            interval: config.interval,
            cache,
        }
    }

    fn index_key(&self) -> String {
        format!("{}{}", self.prefix, INDEX_FILE_NAME)
    }

    async fn fetch_index(&self) -> Result<IndexDocument, SyncError> {
        match self.store.get(&self.index_key()).await {
            Ok(data) => Ok(IndexDocument::load(&data)?),
            // A repository that has never been published starts out empty.
            Err(store::Error::NotFound(_)) => Ok(IndexDocument::default()),
            Err(e) => Err(SyncError::FetchIndex(e)),
        }
    }

    /// One full pass: snapshot the store, diff against the published index,
    /// and push the corrected document. Safe to re-run; a quiet cycle is a
    /// no-op end to end.
    pub async fn run_cycle(&self) -> Result<CycleSummary, SyncError> {
        let catalog = list_archive_keys(self.store.as_ref(), &self.prefix)
            .await
            .map_err(SyncError::Listing)?;
        let mut index = self.fetch_index().await?;

        let reconciliation = reconcile(&index, &catalog, &self.prefix);
        log::info!(
            "Adding {} charts and removing {} charts",
            reconciliation.to_add.len(),
            reconciliation.to_remove.len()
        );

        let removed = apply_removals(&mut index, &reconciliation);
        let added = reconciliation.to_add.len();

        if !reconciliation.to_add.is_empty() {
            index = self
                .generate_additions(&index, &catalog, &reconciliation.to_add)
                .await?;
        } else if let Some(cache) = &self.cache {
            // Keep the mirror pruned even on cycles with nothing to add.
            cache.sync(self.store.as_ref(), &catalog).await;
        }

        let published = if reconciliation.is_noop() {
            log::debug!("Index already in sync, nothing to publish");
            false
        } else {
            index.touch_generated();
            self.store
                .put(&self.index_key(), index.dump()?)
                .await
                .map_err(SyncError::Publish)?;
            true
        };

        Ok(CycleSummary {
            added,
            removed,
            published,
        })
    }

    /// Hand the new archives to the generator and adopt its output.
    ///
    /// With a cache directory the generator runs over the full local mirror;
    /// otherwise only the new archives are staged into a throwaway directory
    /// and the prior document is merged in.
    async fn generate_additions(
        &self,
        index: &IndexDocument,
        catalog: &BTreeSet<String>,
        to_add: &BTreeSet<String>,
    ) -> Result<IndexDocument, SyncError> {
        match &self.cache {
            Some(cache) => {
                let staged = cache.sync(self.store.as_ref(), catalog).await;
                log::debug!(
                    "Chart cache: {} fetched, {} pruned, {} errors",
                    staged.fetched,
                    staged.pruned,
                    staged.errors
                );
                Ok(self
                    .generator
                    .generate(cache.directory(), Some(index), &self.repo_url)
                    .await?)
            }
            None => {
                let staging = tempfile::tempdir().map_err(generator::Error::from)?;
                self.stage(to_add, staging.path()).await;
                Ok(self
                    .generator
                    .generate(staging.path(), Some(index), &self.repo_url)
                    .await?)
            }
        }
    }

    /// Download the new archives into the generator's input directory. A
    /// failed download drops that archive from this cycle; it shows up in
    /// `to_add` again next cycle.
    async fn stage(&self, to_add: &BTreeSet<String>, dir: &Path) {
        for key in to_add {
            let name = key.rsplit('/').next().unwrap_or(key);
            log::debug!("Adding {} to index", key);
            if let Err(e) = self.store.fetch_to_path(key, &dir.join(name)).await {
                log::warn!("Failed to fetch {}: {}", key, e);
            }
        }
    }

    /// Drive cycles forever. Failures are logged and retried on the next
    /// tick; nothing that happens inside a cycle terminates the process.
    pub async fn run(&self) {
        loop {
            match self.run_cycle().await {
                Ok(summary) if summary.published => log::info!(
                    "Cycle complete: {} charts added, {} removed",
                    summary.added,
                    summary.removed
                ),
                Ok(_) => log::info!("Cycle complete: index in sync"),
                Err(e) => log::error!("Sync cycle failed: {}", e),
            }
            log::debug!("Sleeping {} seconds", self.interval.as_secs());
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreeset;

    use super::*;
    use crate::charts::ChartId;
    use crate::test_utils::{FakeIndexGenerator, InMemoryObjectStore};

    const PREFIX: &str = "charts/";
    const INDEX_KEY: &str = "charts/index.yaml";

    fn syncer(
        store: Arc<InMemoryObjectStore>,
        generator: Arc<FakeIndexGenerator>,
        cache: Option<ChartCache>,
    ) -> Syncer {
        let config = IndexerConfig::new(
            Some("test-bucket"),
            PREFIX,
            None,
            Duration::from_secs(1),
            None,
            Duration::from_secs(30),
        )
        .unwrap();
        Syncer::new(store, generator, &config, cache)
    }

    fn published_charts(store: &InMemoryObjectStore) -> BTreeSet<ChartId> {
        let data = store.contents(INDEX_KEY).expect("index not published");
        IndexDocument::load(&data)
            .unwrap()
            .charts()
            .map(|(id, _)| id)
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_adds_new_charts() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("charts/app-1.0.0.tgz", b"archive");
        let generator = Arc::new(FakeIndexGenerator::new());

        let summary = syncer(store.clone(), generator.clone(), None)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(
            summary,
            CycleSummary {
                added: 1,
                removed: 0,
                published: true
            }
        );
        assert_eq!(generator.invocations(), 1);
        assert_eq!(
            published_charts(&store),
            btreeset! {ChartId::new("app", "1.0.0")}
        );
    }

    #[tokio::test]
    async fn test_cycle_removes_stale_entries() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut index = IndexDocument::default();
        index.entries.insert(
            "app".to_string(),
            vec![crate::index::IndexEntry {
                name: Some("app".to_string()),
                version: Some("1.0.0".to_string()),
                metadata: serde_yaml::Mapping::new(),
            }],
        );
        store.insert(INDEX_KEY, &index.dump().unwrap());
        let generator = Arc::new(FakeIndexGenerator::new());

        let summary = syncer(store.clone(), generator.clone(), None)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(
            summary,
            CycleSummary {
                added: 0,
                removed: 1,
                published: true
            }
        );
        // Removals never go through the generator.
        assert_eq!(generator.invocations(), 0);
        assert!(published_charts(&store).is_empty());
    }

    #[tokio::test]
    async fn test_quiet_cycle_publishes_nothing() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("charts/app-1.0.0.tgz", b"archive");
        let generator = Arc::new(FakeIndexGenerator::new());
        let syncer = syncer(store.clone(), generator.clone(), None);

        syncer.run_cycle().await.unwrap();
        let puts_after_first = store.put_count();

        let summary = syncer.run_cycle().await.unwrap();
        assert_eq!(
            summary,
            CycleSummary {
                added: 0,
                removed: 0,
                published: false
            }
        );
        assert_eq!(generator.invocations(), 1);
        assert_eq!(store.put_count(), puts_after_first);
    }

    #[tokio::test]
    async fn test_failed_listing_skips_the_cycle() {
        let store = Arc::new(
            InMemoryObjectStore::new()
                .with_page_size(1)
                .failing_on_page(1),
        );
        let mut index = IndexDocument::default();
        index.entries.insert(
            "app".to_string(),
            vec![crate::index::IndexEntry {
                name: Some("app".to_string()),
                version: Some("1.0.0".to_string()),
                metadata: serde_yaml::Mapping::new(),
            }],
        );
        let index_bytes = index.dump().unwrap();
        store.insert(INDEX_KEY, &index_bytes);
        store.insert("charts/app-1.0.0.tgz", b"archive");
        store.insert("charts/other-2.0.0.tgz", b"archive");
        let generator = Arc::new(FakeIndexGenerator::new());

        let result = syncer(store.clone(), generator, None).run_cycle().await;

        assert!(matches!(result, Err(SyncError::Listing(_))));
        // Nothing was removed or republished.
        assert_eq!(store.contents(INDEX_KEY).unwrap(), index_bytes);
    }

    #[tokio::test]
    async fn test_failed_generation_abandons_the_cycle() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("charts/new-2.0.0.tgz", b"archive");
        let mut index = IndexDocument::default();
        index.entries.insert(
            "gone".to_string(),
            vec![crate::index::IndexEntry {
                name: Some("gone".to_string()),
                version: Some("0.1.0".to_string()),
                metadata: serde_yaml::Mapping::new(),
            }],
        );
        let index_bytes = index.dump().unwrap();
        store.insert(INDEX_KEY, &index_bytes);
        let generator = Arc::new(FakeIndexGenerator::failing());

        let result = syncer(store.clone(), generator.clone(), None)
            .run_cycle()
            .await;

        assert!(matches!(result, Err(SyncError::Generation(_))));
        assert_eq!(generator.invocations(), 1);
        // Even the already-computed removal is withheld; the published
        // document is byte-identical to the pre-cycle state.
        assert_eq!(store.contents(INDEX_KEY).unwrap(), index_bytes);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_document_unchanged() {
        let store = Arc::new(InMemoryObjectStore::new().failing_on_put());
        let mut index = IndexDocument::default();
        index.entries.insert(
            "app".to_string(),
            vec![crate::index::IndexEntry {
                name: Some("app".to_string()),
                version: Some("1.0.0".to_string()),
                metadata: serde_yaml::Mapping::new(),
            }],
        );
        let index_bytes = index.dump().unwrap();
        store.insert(INDEX_KEY, &index_bytes);
        let generator = Arc::new(FakeIndexGenerator::new());

        let result = syncer(store.clone(), generator, None).run_cycle().await;

        assert!(matches!(result, Err(SyncError::Publish(_))));
        assert_eq!(store.contents(INDEX_KEY).unwrap(), index_bytes);
    }

    #[tokio::test]
    async fn test_bootstrap_without_existing_index() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("charts/app-1.0.0.tgz", b"archive");
        let generator = Arc::new(FakeIndexGenerator::new());

        syncer(store.clone(), generator, None)
            .run_cycle()
            .await
            .unwrap();
        assert!(store.contents(INDEX_KEY).is_some());
    }

    #[tokio::test]
    async fn test_cache_mode_mirrors_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("charts/app-1.0.0.tgz", b"archive");
        let generator = Arc::new(FakeIndexGenerator::new());
        let cache = ChartCache::new(dir.path()).unwrap();
        let syncer = syncer(store.clone(), generator, Some(cache));

        syncer.run_cycle().await.unwrap();
        assert!(dir.path().join("app-1.0.0.tgz").exists());
        assert_eq!(
            published_charts(&store),
            btreeset! {ChartId::new("app", "1.0.0")}
        );

        store.remove("charts/app-1.0.0.tgz");
        syncer.run_cycle().await.unwrap();
        assert!(!dir.path().join("app-1.0.0.tgz").exists());
        assert!(published_charts(&store).is_empty());
    }

    #[tokio::test]
    async fn test_inert_entry_survives_additions() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("charts/app-1.0.0.tgz", b"archive");
        let mut index = IndexDocument::default();
        index.entries.insert(
            "app".to_string(),
            vec![crate::index::IndexEntry {
                name: Some("app".to_string()),
                version: None,
                metadata: serde_yaml::Mapping::new(),
            }],
        );
        store.insert(INDEX_KEY, &index.dump().unwrap());
        let generator = Arc::new(FakeIndexGenerator::new());

        syncer(store.clone(), generator, None)
            .run_cycle()
            .await
            .unwrap();

        let data = store.contents(INDEX_KEY).unwrap();
        let published = IndexDocument::load(&data).unwrap();
        assert_eq!(
            published_charts(&store),
            btreeset! {ChartId::new("app", "1.0.0")}
        );
        // The versionless entry is carried through untouched.
        assert!(published.entries["app"]
            .iter()
            .any(|entry| entry.version.is_none()));
    }
}
