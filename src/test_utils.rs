//! Shared fakes for exercising the sync pipeline without a real bucket or a
//! helm binary on the path.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::charts::{ChartId, ARCHIVE_SUFFIX};
use crate::generator::{self, IndexGenerator};
use crate::index::{IndexDocument, IndexEntry};
use crate::store::{Error, ListPage, ObjectStore};

/// Object store backed by a map, with a configurable page size and an
/// optional page index that always fails, for pagination and partial-listing
/// tests.
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    fail_on_page: Option<usize>,
    fail_puts: bool,
    puts: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: 1000,
            fail_on_page: None,
            fail_puts: false,
            puts: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn failing_on_page(mut self, page: usize) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    /// Make every write fail, for publish-failure tests.
    pub fn failing_on_put(mut self) -> Self {
        self.fail_puts = true;
        self
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Number of `put` calls observed, for no-publish assertions.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ListPage, Error> {
        let page: usize = page_token.map(|token| token.parse().unwrap()).unwrap_or(0);
        if self.fail_on_page == Some(page) {
            return Err(Error::ServiceUnavailable);
        }
        let objects = self.objects.lock().unwrap();
        let matching: Vec<&String> = objects.keys().filter(|key| key.starts_with(prefix)).collect();
        let start = page * self.page_size;
        let keys: Vec<String> = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|key| key.to_string())
            .collect();
        let next_page_token = if start + self.page_size < matching.len() {
            Some((page + 1).to_string())
        } else {
            None
        };
        Ok(ListPage {
            keys,
            next_page_token,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        self.contents(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn fetch_to_path(&self, key: &str, path: &Path) -> Result<(), Error> {
        let data = self.get(key).await?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        if self.fail_puts {
            return Err(Error::ServiceUnavailable);
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }
}

/// Generator that derives entries from the archive filenames in the input
/// directory, honoring the merge contract without shelling out to helm.
pub struct FakeIndexGenerator {
    invocations: AtomicUsize,
    fail: bool,
}

impl FakeIndexGenerator {
    pub fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Generator that always reports failure, as helm does on a malformed
    /// archive.
    pub fn failing() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexGenerator for FakeIndexGenerator {
    async fn generate(
        &self,
        chart_dir: &Path,
        merge_with: Option<&IndexDocument>,
        _repo_url: &Url,
    ) -> Result<IndexDocument, generator::Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(generator::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "generator rejected the archives",
            )));
        }
        let mut document = merge_with.cloned().unwrap_or_default();
        for entry in std::fs::read_dir(chart_dir)? {
            let entry = entry?;
            let file_name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !file_name.ends_with(ARCHIVE_SUFFIX) {
                continue;
            }
            let Some(id) = ChartId::from_archive_key(&file_name, "") else {
                continue;
            };
            let superseded = document.charts().any(|(existing, _)| existing == id);
            if superseded {
                continue;
            }
            document
                .entries
                .entry(id.name.clone())
                .or_default()
                .push(IndexEntry {
                    name: Some(id.name),
                    version: Some(id.version),
                    metadata: serde_yaml::Mapping::new(),
                });
        }
        Ok(document)
    }
}
