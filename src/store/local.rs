use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Error, ListPage, ObjectStore};

/// Filesystem-backed store, mapping object keys to paths under a root
/// directory. Mostly useful for development and tests; the whole "listing"
/// fits in a single page.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(Error::Other(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let key = if rel.is_empty() {
                name
            } else {
                format!("{}/{}", rel, name)
            };
            if entry.file_type()?.is_dir() {
                self.collect_keys(&entry.path(), &key, out)?;
            } else {
                out.push(key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_page(&self, prefix: &str, _page_token: Option<&str>) -> Result<ListPage, Error> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, "", &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(ListPage {
            keys,
            next_page_token: None,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_to_path(&self, key: &str, path: &Path) -> Result<(), Error> {
        let source = self.object_path(key)?;
        match tokio::fs::copy(&source, path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}
