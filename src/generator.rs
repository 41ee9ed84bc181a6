//! The external index generator boundary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use crate::index::{IndexDocument, INDEX_FILE_NAME};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index generator exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("invalid index document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Produces a fresh index document for a directory of chart archives.
///
/// The generator is a black box: it reads each archive's embedded manifest
/// (which this crate never does itself) and emits a document covering exactly
/// the archives in the directory, merged with any prior entries that are not
/// superseded. Malformed archives make it fail loudly, which aborts the
/// addition step for that cycle.
#[async_trait]
pub trait IndexGenerator: Send + Sync {
    async fn generate(
        &self,
        chart_dir: &Path,
        merge_with: Option<&IndexDocument>,
        repo_url: &Url,
    ) -> Result<IndexDocument, Error>;
}

/// Shells out to `helm repo index`.
pub struct HelmIndexGenerator {
    helm_path: PathBuf,
}

impl HelmIndexGenerator {
    pub fn new(helm_path: impl Into<PathBuf>) -> Self {
        Self {
            helm_path: helm_path.into(),
        }
    }
}

impl Default for HelmIndexGenerator {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl IndexGenerator for HelmIndexGenerator {
    async fn generate(
        &self,
        chart_dir: &Path,
        merge_with: Option<&IndexDocument>,
        repo_url: &Url,
    ) -> Result<IndexDocument, Error> {
        let staging = tempfile::tempdir()?;

        let mut command = tokio::process::Command::new(&self.helm_path);
        command
            .arg("repo")
            .arg("index")
            .arg(chart_dir)
            .arg("--url")
            .arg(repo_url.as_str());
        if let Some(prior) = merge_with {
            let merge_path = staging.path().join("previous-index.yaml");
            tokio::fs::write(&merge_path, prior.dump()?).await?;
            command.arg("--merge").arg(&merge_path);
        }

        let output = command.output().await?;
        if !output.status.success() {
            return Err(Error::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        // helm writes its output next to the charts it indexed.
        let data = tokio::fs::read(chart_dir.join(INDEX_FILE_NAME)).await?;
        Ok(IndexDocument::load(&data)?)
    }
}
