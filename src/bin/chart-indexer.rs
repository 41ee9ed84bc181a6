use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use chart_indexer::cache::ChartCache;
use chart_indexer::config::IndexerConfig;
use chart_indexer::generator::HelmIndexGenerator;
use chart_indexer::store::{LocalObjectStore, ObjectStore};
use chart_indexer::sync::Syncer;

#[derive(Parser)]
struct Args {
    #[clap(long, env = "CHART_BUCKET")]
    /// Bucket holding the chart repository.
    bucket: Option<String>,

    #[clap(long, env = "CHART_PREFIX", default_value = "")]
    /// Key prefix of the repository inside the bucket.
    prefix: String,

    #[clap(long, conflicts_with = "bucket")]
    /// Serve objects from a local directory instead of a bucket; requires
    /// --repo-url.
    local_root: Option<PathBuf>,

    #[clap(long, env = "CHART_REPO_URL")]
    /// Public repository URL recorded in generated entries. Defaults to the
    /// bucket's public URL.
    repo_url: Option<url::Url>,

    #[clap(long, env = "SYNC_INTERVAL", default_value = "5")]
    /// Seconds to sleep between reconciliation cycles.
    interval: u64,

    #[clap(long, env = "CHART_CACHE_DIR")]
    /// Directory to mirror chart archives into, used as the generator input.
    cache_dir: Option<PathBuf>,

    #[cfg(feature = "gcs")]
    #[clap(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    /// Service account credentials file; anonymous access when absent.
    credentials: Option<PathBuf>,

    #[clap(long, env = "HELM_PATH", default_value = "helm")]
    /// helm binary used to regenerate the index.
    helm: PathBuf,

    #[clap(long, default_value = "300")]
    /// Seconds before any single remote operation is abandoned.
    operation_timeout: u64,

    #[clap(flatten)]
    logging: chart_indexer::logging::LoggingArgs,
}

async fn build_store(args: &Args, config: &IndexerConfig) -> Result<Arc<dyn ObjectStore>, String> {
    if let Some(root) = &args.local_root {
        let store = LocalObjectStore::new(root)
            .map_err(|e| format!("Failed to open local store root {}: {}", root.display(), e))?;
        return Ok(Arc::new(store));
    }

    let Some(bucket) = config.bucket.clone() else {
        return Err("Either --bucket or --local-root is required".to_string());
    };

    #[cfg(feature = "gcs")]
    {
        let creds = match &args.credentials {
            Some(path) => Some(
                google_cloud_auth::credentials::CredentialsFile::new_from_file(
                    path.display().to_string(),
                )
                .await
                .map_err(|e| format!("Failed to read credentials: {}", e))?,
            ),
            None => None,
        };
        let store = chart_indexer::store::GcsObjectStore::new(
            bucket,
            creds,
            config.operation_timeout,
        )
        .await
        .map_err(|e| format!("Failed to create storage client: {}", e))?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "gcs"))]
    {
        let _ = bucket;
        Err("Built without GCS support; use --local-root".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), i32> {
    let args = Args::parse();

    args.logging.init();

    let config = IndexerConfig::new(
        args.bucket.as_deref(),
        &args.prefix,
        args.repo_url.clone(),
        Duration::from_secs(args.interval),
        args.cache_dir.clone(),
        Duration::from_secs(args.operation_timeout),
    )
    .map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        1
    })?;

    let store = build_store(&args, &config).await.map_err(|e| {
        log::error!("{}", e);
        1
    })?;

    let cache = match &config.cache_dir {
        Some(dir) => Some(ChartCache::new(dir).map_err(|e| {
            log::error!("Failed to set up chart cache at {}: {}", dir.display(), e);
            1
        })?),
        None => None,
    };

    let generator = Arc::new(HelmIndexGenerator::new(&args.helm));

    log::info!("Beginning to index charts at {}", config.repo_url);

    let syncer = Syncer::new(store, generator, &config, cache);
    syncer.run().await;
    Ok(())
}
