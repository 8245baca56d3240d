//! Process bootstrap shared by the commands: config, logging, async runtime
//! and the store connection.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use docsync_archive::redact_uri;
use docsync_core::config::{self, AppConfig, StoreConfig};
use docsync_store::{DocumentStore, MongoStore};
use docsync_sync::{Connector, SyncEngine};

/// Load `path`, or `~/.docsync/config.yaml` when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            config::load_at(&home).with_context(|| {
                format!(
                    "failed to load config; create {}",
                    config::config_path_at(&home).display()
                )
            })
        }
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Drive `future` to completion on a fresh multi-threaded runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    let store = MongoStore::connect(config)
        .await
        .with_context(|| format!("failed to connect to {}", redact_uri(&config.uri)))?;
    Ok(Arc::new(store))
}

pub async fn engine(config: &StoreConfig) -> Result<SyncEngine> {
    let store = connect(config).await?;
    let connector = Connector::new(store, config.database.clone(), config.pool_bounds());
    Ok(SyncEngine::new(connector))
}
