//! Command implementations for the worker process.
//!
//! Handles:
//! - run: Load config, open storage, recover stalled rows, run the worker pool
//! - enqueue: Store a raw upload and queue it
//! - show / list: Inspect upload rows

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use codeintel_storage::Storage;
use codeintel_types::{NewUpload, Settings};
use codeintel_worker::{
    FsBundleManager, Handler, HttpGitserverClient, HttpGitserverConfig, JsonCorrelator, Worker,
};

/// Overrides for `run` taken from the command line.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub gitserver_url: Option<String>,
    pub num_handlers: Option<usize>,
    pub maximum_upload_bytes: Option<i64>,
}

/// Load layered settings and apply global CLI overrides.
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    info!("Opening storage at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path).context("Failed to open storage")?;
    Ok(Arc::new(storage))
}

fn open_bundle_manager(settings: &Settings) -> Result<FsBundleManager> {
    FsBundleManager::new(settings.expanded_upload_dir()).context("Failed to open upload directory")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Run the worker pool until interrupted.
///
/// Rows left processing by an earlier process are returned to the queue
/// before any handler starts.
pub async fn run_worker(mut settings: Settings, overrides: RunOverrides) -> Result<()> {
    if let Some(url) = overrides.gitserver_url {
        settings.gitserver_url = url;
    }
    if let Some(num_handlers) = overrides.num_handlers {
        settings.worker.num_handlers = num_handlers;
    }
    if let Some(bytes) = overrides.maximum_upload_bytes {
        settings.worker.maximum_upload_bytes = bytes;
    }
    settings
        .worker
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid worker settings: {}", e))?;

    info!("Code intelligence worker starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Upload directory: {}", settings.upload_dir);
    info!("  Gitserver: {}", settings.gitserver_url);
    info!("  Handlers: {}", settings.worker.num_handlers);
    info!("  Upload byte budget: {}", settings.worker.maximum_upload_bytes);

    let storage = open_storage(&settings)?;
    let reset = storage
        .reset_stalled(Utc::now())
        .context("Failed to reset stalled uploads")?;
    if reset > 0 {
        info!("Returned {} stalled uploads to the queue", reset);
    }

    let gitserver = HttpGitserverClient::new(HttpGitserverConfig::new(&settings.gitserver_url))
        .context("Failed to create gitserver client")?;
    let bundle_manager = open_bundle_manager(&settings)?;

    let store = Arc::new(Arc::clone(&storage));
    let handler = Handler::new(
        store.clone(),
        Arc::new(bundle_manager),
        Arc::new(gitserver),
        Arc::new(JsonCorrelator::new()),
    );
    let worker = Arc::new(Worker::new(store, handler, settings.worker.clone()));

    let token = CancellationToken::new();
    let shutdown = {
        let token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            token.cancel();
        })
    };

    worker.run(token).await;
    shutdown.abort();

    storage.flush().context("Failed to flush storage")?;
    info!("Code intelligence worker stopped");
    Ok(())
}

/// Store `file` as a raw upload and queue it. Returns the new upload ID.
pub async fn enqueue_upload(settings: &Settings, file: &Path, new_upload: NewUpload) -> Result<i64> {
    let raw = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;

    let storage = open_storage(settings)?;
    let bundle_manager = open_bundle_manager(settings)?;

    let new_upload = NewUpload {
        upload_size: new_upload
            .upload_size
            .or_else(|| i64::try_from(raw.len()).ok()),
        ..new_upload
    };
    let upload = storage
        .insert_upload(new_upload, Utc::now())
        .context("Failed to insert upload")?;
    if let Err(e) = bundle_manager.put_upload(upload.id, &raw).await {
        // A worker that claimed the row meanwhile records the failure itself
        let reason = format!("Failed to store raw upload: {}", e);
        if let Err(abandon) = storage.abandon_upload(upload.id, &reason, Utc::now()) {
            warn!(upload_id = upload.id, error = %abandon, "Failed to abandon upload");
        }
        storage.flush().context("Failed to flush storage")?;
        return Err(e).context("Failed to store raw upload");
    }
    storage.flush().context("Failed to flush storage")?;

    info!(upload_id = upload.id, bytes = raw.len(), "Queued upload");
    Ok(upload.id)
}

/// Print one upload row as JSON.
pub fn show_upload(settings: &Settings, id: i64) -> Result<()> {
    let storage = open_storage(settings)?;
    let upload = storage
        .get_upload(id)
        .context("Failed to read upload")?
        .with_context(|| format!("Upload {} not found", id))?;

    println!("{}", serde_json::to_string_pretty(&upload)?);
    Ok(())
}

/// Print a one-line summary per upload.
pub fn list_uploads(settings: &Settings) -> Result<()> {
    let storage = open_storage(settings)?;
    let uploads = storage.list_uploads().context("Failed to list uploads")?;

    if uploads.is_empty() {
        println!("No uploads");
        return Ok(());
    }
    for upload in uploads {
        println!(
            "{:>6}  {:<10}  repo={} commit={} root={:?} indexer={} failures={}",
            upload.id,
            upload.state.as_str(),
            upload.repository_id,
            upload.commit,
            upload.root,
            upload.indexer,
            upload.num_failures,
        );
    }
    Ok(())
}
