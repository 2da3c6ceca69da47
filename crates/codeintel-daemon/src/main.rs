//! Precise code-intelligence worker
//!
//! # Usage
//!
//! ```bash
//! codeintel-worker run [--gitserver-url URL] [--num-handlers N]
//! codeintel-worker enqueue FILE --repository-id ID --commit SHA [--root DIR]
//! codeintel-worker show ID
//! codeintel-worker list
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (platform config dir, or --config)
//! 3. Environment variables (CODEINTEL_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use codeintel_daemon::{
    enqueue_upload, init_tracing, list_uploads, load_settings, run_worker, show_upload, Cli,
    Commands, RunOverrides,
};
use codeintel_types::NewUpload;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_tracing(&settings.log_level)?;

    match cli.command {
        Commands::Run {
            gitserver_url,
            num_handlers,
            maximum_upload_bytes,
        } => {
            let overrides = RunOverrides {
                gitserver_url,
                num_handlers,
                maximum_upload_bytes,
            };
            run_worker(settings, overrides).await?;
        }
        Commands::Enqueue {
            file,
            repository_id,
            commit,
            root,
            indexer,
            patch_base,
        } => {
            let new_upload = NewUpload {
                repository_id,
                commit,
                root,
                indexer,
                upload_size: None,
                patch_base_id: patch_base,
            };
            let id = enqueue_upload(&settings, &file, new_upload).await?;
            println!("Queued upload {}", id);
        }
        Commands::Show { id } => {
            show_upload(&settings, id)?;
        }
        Commands::List => {
            list_uploads(&settings)?;
        }
    }

    Ok(())
}
