//! Worker process library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, enqueue, show, list)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    enqueue_upload, init_tracing, list_uploads, load_settings, run_worker, show_upload,
    RunOverrides,
};
