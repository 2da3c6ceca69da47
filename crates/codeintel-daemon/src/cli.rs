//! CLI argument parsing for the worker process.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Precise code-intelligence worker
///
/// Converts uploaded index bundles into queryable dumps.
#[derive(Parser, Debug)]
#[command(name = "codeintel-worker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process queued uploads until interrupted
    Run {
        /// Override the gitserver base URL
        #[arg(long)]
        gitserver_url: Option<String>,

        /// Override the number of concurrent handlers
        #[arg(long)]
        num_handlers: Option<usize>,

        /// Override the byte budget (0 disables it)
        #[arg(long)]
        maximum_upload_bytes: Option<i64>,
    },

    /// Queue a raw upload file. The worker must not be running.
    Enqueue {
        /// JSON upload to queue
        file: PathBuf,

        #[arg(long)]
        repository_id: i64,

        /// 40-character commit the upload was indexed at
        #[arg(long, value_parser = parse_commit)]
        commit: String,

        /// Directory of the repository the indexer ran in
        #[arg(long, default_value = "")]
        root: String,

        #[arg(long, default_value = "lsif-go")]
        indexer: String,

        /// Completed upload this one patches
        #[arg(long)]
        patch_base: Option<i64>,
    },

    /// Print one upload row as JSON
    Show {
        /// Upload ID
        id: i64,
    },

    /// List every upload row
    List,
}

/// Accept a full 40-character hex commit, lowercased.
fn parse_commit(s: &str) -> Result<String, String> {
    if s.len() != 40 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("expected a 40-character hex commit, got {:?}", s));
    }
    Ok(s.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_overrides() {
        let cli = Cli::parse_from([
            "codeintel-worker",
            "--db-path",
            "/tmp/db",
            "run",
            "--num-handlers",
            "2",
        ]);
        assert_eq!(cli.db_path.as_deref(), Some("/tmp/db"));
        match cli.command {
            Commands::Run {
                num_handlers,
                gitserver_url,
                ..
            } => {
                assert_eq!(num_handlers, Some(2));
                assert!(gitserver_url.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_enqueue() {
        let sha = "DEADBEEF".repeat(5);
        let cli = Cli::parse_from([
            "codeintel-worker",
            "enqueue",
            "upload.json",
            "--repository-id",
            "50",
            "--commit",
            sha.as_str(),
            "--root",
            "root/",
            "--patch-base",
            "10",
        ]);
        match cli.command {
            Commands::Enqueue {
                file,
                repository_id,
                commit,
                root,
                indexer,
                patch_base,
            } => {
                assert_eq!(file, PathBuf::from("upload.json"));
                assert_eq!(repository_id, 50);
                assert_eq!(commit, "deadbeef".repeat(5));
                assert_eq!(root, "root/");
                assert_eq!(indexer, "lsif-go");
                assert_eq!(patch_base, Some(10));
            }
            _ => panic!("Expected Enqueue command"),
        }
    }

    #[test]
    fn test_cli_enqueue_rejects_malformed_commit() {
        let commits = ["deadbeef".to_string(), "g".repeat(40), "a".repeat(41)];
        for commit in &commits {
            let err = Cli::try_parse_from([
                "codeintel-worker",
                "enqueue",
                "upload.json",
                "--repository-id",
                "50",
                "--commit",
                commit.as_str(),
            ])
            .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_global_log_level() {
        let cli = Cli::parse_from(["codeintel-worker", "show", "42", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Show { id: 42 }));
    }
}
