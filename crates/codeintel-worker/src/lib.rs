//! # codeintel-worker
//!
//! Turns queued uploads into published dumps.
//!
//! - [`Worker`]: poll loops over the queue with byte budget admission
//! - [`Handler`]: the per-upload sequence (resolve, fetch, correlate or
//!   patch, write, publish, mark dirty)
//! - [`PersistenceWriter`]: transactional bundle writes and publication
//! - Collaborator traits with production and mock implementations:
//!   [`Store`], [`GitserverClient`], [`BundleManagerClient`], [`Correlator`]

pub mod budget;
pub mod bundles;
pub mod correlate;
pub mod error;
pub mod gitserver;
pub mod handler;
pub mod store;
pub mod worker;
pub mod writer;

pub use budget::{BudgetGuard, ByteBudget};
pub use bundles::{BundleManagerClient, BundleManagerError, FsBundleManager, MockBundleManager};
pub use correlate::{
    CommitFiles, CorrelateError, Correlator, JsonCorrelator, PathExistenceChecker, RawBundle,
    RawPackageReference,
};
pub use error::WorkerError;
pub use gitserver::{
    GitserverClient, GitserverError, HttpGitserverClient, HttpGitserverConfig,
    MockGitserverClient,
};
pub use handler::{HandleOutcome, Handler, CLONE_IN_PROGRESS_DELAY_SECS};
pub use store::{MockStore, Store, StoreCall, StoreTransaction};
pub use worker::Worker;
pub use writer::PersistenceWriter;
