//! # gpdirtableload - bulk loader for directory tables
//!
//! Loads a file, or every file below a directory, into a database
//! directory table. Each file becomes one `COPY BINARY` job run by psql;
//! jobs run concurrently on a bounded worker pool that can stop
//! dispatching after the first failure.
//!
//! ## Layout
//!
//! - [`worker`]: the bounded worker pool, independent of what jobs do
//! - [`executor`]: runs a job's command as a child process
//! - [`infrastructure`]: configuration, credentials, logging, signals
//! - [`loader`]: file discovery, COPY commands, the load workflow
//!
//! ## Example
//!
//! ```rust,ignore
//! use gpdirtableload::{DirTableLoader, Environment, LoadConfig, RunContext};
//!
//! let mut config = LoadConfig::new("/data/scans", "public.scans");
//! config.tasks = 4;
//! let summary = DirTableLoader::new(config, Environment::capture(), RunContext::new())
//!     .run()
//!     .await?;
//! println!("loaded {} files", summary.loaded);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod loader;
pub mod worker;

pub use executor::{JobExecutor, ShellConfig, ShellExecutor};
pub use infrastructure::{
    ConnectionTarget, Environment, LoadConfig, RunContext, Severity, init_logging,
};
pub use loader::{DirTableLoader, ExitStatus, LoadError, LoadResult, LoadSummary};
pub use worker::{
    CommandSpec, Job, JobId, JobResult, PoolConfig, PoolError, PoolHandle, WorkerPool,
};

/// Version of the gpdirtableload crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
