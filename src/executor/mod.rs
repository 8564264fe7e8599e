//! Job execution layer
//!
//! This module contains the execution adapter trait and its process-backed
//! implementation.

mod shell;
mod traits;

pub use shell::{ShellConfig, ShellExecutor};
pub use traits::JobExecutor;
