//! gpdirtableload - load files into a directory table
//!
//! ## Quick Start
//!
//! ```bash
//! # Load one file
//! gpdirtableload --input-file ./report.pdf --table docs
//!
//! # Load a directory with four concurrent psql sessions,
//! # stopping at the first failure
//! gpdirtableload -h mdw -U loader --input-file ./scans --dest-path 2024/scans \
//!     --table docs --tag q3 -T 4 --stop-on-error
//! ```
//!
//! Exit status is 0 on success, 1 on success with warnings and 2 on
//! failure.

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(status) => status.into(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(gpdirtableload::ExitStatus::Failure.code())
        }
    }
}
