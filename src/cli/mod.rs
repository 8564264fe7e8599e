//! Command line interface for gpdirtableload
//!
//! Parses the options, sets up logging and signal handling, runs the load
//! and maps the outcome to an exit status.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use futures::FutureExt;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tracing::{error, info};

use gpdirtableload::infrastructure::{
    ConnectionTarget, DEFAULT_MAX_RETRIES, DEFAULT_PORT, DEFAULT_ROLE, Environment,
    LOGFILE_ONLY_TARGET, LoadConfig, RunContext, init_logging, install_signal_handlers,
    log_panics,
};
use gpdirtableload::worker::panic_message;
use gpdirtableload::{DirTableLoader, ExitStatus, LoadError, LoadResult, LoadSummary};

/// CLI arguments for gpdirtableload
#[derive(Parser, Debug)]
#[command(name = "gpdirtableload")]
#[command(version, about = "Load files into a directory table", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Args {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Database to connect to
    #[arg(short = 'd', long, default_value = DEFAULT_ROLE)]
    database: String,

    /// Host to connect to
    #[arg(short = 'h', long, default_value = "localhost")]
    host: String,

    /// Port to connect to
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// User to connect as
    #[arg(short = 'U', long, default_value = DEFAULT_ROLE)]
    user: String,

    /// Path inside the directory table
    #[arg(long)]
    dest_path: Option<String>,

    /// File or directory to load
    #[arg(long)]
    input_file: PathBuf,

    /// Directory table to load into
    #[arg(short = 't', long)]
    table: String,

    /// Tag attached to every loaded file
    #[arg(long)]
    tag: Option<String>,

    /// Maximum number of concurrent loads
    #[arg(short = 'T', long, default_value_t = 1, allow_negative_numbers = true)]
    tasks: i64,

    /// Stop loading after the first failed file
    #[arg(
        long,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    stop_on_error: bool,

    /// Always prompt for the password
    #[arg(
        long,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    force_password_auth: bool,

    /// Log file [default: $HOME/gpAdminLogs/gpdirtableload_YYYYMMDD.log]
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Connection retries on timeout, negative retries forever
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, allow_negative_numbers = true)]
    max_retries: i32,

    /// Verbose output
    #[arg(short = 'V', long)]
    verbose: bool,
}

impl Args {
    fn into_config(self, env: &Environment, today: NaiveDate) -> LoadConfig {
        let logfile = self
            .logfile
            .unwrap_or_else(|| LoadConfig::default_logfile(env, today));
        LoadConfig {
            target: ConnectionTarget {
                host: self.host,
                port: self.port,
                database: self.database,
                user: self.user,
            },
            dest_path: self.dest_path,
            input: self.input_file,
            table: self.table,
            tag: self.tag,
            tasks: self.tasks,
            stop_on_error: self.stop_on_error,
            force_password_auth: self.force_password_auth,
            logfile,
            verbose: self.verbose,
            max_retries: self.max_retries,
        }
    }
}

/// Parse arguments and run the load
pub fn run() -> Result<ExitStatus> {
    let args = Args::parse();
    let env = Environment::capture();
    let config = args.into_config(&env, Local::now().date_naive());

    let _guard = init_logging(&config.logfile, config.verbose)
        .with_context(|| format!("cannot open log file {}", config.logfile.display()))?;
    log_panics();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    Ok(runtime.block_on(execute(config, env)))
}

async fn execute(config: LoadConfig, env: Environment) -> ExitStatus {
    info!("gpdirtableload session started");
    let ctx = RunContext::new();

    let status = match install_signal_handlers(&ctx) {
        Ok(()) => {
            let loader = DirTableLoader::new(config, env, ctx.clone());
            guarded(loader.run()).await
        }
        Err(e) => unexpected(&anyhow::Error::from(e).context("failed to install signal handlers")),
    };

    match status {
        ExitStatus::Success => info!("gpdirtableload succeeded"),
        ExitStatus::Warnings => info!("gpdirtableload succeeded with warnings"),
        ExitStatus::Failure => info!("gpdirtableload failed"),
    }
    status
}

/// Runs the load, turning a panic anywhere in it into a failure
async fn guarded(run: impl Future<Output = LoadResult<LoadSummary>>) -> ExitStatus {
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(outcome) => report(outcome).unwrap_or_else(|e| unexpected(&e)),
        Err(payload) => {
            // The panic hook has already logged the backtrace.
            error!(
                target: LOGFILE_ONLY_TARGET,
                "load panicked: {}",
                panic_message(payload.as_ref())
            );
            error!("unexpected error -- backtrace written to log file");
            ExitStatus::Failure
        }
    }
}

fn report(outcome: LoadResult<LoadSummary>) -> Result<ExitStatus> {
    match outcome {
        Ok(summary) => Ok(summary.exit_status()),
        Err(LoadError::JobFailure { source, .. }) => {
            error!("errors in job:");
            error!("{}", source);
            error!("exiting early");
            Ok(ExitStatus::Failure)
        }
        Err(e @ (LoadError::Io(_) | LoadError::Pool(_))) => Err(e).context("load aborted"),
        Err(e) => {
            error!("{}", e);
            Ok(ExitStatus::Failure)
        }
    }
}

fn unexpected(e: &anyhow::Error) -> ExitStatus {
    error!(
        target: LOGFILE_ONLY_TARGET,
        "{:?}\n{}",
        e,
        Backtrace::force_capture()
    );
    error!("unexpected error -- backtrace written to log file");
    ExitStatus::Failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clap::error::ErrorKind;
    use gpdirtableload::worker::{Job, JobResult};
    use gpdirtableload::{JobExecutor, PoolError};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Arc;

    struct PanickingPsql;

    #[async_trait]
    impl JobExecutor for PanickingPsql {
        async fn execute(&self, _job: &Job) -> JobResult {
            panic!("psql wrapper exploded");
        }
    }

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("gpdirtableload").chain(args.iter().copied()))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--input-file", "/data", "-t", "dt"]).unwrap();
        let env = Environment::from_pairs([("HOME", "/home/gp")]);
        let config = args.into_config(&env, today());

        assert_eq!(config.target.host, "localhost");
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.database, "gpadmin");
        assert_eq!(config.target.user, "gpadmin");
        assert_eq!(config.tasks, 1);
        assert_eq!(config.max_retries, 3);
        assert!(!config.stop_on_error);
        assert!(!config.force_password_auth);
        assert!(!config.verbose);
        assert_eq!(
            config.logfile,
            PathBuf::from("/home/gp/gpAdminLogs/gpdirtableload_20240131.log")
        );
    }

    #[test]
    fn test_short_flags() {
        let args = parse(&[
            "-d", "files", "-h", "mdw", "-p", "6000", "-U", "loader", "-t", "dt", "-T", "4", "-V",
            "--input-file", "/data",
        ])
        .unwrap();
        let config = args.into_config(&Environment::default(), today());

        assert_eq!(config.target.database, "files");
        assert_eq!(config.target.host, "mdw");
        assert_eq!(config.target.port, 6000);
        assert_eq!(config.target.user, "loader");
        assert_eq!(config.tasks, 4);
        assert!(config.verbose);
    }

    #[test]
    fn test_boolish_flags() {
        let args = parse(&["--input-file", "/d", "-t", "dt", "--stop-on-error"]).unwrap();
        assert!(args.stop_on_error);

        let args = parse(&["--input-file", "/d", "-t", "dt", "--stop-on-error", "yes"]).unwrap();
        assert!(args.stop_on_error);

        let args = parse(&["--input-file", "/d", "-t", "dt", "--stop-on-error=off"]).unwrap();
        assert!(!args.stop_on_error);

        let args = parse(&["--force-password-auth", "--input-file", "/d", "-t", "dt"]).unwrap();
        assert!(args.force_password_auth);
    }

    #[test]
    fn test_negative_numbers() {
        let args = parse(&["--input-file", "/d", "-t", "dt", "--max-retries", "-1"]).unwrap();
        assert_eq!(args.max_retries, -1);

        // Accepted by the parser, rejected when the configuration is validated.
        let args = parse(&["--input-file", "/d", "-t", "dt", "-T", "-2"]).unwrap();
        let config = args.into_config(&Environment::default(), today());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_optional_values() {
        let args = parse(&[
            "--input-file", "/d", "-t", "dt", "--dest-path", "a/b", "--tag", "q3", "--logfile",
            "/tmp/load.log",
        ])
        .unwrap();
        let config = args.into_config(&Environment::default(), today());

        assert_eq!(config.dest_path.as_deref(), Some("a/b"));
        assert_eq!(config.tag.as_deref(), Some("q3"));
        assert_eq!(config.logfile, PathBuf::from("/tmp/load.log"));
    }

    #[test]
    fn test_required_arguments() {
        let err = parse(&["-t", "dt"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = parse(&["--input-file", "/d"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["--help"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse(&["-v"]).unwrap_err().kind(), ErrorKind::DisplayVersion);

        let version = parse(&["--version"]).unwrap_err().to_string();
        assert_eq!(version.trim(), "gpdirtableload 1.0.0");
    }

    #[test]
    fn test_invalid_port() {
        let err = parse(&["--input-file", "/d", "-t", "dt", "-p", "notaport"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[tokio::test]
    async fn test_panic_during_connection_is_a_failure() {
        let input = tempfile::tempdir().unwrap();
        fs::write(input.path().join("a.bin"), b"a").unwrap();
        let gphome = tempfile::tempdir().unwrap();
        fs::write(gphome.path().join("greenplum_path.sh"), "").unwrap();
        let home = gphome.path().to_str().unwrap();
        let env = Environment::from_pairs([("GPHOME", home), ("HOME", home)]);

        let loader = DirTableLoader::new(LoadConfig::new(input.path(), "dt"), env, RunContext::new())
            .with_executor(Arc::new(PanickingPsql));
        assert_eq!(guarded(loader.run()).await, ExitStatus::Failure);
    }

    #[tokio::test]
    async fn test_unexpected_errors_are_failures() {
        assert_eq!(guarded(async { Ok(LoadSummary::default()) }).await, ExitStatus::Warnings);
        assert_eq!(
            guarded(async { Err(LoadError::Io("disk full".to_string())) }).await,
            ExitStatus::Failure
        );
        assert_eq!(
            guarded(async { Err(LoadError::Pool(PoolError::NotHalted)) }).await,
            ExitStatus::Failure
        );
    }
}
