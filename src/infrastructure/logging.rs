//! Logging configuration
//!
//! Every event is written as one line, `timestamp|LEVEL|message`, to stdout
//! and appended to the log file. Level names follow the loader's historic
//! scale `DEBUG|LOG|INFO|WARN|ERROR`.

use chrono::Local;
use std::backtrace::Backtrace;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, registry};

/// Target for events that belong in the log file only (backtraces)
pub const LOGFILE_ONLY_TARGET: &str = "gpdirtableload::logfile";

/// Target whose DEBUG events are written at the `LOG` level
pub const LOG_TARGET: &str = "gpdirtableload::log";

/// `YYYY-MM-DD HH:MM:SS`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Failure
    Error = 1,
    /// Something odd that did not stop the run
    Warn = 2,
    /// Progress
    Info = 3,
    /// Detail
    Log = 4,
    /// Chatter, verbose mode only
    Debug = 5,
}

impl Severity {
    /// Name written to the log
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Log => "LOG",
            Self::Debug => "DEBUG",
        }
    }
}

impl Severity {
    /// Severity of an event, `LOG` only for DEBUG events on [`LOG_TARGET`]
    #[must_use]
    pub fn of(meta: &Metadata<'_>) -> Self {
        if *meta.level() == Level::DEBUG && meta.target() == LOG_TARGET {
            Self::Log
        } else {
            Self::from(meta.level())
        }
    }
}

impl From<&Level> for Severity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO => Self::Info,
            Level::DEBUG | Level::TRACE => Self::Debug,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats events as `timestamp|LEVEL|message`
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeFormat;

impl<S, N> FormatEvent<S, N> for PipeFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{}|{}|",
            Local::now().format(TIMESTAMP_FORMAT),
            Severity::of(event.metadata())
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Keeps the file writer alive; pending lines are flushed when dropped
#[must_use = "dropping the guard stops writing the log file"]
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Initializes logging to stdout and to `logfile`.
///
/// The log directory is created if missing. `verbose` lowers the threshold
/// from INFO to DEBUG and also shows file-only events on the console.
/// `RUST_LOG` overrides the threshold.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or a global subscriber
/// is already installed.
pub fn init_logging(logfile: &Path, verbose: bool) -> io::Result<LoggingGuard> {
    if let Some(dir) = logfile.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(logfile)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let level = if verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = layer()
        .with_ansi(false)
        .event_format(PipeFormat)
        .with_writer(io::stdout)
        .with_filter(filter_fn(move |meta| {
            verbose || meta.target() != LOGFILE_ONLY_TARGET
        }));
    let file = layer()
        .with_ansi(false)
        .event_format(PipeFormat)
        .with_writer(file_writer);

    registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

/// Sends panic reports to the log file, with a backtrace.
///
/// Replaces the default hook, so panics are no longer printed to stderr.
pub fn log_panics() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!(target: LOGFILE_ONLY_TARGET, "{info}\n{backtrace}");
    }));
}
