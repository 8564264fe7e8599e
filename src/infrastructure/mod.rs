//! Infrastructure layer
//!
//! Configuration, credentials, logging and signal handling.

mod config;
mod credentials;
mod logging;
mod signals;

pub use config::{
    ConnectionTarget, DEFAULT_MAX_RETRIES, DEFAULT_PORT, DEFAULT_ROLE, Environment, LoadConfig,
};
pub use credentials::{
    PasswordPrompt, TerminalPrompt, lookup_pgpass, read_pgpass, resolve_password, split_pgpass_line,
};
pub use logging::{
    LOG_TARGET, LOGFILE_ONLY_TARGET, LoggingGuard, PipeFormat, Severity, init_logging, log_panics,
};
pub use signals::{RunContext, SIGINT, SIGQUIT, SIGTERM, install_signal_handlers};
