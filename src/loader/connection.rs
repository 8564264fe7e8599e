//! Connection check with password prompting and timeout retries

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::copy::LoadCommandBuilder;
use super::errors::{LoadError, LoadResult};
use crate::executor::JobExecutor;
use crate::infrastructure::{DEFAULT_MAX_RETRIES, PasswordPrompt, RunContext};
use crate::worker::Job;

/// Password prompts allowed before giving up: the first one plus ten retries
pub const MAX_PASSWORD_PROMPTS: u32 = 11;

static PASSWORD_REQUIRED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)no password supplied|password authentication failed")
        .expect("static pattern is valid")
});

static TIMED_OUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timed out|timeout expired")
        .expect("static pattern is valid")
});

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server wants a (different) password
    PasswordRequired,
    /// The connection attempt timed out
    Timeout,
    /// Anything else
    Other,
}

/// Classifies the error output of a failed connection attempt
#[must_use]
pub fn classify_failure(message: &str) -> FailureKind {
    if PASSWORD_REQUIRED.is_match(message) {
        FailureKind::PasswordRequired
    } else if TIMED_OUT.is_match(message) {
        FailureKind::Timeout
    } else {
        FailureKind::Other
    }
}

/// Retry policy for timed out connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed; negative retries forever, zero never retries
    pub max_retries: i32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Creates a policy with exponential backoff from 500ms up to 8s
    #[must_use]
    pub fn new(max_retries: i32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    /// Sets both delays
    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Returns true if another retry is allowed after `done` retries
    #[must_use]
    pub fn allows_retry(&self, done: u32) -> bool {
        match u32::try_from(self.max_retries) {
            Ok(max) => done < max,
            Err(_) => true,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

/// Runs the version probe until the database answers.
///
/// On a password failure the user is prompted and the new password is kept
/// in `builder`. Timeouts are retried per `policy`. Returns the server
/// version string.
///
/// # Errors
///
/// `Connection` when the database cannot be reached, `Interrupted` when
/// `ctx` is killed, `Io` if prompting fails.
pub async fn establish_connection(
    executor: &dyn JobExecutor,
    builder: &mut LoadCommandBuilder,
    policy: &RetryPolicy,
    prompt: &dyn PasswordPrompt,
    ctx: &RunContext,
) -> LoadResult<String> {
    let mut retries = 0u32;
    let mut prompts = 0u32;

    loop {
        debug!("connection string: {}", builder.target());
        let probe = Job::new(builder.version_probe());
        let result = tokio::select! {
            result = executor.execute(&probe) => result,
            signum = ctx.killed() => return Err(LoadError::Interrupted(signum)),
        };

        if result.is_success() {
            let version = result.stdout.trim().to_string();
            debug!("Successfully connected to database");
            debug!("database version is: {}", version);
            return Ok(version);
        }

        let message = result.stderr.trim();
        match classify_failure(message) {
            FailureKind::PasswordRequired => {
                if prompts >= MAX_PASSWORD_PROMPTS {
                    return Err(LoadError::Connection(
                        "too many login attempt failures".to_string(),
                    ));
                }
                prompts += 1;
                debug!("password required: {}", message);
                let password = prompt.prompt(builder.target())?;
                builder.set_password(Some(password));
            }
            FailureKind::Timeout if policy.allows_retry(retries) => {
                retries += 1;
                if policy.max_retries < 0 {
                    info!("retry to connect to database.");
                } else {
                    info!(
                        "retry to connect to database, {} of {} times",
                        retries, policy.max_retries
                    );
                }
                let delay = policy.delay_for(retries);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    signum = ctx.killed() => return Err(LoadError::Interrupted(signum)),
                }
            }
            FailureKind::Timeout if retries > 0 => {
                return Err(LoadError::Connection(format!(
                    "could not connect to database after retry {retries} times, error message:\n {message}"
                )));
            }
            FailureKind::Timeout | FailureKind::Other => {
                warn!("connection check failed: {}", message);
                return Err(LoadError::Connection(format!(
                    "could not connect to database: {}. Is the database running on port {}?",
                    message,
                    builder.target().port
                )));
            }
        }
    }
}
