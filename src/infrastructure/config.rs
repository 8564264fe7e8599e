//! Configuration management
//!
//! [`LoadConfig`] holds the validated options of one load run.
//! [`Environment`] is a snapshot of the process environment so lookups can
//! be tested without touching real variables.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::loader::LoadError;

/// Default PostgreSQL port
pub const DEFAULT_PORT: u16 = 5432;

/// Default database and user
pub const DEFAULT_ROLE: &str = "gpadmin";

/// Connection retries on timeout when not overridden
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Snapshot of environment variables
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Captures the current process environment
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Builds an environment from explicit pairs
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Gets a variable; empty values count as unset
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// `$HOME`, or the current directory
    #[must_use]
    pub fn home(&self) -> PathBuf {
        self.get("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from)
    }

    /// `$PGPASSFILE`, or `$HOME/.pgpass`
    #[must_use]
    pub fn pgpass_file(&self) -> PathBuf {
        self.get("PGPASSFILE")
            .map_or_else(|| self.home().join(".pgpass"), PathBuf::from)
    }

    /// Locates the script that sets up the client environment.
    ///
    /// `GPHOME_LOADERS` wins over `GPHOME`; the chosen script must exist.
    ///
    /// # Errors
    ///
    /// `LoadError::Config` when neither variable is set or the script is
    /// missing.
    pub fn client_env_script(&self) -> Result<PathBuf, LoadError> {
        let script = if let Some(loaders) = self.get("GPHOME_LOADERS") {
            Some(Path::new(loaders).join("greenplum_loaders_path.sh"))
        } else {
            self.get("GPHOME")
                .map(|home| Path::new(home).join("greenplum_path.sh"))
        };

        match script {
            Some(path) if path.is_file() => Ok(path),
            _ => Err(LoadError::Config(
                "cannot find greenplum environment file: environment misconfigured".to_string(),
            )),
        }
    }
}

/// Database coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Host name
    pub host: String,
    /// Port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Role name
    pub user: String,
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user={} host={} port={} database={}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Options of one load run
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Database coordinates
    pub target: ConnectionTarget,
    /// Path inside the directory table
    pub dest_path: Option<String>,
    /// File or directory to load
    pub input: PathBuf,
    /// Directory table name
    pub table: String,
    /// Tag attached to every loaded file
    pub tag: Option<String>,
    /// Maximum concurrent loads
    pub tasks: i64,
    /// Stop dispatching after the first failed load
    pub stop_on_error: bool,
    /// Always prompt for the password
    pub force_password_auth: bool,
    /// Log file
    pub logfile: PathBuf,
    /// Verbose console output
    pub verbose: bool,
    /// Connection retries on timeout; negative retries forever
    pub max_retries: i32,
}

impl LoadConfig {
    /// Creates a configuration with defaults for everything but the input
    /// and the table
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            target: ConnectionTarget {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
                database: DEFAULT_ROLE.to_string(),
                user: DEFAULT_ROLE.to_string(),
            },
            dest_path: None,
            input: input.into(),
            table: table.into(),
            tag: None,
            tasks: 1,
            stop_on_error: false,
            force_password_auth: false,
            logfile: PathBuf::from("gpdirtableload.log"),
            verbose: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// `$HOME/gpAdminLogs/gpdirtableload_YYYYMMDD.log`
    #[must_use]
    pub fn default_logfile(env: &Environment, today: NaiveDate) -> PathBuf {
        env.home()
            .join("gpAdminLogs")
            .join(format!("gpdirtableload_{}.log", today.format("%Y%m%d")))
    }

    /// Checks option combinations.
    ///
    /// # Errors
    ///
    /// `LoadError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.table.trim().is_empty() {
            return Err(LoadError::Config("--table must not be empty".to_string()));
        }
        if self.tasks <= 0 {
            return Err(LoadError::Config(format!(
                "--tasks must be greater than 0, got {}",
                self.tasks
            )));
        }
        if self.target.port == 0 {
            return Err(LoadError::Config("--port must not be 0".to_string()));
        }
        Ok(())
    }

    /// Number of workers for `file_count` files
    #[must_use]
    pub fn worker_count(&self, file_count: usize) -> usize {
        let tasks = usize::try_from(self.tasks).unwrap_or(1).max(1);
        tasks.min(file_count)
    }
}
