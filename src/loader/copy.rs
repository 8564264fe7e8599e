//! `COPY BINARY` statements and the psql commands that run them

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};

use super::files::{InputFiles, InputMode};
use crate::infrastructure::ConnectionTarget;
use crate::worker::CommandSpec;

/// Sources the client environment script (`$0`) and hands the remaining
/// arguments to psql untouched.
const PSQL_WRAPPER: &str = r#". "$0" && exec psql "$@""#;

/// Quotes `value` as an SQL string literal
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `COPY BINARY <table> FROM '<file>' '<dest>' [WITH TAG '<tag>']`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStatement<'a> {
    /// Directory table
    pub table: &'a str,
    /// Absolute path of the file on the client
    pub source: &'a Path,
    /// Path inside the directory table
    pub destination: String,
    /// Optional tag
    pub tag: Option<&'a str>,
}

impl fmt::Display for CopyStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "COPY BINARY {} FROM {} {}",
            self.table,
            quote_literal(&self.source.to_string_lossy()),
            quote_literal(&self.destination)
        )?;
        if let Some(tag) = self.tag {
            write!(f, " WITH TAG {}", quote_literal(tag))?;
        }
        Ok(())
    }
}

/// Where `file` lands inside the directory table.
///
/// A single file goes to `dest_path`, or keeps its file name. Files found
/// in a directory keep their path relative to it, below `dest_path` when
/// one is given.
#[must_use]
pub fn destination_for(input: &InputFiles, file: &Path, dest_path: Option<&str>) -> String {
    match input.mode {
        InputMode::File => dest_path.map_or_else(
            || {
                file.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
            str::to_string,
        ),
        InputMode::Directory => {
            let relative = input
                .relative(file)
                .unwrap_or(file)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            match dest_path.map(|d| d.trim_end_matches('/')) {
                Some(prefix) if !prefix.is_empty() => format!("{prefix}/{relative}"),
                _ => relative,
            }
        }
    }
}

/// Builds psql invocations for one database target
#[derive(Debug, Clone)]
pub struct LoadCommandBuilder {
    env_script: PathBuf,
    target: ConnectionTarget,
    password: Option<SecretString>,
}

impl LoadCommandBuilder {
    /// Creates a builder that sources `env_script` before running psql
    #[must_use]
    pub fn new(env_script: impl Into<PathBuf>, target: ConnectionTarget) -> Self {
        Self {
            env_script: env_script.into(),
            target,
            password: None,
        }
    }

    /// Sets the password passed to psql through `PGPASSWORD`
    pub fn set_password(&mut self, password: Option<SecretString>) {
        self.password = password;
    }

    /// Returns true if a password is set
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Database target
    #[must_use]
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    fn psql(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("sh")
            .args(["-c", PSQL_WRAPPER])
            .arg(self.env_script.to_string_lossy())
            .args(["-X", "-w", "-v", "ON_ERROR_STOP=1"])
            .args(["-d", self.target.database.as_str()])
            .args(["-h", self.target.host.as_str()])
            .arg("-p")
            .arg(self.target.port.to_string())
            .args(["-U", self.target.user.as_str()]);
        if let Some(password) = &self.password {
            spec = spec.env("PGPASSWORD", password.expose_secret());
        }
        spec
    }

    /// Command that runs one `COPY BINARY` statement
    #[must_use]
    pub fn copy_command(&self, statement: &CopyStatement<'_>) -> CommandSpec {
        self.psql()
            .args(["-c".to_string(), statement.to_string()])
            .with_label(statement.source.display().to_string())
    }

    /// Command that checks the connection and prints the server version
    #[must_use]
    pub fn version_probe(&self) -> CommandSpec {
        self.psql()
            .args(["-At", "-c", "SELECT version()"])
            .with_label("connection check")
    }
}
