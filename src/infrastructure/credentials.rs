//! Password resolution
//!
//! Passwords come from an interactive prompt, `PGPASSWORD`, or a libpq
//! style password file (`host:port:database:user:password`).

use secrecy::SecretString;
use std::fs;
use std::io;
use std::path::Path;

use super::config::{ConnectionTarget, Environment};

/// Source of interactively entered passwords
pub trait PasswordPrompt: Send + Sync {
    /// Asks for the password of `target`
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal cannot be read.
    fn prompt(&self, target: &ConnectionTarget) -> io::Result<SecretString>;
}

/// Reads the password from the terminal without echoing it
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn message(target: &ConnectionTarget) -> String {
        format!("Password for user {}: ", target.user)
    }
}

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&self, target: &ConnectionTarget) -> io::Result<SecretString> {
        rpassword::prompt_password(Self::message(target)).map(SecretString::from)
    }
}

/// Splits a password file line on unescaped colons.
///
/// A backslash makes the next character literal; a trailing backslash is
/// kept as is.
#[must_use]
pub fn split_pgpass_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut escape = false;

    for c in line.chars() {
        if escape {
            field.push(c);
            escape = false;
        } else if c == '\\' {
            escape = true;
        } else if c == ':' {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    if escape {
        field.push('\\');
    }
    fields.push(field);
    fields
}

fn entry_matches(fields: &[String], target: &ConnectionTarget) -> Option<bool> {
    let [host, port, database, user, ..] = fields else {
        return None;
    };
    if host != "*" && !host.eq_ignore_ascii_case(&target.host) {
        return Some(false);
    }
    if port != "*" && port.trim().parse::<i64>().ok()? != i64::from(target.port) {
        return Some(false);
    }
    if database != "*" && *database != target.database {
        return Some(false);
    }
    if user != "*" && *user != target.user {
        return Some(false);
    }
    Some(true)
}

/// Looks up `target` in password file contents; the first match wins.
///
/// Malformed lines (too few fields, non-numeric port) are skipped.
#[must_use]
pub fn lookup_pgpass(contents: &str, target: &ConnectionTarget) -> Option<SecretString> {
    contents
        .lines()
        .map(split_pgpass_line)
        .find(|fields| fields.len() >= 5 && entry_matches(fields, target) == Some(true))
        .map(|mut fields| SecretString::from(fields.swap_remove(4)))
}

/// Reads `path` and looks up `target`; an unreadable file yields no password
#[must_use]
pub fn read_pgpass(path: &Path, target: &ConnectionTarget) -> Option<SecretString> {
    match fs::read_to_string(path) {
        Ok(contents) => lookup_pgpass(&contents, target),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Password file not readable");
            None
        }
    }
}

/// Resolves the password for `target`.
///
/// With `force_prompt` the user is always asked. Otherwise `PGPASSWORD`
/// is used, then the password file. `None` lets the server decide whether a
/// password is needed.
///
/// # Errors
///
/// Returns an error only if prompting fails.
pub fn resolve_password(
    env: &Environment,
    target: &ConnectionTarget,
    force_prompt: bool,
    prompt: &dyn PasswordPrompt,
) -> io::Result<Option<SecretString>> {
    if force_prompt {
        return prompt.prompt(target).map(Some);
    }
    if let Some(password) = env.get("PGPASSWORD") {
        return Ok(Some(SecretString::from(password.to_string())));
    }
    Ok(read_pgpass(&env.pgpass_file(), target))
}
