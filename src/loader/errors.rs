//! Error types for the load workflow

use thiserror::Error;

use crate::worker::PoolError;

/// Errors that end a load run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Invalid options or environment
    #[error("{0}")]
    Config(String),

    /// The database could not be reached
    #[error("{0}")]
    Connection(String),

    /// The input path cannot be loaded
    #[error("{0}")]
    Input(String),

    /// One or more files failed to load
    #[error("failed to load files into {table}: {source}")]
    JobFailure {
        /// Directory table being loaded
        table: String,
        /// Aggregate failure reported by the pool
        source: PoolError,
    },

    /// Worker pool misuse or misconfiguration
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),

    /// The run was stopped by a signal
    #[error("interrupted by signal {0}")]
    Interrupted(i32),
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience alias for load results
pub type LoadResult<T> = Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::JobId;

    #[test]
    fn test_job_failure_message_includes_pool_error() {
        let err = LoadError::JobFailure {
            table: "dir_table".to_string(),
            source: PoolError::PartialFailure {
                failed: 1,
                total: 4,
                job_id: JobId::new(),
                exit_code: 1,
                stderr: "ERROR:  relation \"dir_table\" does not exist".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.starts_with("failed to load files into dir_table: 1 of 4 jobs failed"));
        assert!(message.contains("does not exist"));
    }

    #[test]
    fn test_io_conversion() {
        let err: LoadError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err, LoadError::Io("gone".to_string()));
    }

    #[test]
    fn test_pool_conversion() {
        let err: LoadError = PoolError::NotHalted.into();
        assert!(matches!(err, LoadError::Pool(PoolError::NotHalted)));
    }
}
