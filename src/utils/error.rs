use std::{io, time::Duration};
use thiserror::Error;

#[cfg(feature = "database")]
use crate::db::DbError;

/// Fatal conditions once configuration is loaded. Each one ends the process
/// with a non-zero exit code.
#[derive(Error, Debug)]
pub enum AppError {
    #[cfg(feature = "database")]
    #[error("database: {0}")]
    Database(#[from] DbError),
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("server error: {0}")]
    Listener(#[source] io::Error),
    #[error("server task failed: {0}")]
    ListenerTask(String),
    #[error("server exited without a shutdown request")]
    ListenerExited,
    #[error("drain did not finish within {0:?}")]
    ForcedShutdown(Duration),
}

impl AppError {
    /// Log message for the final record before exit.
    pub fn context(&self) -> &'static str {
        match self {
            #[cfg(feature = "database")]
            AppError::Database(_) => "failed to initialize database",
            AppError::Bind { .. } => "failed to bind listener",
            AppError::Listener(_) | AppError::ListenerTask(_) | AppError::ListenerExited => {
                "server error"
            }
            AppError::ForcedShutdown(_) => "server forced to shutdown",
        }
    }
}
