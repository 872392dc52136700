//! Daemon-level error taxonomy.

use std::io;

use thiserror::Error;

use crate::hub::HubError;

/// Errors that terminate the daemon or a boot step.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The executable directory could not be discovered; the default
    /// storage root cannot be derived without it.
    #[error("fail to resolve the executable directory")]
    ExecDir,
    /// A command-line value could not be parsed.
    #[error("invalid value for {option}: {value:?}")]
    InvalidArgument {
        option: &'static str,
        value: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Storage(#[from] fs::StorageError),
    #[error(transparent)]
    Hub(#[from] HubError),
}
