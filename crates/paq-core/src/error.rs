//! Engine error type, shared by the scheduler, queues and workers.

use std::path::PathBuf;

/// Error raised by the acquisition engine itself (not by a method subprocess;
/// per-URI method failures are reported through item states instead).
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// No helper binary exists for the requested access method.
    #[error("the method driver for '{access}' could not be found in {dir}")]
    UnknownMethod { access: String, dir: PathBuf },

    /// The helper started but never produced a valid Capabilities message.
    #[error("method '{access}' did not start correctly: {reason}")]
    MethodStartup { access: String, reason: String },

    /// The caller handed us a URI we cannot route to a method.
    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AcquireError>;
