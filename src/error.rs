use std::sync::Arc;

use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors surfaced by the core read path and its peripheral collaborators.
///
/// There is no `InvalidRange` variant: an out-of-range read is not an error,
/// it is an empty result (see `assembler::Assembler::read`).
#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("no file registered under '{0}'")]
    NotFound(String),

    #[error("fetch failed for {url} @ offset {offset}: {reason}")]
    Fetch {
        url: Arc<str>,
        offset: u64,
        reason: String,
    },

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        FsError::Io(e.to_string())
    }
}

impl FsError {
    pub fn fetch(url: &Arc<str>, offset: u64, reason: impl Into<String>) -> Self {
        FsError::Fetch {
            url: url.clone(),
            offset,
            reason: reason.into(),
        }
    }

    /// Maps a core error onto the errno the FUSE driver should reply with.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Fetch { .. } => libc::EIO,
            FsError::Registration(_) => libc::EINVAL,
            FsError::Io(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
