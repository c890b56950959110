use crate::vfs::VirtualFileRef;
use std::{io, path::PathBuf};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Various errors the incremental engine can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file needed for stamping could not be read. The engine downgrades
    /// this to "changed" for inputs and "removed" for outputs.
    #[error("failed to stamp \"{}\": {source}", .path.display())]
    StampUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Two different source classes claim the same binary class name.
    #[error("inconsistent analysis: binary class name `{binary}` is claimed by `{first}` and `{second}`")]
    InconsistentAnalysis { binary: String, first: String, second: String },
    #[error("compilation failed: {0}")]
    CompileFailed(String),
    #[error("compilation cancelled")]
    Cancelled,
    #[error("invalidation did not settle after {0} cycles")]
    CycleLimitExceeded(usize),
    /// The compiler registered a source twice within one cycle while strict
    /// mode was on.
    #[error("source `{0}` was registered twice within one compile cycle")]
    DoubleStartSource(VirtualFileRef),
    /// The analysis callback was finalized more than once.
    #[error("analysis callback was consumed more than once")]
    DoubleGet,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Error::Message(msg.to_string())
    }

    /// Whether this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
