use thiserror::Error;

#[derive(Error, Debug)]
pub enum J2kError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Malformed input
    #[error("Unknown file format")]
    UnknownFormat,
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Truncated data: {0}")]
    Truncated(&'static str),
    #[error("Invalid marker segment {marker:#06X}: {reason}")]
    InvalidMarkerSegment { marker: u16, reason: &'static str },
    #[error("Invalid JP2 box '{box_type}': {reason}")]
    InvalidBox {
        box_type: String,
        reason: &'static str,
    },

    // Feature not handled by this implementation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    // Caller contract violations
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Buffer mismatch: {0}")]
    BufferMismatch(String),
    #[error("Image exceeds DCI profile limits: {0}")]
    CinemaLimits(String),
    #[error("Codec registry already initialized")]
    RegistryInitialized,

    #[error("ICC profile error: {0}")]
    Profile(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Cooperative cancellation raised inside the engine. `Codec` methods
    /// turn it into `Completion::Cancelled` and never return it.
    #[error("Operation cancelled")]
    Cancelled,
}

impl J2kError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidData(reason.into())
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub(crate) fn argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

impl From<lcms2::Error> for J2kError {
    fn from(e: lcms2::Error) -> Self {
        Self::Profile(e.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for J2kError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, J2kError>;
