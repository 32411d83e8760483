//! Error taxonomy shared across the rendering core

/// Errors produced by the rendering core.
///
/// Worker threads send these across the response channel as typed values;
/// they never terminate a worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed document or unsupported decoder feature
    #[error("decoder: {0}")]
    Decoder(#[from] mupdf::error::Error),

    /// Decoder-adjacent failure without a mupdf error value
    #[error("decoder: {detail}")]
    Malformed { detail: String },

    /// Invalid item index or tile coordinate
    #[error("out of bounds: {what}")]
    OutOfBounds { what: String },

    /// The worker thread serving the request crashed
    #[error("worker died")]
    WorkerDied,

    /// A request exceeded its deadline
    #[error("timeout after {millis}ms")]
    Timeout { millis: u64 },

    /// The render sequence owning the request was superseded
    #[error("cancelled")]
    Cancelled,

    /// Thumbnail store unreachable; swallowed at the store boundary
    #[error("persistence: {detail}")]
    Persistence { detail: String },

    /// EPUB zip traversal attempt or malformed archive path
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// Render call issued before the document finished loading
    #[error("document not loaded: {id}")]
    NotLoaded { id: String },

    /// Bytes match no supported document format
    #[error("unknown document format")]
    UnknownFormat,
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed { detail: msg.into() }
    }

    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        Self::OutOfBounds { what: msg.into() }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    /// True for failures worth re-requesting through the coordinator.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkerDied | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::WorkerDied.is_retryable());
        assert!(Error::Timeout { millis: 5000 }.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::invalid_path("../x").is_retryable());
    }

    #[test]
    fn display_carries_path() {
        let err = Error::invalid_path("../../etc/passwd");
        assert!(err.to_string().contains("../../etc/passwd"));
    }
}
