//! Error types for the LZ/GLZ image codec.

use crate::protocol::LzImageType;
use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors that can occur while encoding or decoding an image.
///
/// Every variant aborts the codec call that produced it; none of them leave
/// partial output that may be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The output sink could not grant more space.
    #[error("Output space exhausted")]
    OutOfSpace,

    /// The compressed stream is malformed (bad magic/version, truncated data,
    /// out-of-range reference).
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    /// The requested output format cannot be produced from the source format.
    #[error("Unsupported conversion from {from:?} to {to:?}")]
    UnsupportedConversion {
        /// Format of the encoded image.
        from: LzImageType,
        /// Requested output format.
        to: LzImageType,
    },

    /// Dictionary bookkeeping exceeded its configured maximum.
    #[error("Window overflow: {0}")]
    WindowOverflow(String),

    /// A wait for a referenced image was cancelled because the window was
    /// cleared or dropped.
    #[error("Wait for image cancelled")]
    WaitCancelled,

    /// The caller supplied image parameters or lines that violate the buffer
    /// contract.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl CodecError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    /// Returns `true` for the expected-teardown outcome rather than a failure
    /// of the stream itself.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::WaitCancelled)
    }
}
