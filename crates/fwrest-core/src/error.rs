//! Error taxonomy shared by every core operation

use thiserror::Error;

use crate::device::StoreError;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the streaming write pipeline.
///
/// Every variant is recoverable at the handler boundary; none of them leaves
/// a half-written page behind the point where it was detected.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed request: bad header magic, non-numeric range, body longer
    /// than its declared length
    #[error("Parse error: {0}")]
    Parse(String),

    /// Region outside flash capacity or past the destination partition
    #[error("Bounds error: {0}")]
    Bounds(String),

    /// Transport failed mid-stream, or flash refused an operation
    #[error("I/O error: {0}")]
    Io(String),

    /// Computed digest differs from the digest declared by the image
    #[error("Integrity error: expected {expected}, computed {computed}")]
    Integrity { expected: String, computed: String },

    /// Addressed resource does not exist (or the store is not mounted)
    #[error("Not found: {0}")]
    NotFound(String),

    /// File store operation failed
    #[error("Storage error on '{path}': {source}")]
    Storage {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Target or operation not available on this device
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Another flash-mutating request is in flight
    #[error("Resource busy: {0}")]
    Busy(String),
}

impl CoreError {
    pub fn storage(path: impl Into<String>, source: StoreError) -> Self {
        CoreError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Numeric code reported in error bodies.
    ///
    /// Negative values follow the device firmware conventions; store errors
    /// carry the store's own code.
    pub fn code(&self) -> i32 {
        match self {
            CoreError::Parse(_) => -1,
            CoreError::Bounds(_) => -20,
            CoreError::Io(_) => -17,
            CoreError::Integrity { .. } => -19,
            CoreError::NotFound(_) => -2,
            CoreError::Storage { source, .. } => source.code(),
            CoreError::Unsupported(_) => -38,
            CoreError::Busy(_) => -16,
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Parse(_) => 400,
            CoreError::Bounds(_) => 416,
            CoreError::Io(_) => 500,
            CoreError::Integrity { .. } => 422,
            CoreError::NotFound(_) => 404,
            CoreError::Storage { source, .. } => match source {
                StoreError::NotFound => 404,
                StoreError::Invalid(_) => 400,
                _ => 500,
            },
            CoreError::Unsupported(_) => 501,
            CoreError::Busy(_) => 409,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_keep_store_code() {
        let err = CoreError::storage("www/a.js", StoreError::IsDir);
        assert_eq!(err.code(), -21);
        assert_eq!(err.status_code(), 500);

        let err = CoreError::storage("www/a.js", StoreError::NotFound);
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(CoreError::Parse("x".into()).status_code(), 400);
        assert_eq!(CoreError::Bounds("x".into()).status_code(), 416);
        assert_eq!(CoreError::Io("x".into()).status_code(), 500);
        assert_eq!(
            CoreError::Integrity {
                expected: "00".into(),
                computed: "01".into()
            }
            .status_code(),
            422
        );
    }
}
