//! Shared error types for the memsync core.

use thiserror::Error;

/// Top-level error type for the memory synchronization core.
#[derive(Error, Debug)]
pub enum MemSyncError {
    /// Content was blank after trimming.
    #[error("Cannot save empty memory")]
    EmptyContent,

    /// The graph store could not be reached.
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// Structured-generation output could not be parsed, even after repair.
    #[error("Extraction parse failure: {0}")]
    ExtractionParse(String),

    /// A single entity or relationship could not be written to the graph.
    #[error("Record write failed: {0}")]
    RecordWrite(String),

    /// The source memory node was absent during consolidation transfer.
    #[error("Reconciliation source missing: {0}")]
    ReconciliationSourceMissing(String),

    /// A vector store error occurred.
    #[error("Vector store error: {0}")]
    Vector(String),

    /// A graph store error occurred.
    #[error("Graph store error: {0}")]
    Graph(String),

    /// The text-generation capability failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with MemSyncError.
pub type MemSyncResult<T> = Result<T, MemSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MemSyncError::EmptyContent.to_string(),
            "Cannot save empty memory"
        );
        assert_eq!(
            MemSyncError::StoreUnavailable("connection refused".into()).to_string(),
            "Graph store unavailable: connection refused"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MemSyncError = io.into();
        assert!(matches!(err, MemSyncError::Io(_)));
    }
}
