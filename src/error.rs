//! Error types for diff and patch operations.

use thiserror::Error;

/// Errors that can occur while computing or applying a delta archive.
#[derive(Error, Debug)]
pub enum DeltaError {
    /// I/O error while reading or writing an archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry which should exist is absent from the archive being read.
    #[error("Missing archive entry: {name}")]
    MissingArchiveEntry {
        /// Name of the absent entry
        name: String,
    },

    /// The content of an entry did not hash to the expected digest value.
    #[error("Wrong message digest for archive entry: {name}")]
    WrongMessageDigest {
        /// Name of the offending entry
        name: String,
    },

    /// The base archive is not the one the delta archive was computed against.
    #[error("Wrong base archive: {0}")]
    WrongBaseArchive(#[source] Box<DeltaError>),

    /// The delta archive is corrupt, foreign or lacks its model.
    #[error("Invalid delta archive: {0}")]
    InvalidDeltaArchive(#[source] Box<DeltaError>),

    /// The named digest algorithm is not available.
    #[error("Unsupported message digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The digest algorithm cannot produce values of the requested length.
    #[error("Unsupported digest length {length} for algorithm {algorithm}")]
    UnsupportedDigestLength {
        /// Canonical algorithm name
        algorithm: String,
        /// Requested length in bytes
        length: usize,
    },

    /// A delta model violates one of its invariants.
    #[error("Invalid delta model: {0}")]
    InvalidModel(String),

    /// The update archive carries a payload entry under the reserved metadata name.
    #[error("Entry name is reserved for the delta model: {0}")]
    ReservedEntryName(String),

    /// The delta model document could not be encoded or decoded.
    #[error("Delta model document error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeltaError {
    /// Wraps this error as a base archive failure.
    pub fn wrong_base(self) -> Self {
        DeltaError::WrongBaseArchive(Box::new(self))
    }

    /// Wraps this error as a delta archive failure.
    pub fn invalid_delta(self) -> Self {
        DeltaError::InvalidDeltaArchive(Box::new(self))
    }

    /// True if the caller should fetch another base archive.
    pub fn is_base_failure(&self) -> bool {
        matches!(self, DeltaError::WrongBaseArchive(_))
    }

    /// True if the caller should fetch or regenerate the delta archive.
    pub fn is_delta_failure(&self) -> bool {
        matches!(
            self,
            DeltaError::InvalidDeltaArchive(_) | DeltaError::UnsupportedAlgorithm(_)
        )
    }
}

/// Result type for delta operations.
pub type Result<T> = std::result::Result<T, DeltaError>;
