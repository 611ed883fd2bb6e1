//! Error types with recovery classification.
//!
//! Distinguishes between recoverable conditions (a missing variable, a turn no
//! trigger matched) and faults the process must not continue past (a failed
//! write to the session database).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error from the session store, the engine, or one of their collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A variable, user or location does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No trigger matched, even after replaying buffered context.
    #[error("no trigger matched")]
    NoMatch,

    /// The operation is a known capability gap. Callers must not retry.
    #[error("{0} is currently not possible")]
    Unsupported(&'static str),

    /// A write to durable storage failed. State consistency is no longer
    /// guaranteed, so this is fatal to the process.
    #[error("storage fault during {op}: {source}")]
    StorageFault {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A read from durable storage failed for a reason other than a miss.
    #[error("storage read failed during {op}: {source}")]
    StorageRead {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Caller input was rejected before reaching any collaborator.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The matching engine rejected a rule or failed internally.
    #[error("engine error: {0}")]
    Engine(String),

    /// The geocoding provider could not be reached or returned garbage.
    #[error("geocode error: {0}")]
    Geocode(String),
}

impl Error {
    /// Wrap a failed write.
    pub fn write(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
        move |source| Error::StorageFault { op, source }
    }

    /// Wrap a failed read.
    pub fn read(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
        move |source| Error::StorageRead { op, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NoMatch => ErrorKind::NoMatch,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::StorageFault { .. } => ErrorKind::StorageFault,
            Error::StorageRead { .. } => ErrorKind::StorageRead,
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::Engine(_) => ErrorKind::Engine,
            Error::Geocode(_) => ErrorKind::Geocode,
        }
    }

    /// Check if the process must stop after this error.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Geocode(e.to_string())
    }
}

/// Classification of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing entity - recoverable, often resolved by auto-initialization
    NotFound,
    /// No trigger matched - recoverable, the turn goes to manual review
    NoMatch,
    /// Permanent capability gap - never retry
    Unsupported,
    /// Failed write - fatal
    StorageFault,
    /// Failed read - surfaced to the caller
    StorageRead,
    /// Malformed caller input - report back, never retry as is
    Invalid,
    /// Engine rejected input or a rule
    Engine,
    /// Geocoding provider failure
    Geocode,
}

impl ErrorKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::StorageFault)
    }

    /// Check if business logic is expected to handle this locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::NotFound | ErrorKind::NoMatch)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::NoMatch => write!(f, "No match"),
            ErrorKind::Unsupported => write!(f, "Unsupported"),
            ErrorKind::StorageFault => write!(f, "Storage fault"),
            ErrorKind::StorageRead => write!(f, "Storage read error"),
            ErrorKind::Invalid => write!(f, "Invalid input"),
            ErrorKind::Engine => write!(f, "Engine error"),
            ErrorKind::Geocode => write!(f, "Geocode error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_fault_is_fatal() {
        let fault = Error::StorageFault {
            op: "set_variables",
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(fault.is_fatal());
        assert!(!Error::NoMatch.is_fatal());
        assert!(!Error::NotFound("topic".to_string()).is_fatal());
        assert!(!Error::Unsupported("freeze").is_fatal());
        assert!(!Error::Invalid("empty trigger".to_string()).is_fatal());
        assert!(!Error::StorageRead {
            op: "get_history",
            source: rusqlite::Error::InvalidQuery,
        }
        .is_fatal());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ErrorKind::NotFound.is_recoverable());
        assert!(ErrorKind::NoMatch.is_recoverable());
        assert!(!ErrorKind::Unsupported.is_recoverable());
        assert!(!ErrorKind::StorageFault.is_recoverable());
    }

    #[test]
    fn test_unsupported_message() {
        assert_eq!(
            Error::Unsupported("freeze").to_string(),
            "freeze is currently not possible"
        );
    }
}
