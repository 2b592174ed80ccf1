use std::io;

use skizze_sketches::SketchError;
use skizze_storage::StorageError;
use thiserror::Error;

/// ErrorKind is the stable classification of an Error, the part callers
/// outside the process get to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DomainNotFound,
    DomainAlreadyExists,
    InvalidMethod,
    InvalidRequest,
    NotSupported,
    StorageFailure,
    SerializationFailure,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DomainNotFound => "DOMAIN_NOT_FOUND",
            ErrorKind::DomainAlreadyExists => "DOMAIN_ALREADY_EXISTS",
            ErrorKind::InvalidMethod => "INVALID_METHOD",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::NotSupported => "NOT_SUPPORTED",
            ErrorKind::StorageFailure => "STORAGE_FAILURE",
            ErrorKind::SerializationFailure => "SERIALIZATION_FAILURE",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("domain {0:?} not found")]
    DomainNotFound(String),

    #[error("domain {0:?} already exists")]
    DomainAlreadyExists(String),

    #[error("invalid method {0}")]
    InvalidMethod(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{op} is not supported by sketch type {sketch_type:?}")]
    NotSupported {
        sketch_type: String,
        op: &'static str,
    },

    #[error("storage failure: {0}")]
    Storage(#[source] StorageError),

    /// the state blob of a domain exists but cannot be decoded.
    #[error("state of domain {name:?} cannot be reconstructed: {source}")]
    CorruptState {
        name: String,
        #[source]
        source: SketchError,
    },

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DomainNotFound(_) => ErrorKind::DomainNotFound,
            Error::DomainAlreadyExists(_) => ErrorKind::DomainAlreadyExists,
            Error::InvalidMethod(_) => ErrorKind::InvalidMethod,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::NotSupported { .. } => ErrorKind::NotSupported,
            // a domain that cannot be reconstructed is lost storage, not a bad request
            Error::Storage(_) | Error::CorruptState { .. } => ErrorKind::StorageFailure,
            Error::Serialization(_) => ErrorKind::SerializationFailure,
        }
    }

    pub(crate) fn task(e: tokio::task::JoinError) -> Self {
        Error::Storage(StorageError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AlreadyExists(name) => Error::DomainAlreadyExists(name),
            e @ StorageError::InvalidName { .. } => Error::InvalidRequest(e.to_string()),
            StorageError::Codec(e) => Error::Serialization(e.to_string()),
            e => Error::Storage(e),
        }
    }
}

impl From<SketchError> for Error {
    fn from(e: SketchError) -> Self {
        match e {
            SketchError::NotSupported { sketch_type, op } => Error::NotSupported { sketch_type, op },
            e @ (SketchError::UnknownType(_) | SketchError::InvalidPrecision(_)) => {
                Error::InvalidRequest(e.to_string())
            }
            e @ SketchError::Corrupt(_) => Error::Serialization(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use skizze_sketches::SketchError;
    use skizze_storage::StorageError;

    use crate::error::{Error, ErrorKind};

    #[test]
    fn test_kinds() {
        let e: Error = StorageError::AlreadyExists("x".into()).into();
        assert_eq!(e.kind(), ErrorKind::DomainAlreadyExists);

        let e: Error = StorageError::OutOfRange {
            name: "x".into(),
            offset: 1,
            len: 0,
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::StorageFailure);

        let e: Error = SketchError::NotSupported {
            sketch_type: "hllpp".into(),
            op: "remove",
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
        assert_eq!(e.kind().code(), "NOT_SUPPORTED");

        let e = Error::CorruptState {
            name: "x".into(),
            source: SketchError::Corrupt("bad".into()),
        };
        assert_eq!(e.kind(), ErrorKind::StorageFailure);
    }
}
