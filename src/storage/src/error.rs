use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no data for domain {0:?}")]
    NotFound(String),

    #[error("domain {0:?} already exists")]
    AlreadyExists(String),

    #[error("invalid domain name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("offset {offset} is beyond the {len} bytes stored for domain {name:?}")]
    OutOfRange { name: String, offset: u64, len: u64 },

    #[error("metadata store: {0}")]
    Info(#[from] redb::Error),

    #[error("metadata record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("data store: {0}")]
    Data(#[from] opendal::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

macro_rules! from_redb {
    ($($t:ty),*) => {
        $(
            impl From<$t> for StorageError {
                fn from(e: $t) -> Self {
                    StorageError::Info(e.into())
                }
            }
        )*
    };
}

from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

pub type StorageResult<T> = Result<T, StorageError>;
