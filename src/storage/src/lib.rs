#[macro_use]
extern crate async_trait;

pub mod data;
pub mod error;
pub mod info;

pub use data::{DataStore, StateStore};
pub use error::{StorageError, StorageResult};
pub use info::{InfoStore, MetadataStore};

/// MAX_KEY_SIZE is the largest domain name accepted, in bytes.
pub const MAX_KEY_SIZE: usize = 32768;

/// validate_name checks that a domain name can address both a metadata record
/// and a state file of its own.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_KEY_SIZE {
        Some("is too long")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.contains(['/', '\\', '\0']) {
        Some("must not contain '/', '\\' or NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidName {
            name: truncate(name),
            reason,
        }),
        None => Ok(()),
    }
}

fn truncate(name: &str) -> String {
    name.chars().take(64).collect()
}
