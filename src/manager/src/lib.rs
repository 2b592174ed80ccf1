pub mod domain;
pub mod error;
pub mod flusher;
pub mod manager;
pub mod options;

pub use domain::DomainState;
pub use error::{Error, ErrorKind, Result};
pub use flusher::Flusher;
pub use manager::{FlushReport, Manager};
pub use options::{ManagerOptions, MIN_SAVE_THRESHOLD};
