pub mod config;
pub mod http;
pub mod protocol;
pub mod router;

pub use config::Config;
pub use http::{HttpError, HttpServer};
pub use protocol::{ErrorBody, Request, Response};
pub use router::Router;
