pub mod auth;
pub mod request_logger;

pub use auth::{admin_auth, CallerId};
pub use request_logger::request_logger_middleware;
