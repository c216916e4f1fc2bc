//! Error handling
//!
//! Defines error types and reply-text helpers for the FTP server.

pub mod handlers;
pub mod types;

pub use handlers::describe_io;
pub use types::*;
