//! Server core functionality
//!
//! Lifecycle of the server and the reactor thread that drives every session.

pub mod core;
pub mod reactor;

pub use core::{Server, ServerMode, ServerShared};
