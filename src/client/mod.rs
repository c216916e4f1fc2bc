//! Client management system
//!
//! Per-connection session state, its mode machine and buffers.

pub mod buffers;
pub mod session;
pub mod state;

/// Process-unique session identifier, never reused.
pub type SessionId = u64;

pub use session::Session;
pub use state::{CloseFlags, SessionFlags, SessionMode};
