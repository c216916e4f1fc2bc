//! FTP Protocol implementation
//!
//! Command framing and dispatch, the verb table, per-verb handlers and
//! reply formatting.

pub mod commands;
pub mod handlers;
pub mod parser;
pub mod responses;

pub use commands::{Verb, lookup};
pub use responses::{format_multiline, format_response};
