//! Error types
//!
//! Defines domain-specific error types for each part of the FTP server.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Startup and reactor failures, surfaced through `Server::start`/`Server::stop`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to poll listen socket: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to spawn reactor thread: {0}")]
    Thread(#[source] io::Error),

    #[error("reactor thread panicked")]
    Panicked,

    #[error("reactor did not reach the listening state")]
    NotListening,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ServerError {
    /// True when the listener poll failed because the network went away.
    /// The reactor restarts instead of exiting in that case.
    pub fn is_network_down(&self) -> bool {
        match self {
            ServerError::Poll(e) => matches!(
                e.raw_os_error(),
                Some(libc::ENETDOWN) | Some(libc::ENETUNREACH)
            ),
            _ => false,
        }
    }
}

/// Conditions that end a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("command buffer overflow")]
    CommandOverflow,

    #[error("peer closed the control connection")]
    PeerClosed,

    #[error("control connection hung up")]
    Hangup,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Would-block is not fatal; the reactor retries on the next tick.
    pub fn is_would_block(&self) -> bool {
        matches!(self, SessionError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

/// Virtual path rejected by `build_path`. Display matches the C library
/// strings so replies read like `553 Invalid argument`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid argument")]
    Invalid,

    #[error("File name too long")]
    NameTooLong,
}

/// PORT argument parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("expected 6 comma separated fields, got {0}")]
    FieldCount(usize),

    #[error("field is not a decimal number: {0:?}")]
    NotNumeric(String),

    #[error("field exceeds 255: {0}")]
    OutOfRange(u32),
}
