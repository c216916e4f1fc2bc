//! pico-ftp-server
//!
//! Single-threaded, poll-driven FTP server engine with passive and active
//! data connections, resumable transfers and a progress feed.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transfer;
pub mod utils;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::Server;
pub use transfer::progress::{Direction, ProgressReporter, TransferStatus};
