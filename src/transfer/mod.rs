//! Transfer module for FTP server
//!
//! Data channel setup and the chunked transfer loops, plus the progress
//! reporter shared with the monitor.

pub mod data_channel;
pub mod dir_ops;
pub mod file_ops;
pub mod progress;
pub mod results;

pub use data_channel::{format_pasv, parse_port_args};
pub use file_ops::FileMode;
pub use progress::{Direction, ProgressReporter, TransferStatus};
pub use results::{LoopStatus, TransferKind};
