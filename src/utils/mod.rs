//! Utilities
//!
//! Readiness polling, socket helpers, the startup event and logging setup.

pub mod event;
pub mod logging;
pub mod network;
pub mod poll;

pub use event::{Event, StdEvent};
pub use logging::setup_logging;
