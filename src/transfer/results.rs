//! Transfer result types
//!
//! Outcome of a single transfer step and the kinds of transfer a session
//! can run.

use crate::transfer::progress::Direction;

/// What the session should do after one transfer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Progress was made, step again right away
    Continue,
    /// Socket would block, retry on the next tick
    Exit,
    /// Transfer finished or failed; the session is back in command mode
    Terminal,
}

/// Transfer a session runs once its data channel is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// LIST, NLST, MLSD or STAT with an argument
    DirList,
    /// RETR
    FileRetrieve,
    /// STOR and APPE
    FileStore,
}

impl TransferKind {
    pub fn direction(self) -> Direction {
        match self {
            TransferKind::DirList | TransferKind::FileRetrieve => Direction::Sending,
            TransferKind::FileStore => Direction::Receiving,
        }
    }
}
