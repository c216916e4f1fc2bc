//! Session state
//!
//! Mode of the per-session state machine and the flag sets it carries.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Not attached to a connection
    #[default]
    Invalid,
    /// Waiting for the next command
    Command,
    /// Waiting for the data connection to be established
    DataConnect,
    /// Moving data over the data connection
    DataTransfer,
    /// Torn down; removed by the reactor on this tick
    Destroy,
}

impl SessionMode {
    /// Whether a transfer is armed or running.
    pub fn is_data(self) -> bool {
        matches!(self, SessionMode::DataConnect | SessionMode::DataTransfer)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionMode::Invalid => "INVALID",
            SessionMode::Command => "COMMAND",
            SessionMode::DataConnect => "DATA_CONNECT",
            SessionMode::DataTransfer => "DATA_TRANSFER",
            SessionMode::Destroy => "DESTROY",
        };
        f.write_str(name)
    }
}

/// Per-session flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags(u8);

impl SessionFlags {
    pub const BINARY: SessionFlags = SessionFlags(1 << 0);
    /// PASV listener armed
    pub const PASV: SessionFlags = SessionFlags(1 << 1);
    /// PORT peer armed
    pub const PORT: SessionFlags = SessionFlags(1 << 2);
    pub const RECV: SessionFlags = SessionFlags(1 << 3);
    pub const SEND: SessionFlags = SessionFlags(1 << 4);
    /// RNFR accepted, RNTO expected next
    pub const RENAME: SessionFlags = SessionFlags(1 << 5);
    /// Urgent data signaled, waiting for the mark
    pub const URGENT: SessionFlags = SessionFlags(1 << 6);

    pub const fn empty() -> Self {
        SessionFlags(0)
    }

    pub fn contains(self, other: SessionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: SessionFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: SessionFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: SessionFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for SessionFlags {
    type Output = SessionFlags;

    fn bitor(self, rhs: SessionFlags) -> SessionFlags {
        SessionFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SessionFlags {
    fn bitor_assign(&mut self, rhs: SessionFlags) {
        self.0 |= rhs.0;
    }
}

/// Channels closed by `Session::set_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseFlags(u8);

impl CloseFlags {
    pub const NONE: CloseFlags = CloseFlags(0);
    pub const PASV: CloseFlags = CloseFlags(1 << 0);
    pub const DATA: CloseFlags = CloseFlags(1 << 1);
    pub const ALL: CloseFlags = CloseFlags(Self::PASV.0 | Self::DATA.0);

    pub fn contains(self, other: CloseFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CloseFlags {
    type Output = CloseFlags;

    fn bitor(self, rhs: CloseFlags) -> CloseFlags {
        CloseFlags(self.0 | rhs.0)
    }
}
