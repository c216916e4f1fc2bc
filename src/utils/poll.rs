//! Readiness polling
//!
//! Thin safe wrapper over `poll(2)`. The reactor and every session build a
//! fresh `PollSet` per tick, so registration is just a push.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub const READ: i16 = libc::POLLIN;
pub const URGENT: i16 = libc::POLLPRI;
pub const WRITE: i16 = libc::POLLOUT;

/// Readiness reported for one registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness(i16);

impl Readiness {
    pub fn new(revents: i16) -> Self {
        Readiness(revents)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn readable(self) -> bool {
        self.0 & libc::POLLIN != 0
    }

    pub fn writable(self) -> bool {
        self.0 & libc::POLLOUT != 0
    }

    pub fn urgent(self) -> bool {
        self.0 & libc::POLLPRI != 0
    }

    /// Error, hangup or an invalid descriptor
    pub fn hangup(self) -> bool {
        self.0 & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0
    }

    /// Bits outside of what the server ever asks for
    pub fn unexpected(self) -> bool {
        self.0 & !(libc::POLLIN | libc::POLLPRI | libc::POLLOUT) != 0
    }
}

/// Set of descriptors checked together by a single `poll(2)` call.
#[derive(Debug, Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
        }
    }

    /// Register `fd` for `events` and return its slot.
    pub fn register(&mut self, fd: RawFd, events: i16) -> usize {
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.fds.len() - 1
    }

    /// Wait up to `timeout` and return how many descriptors are ready.
    /// An interrupted wait counts as "nothing ready".
    pub fn poll(&mut self, timeout: Duration) -> io::Result<usize> {
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: the pointer and length describe the vector owned by `self`,
        // which stays alive and unaliased for the duration of the call.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    pub fn readiness(&self, slot: usize) -> Readiness {
        self.fds
            .get(slot)
            .map(|fd| Readiness(fd.revents))
            .unwrap_or_default()
    }
}

/// Poll a single descriptor.
pub fn poll_one(fd: RawFd, events: i16, timeout: Duration) -> io::Result<Readiness> {
    let mut set = PollSet::with_capacity(1);
    let slot = set.register(fd, events);
    set.poll(timeout)?;
    Ok(set.readiness(slot))
}
