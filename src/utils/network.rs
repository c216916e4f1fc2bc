//! Network utilities
//!
//! Socket option tuning, urgent-data helpers and the close routine shared by
//! listeners, data connections and control connections.

use log::{debug, warn};
use socket2::Socket;
use std::io;
use std::mem::MaybeUninit;
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::time::Duration;

use crate::utils::poll::{READ, poll_one};

/// How long a graceful close waits for the peer to acknowledge shutdown.
const GRACEFUL_CLOSE_WAIT: Duration = Duration::from_millis(250);

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Widen the send and receive buffers of a data socket.
pub fn increase_buffers(socket: &Socket, size: usize) -> io::Result<()> {
    socket.set_recv_buffer_size(size)?;
    socket.set_send_buffer_size(size)?;
    Ok(())
}

/// Send without raising SIGPIPE on a reset connection.
pub fn send(socket: &Socket, buf: &[u8]) -> io::Result<usize> {
    socket.send_with_flags(buf, SEND_FLAGS)
}

/// Send the whole buffer, retrying short writes.
pub fn send_all(socket: &Socket, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match send(socket, buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Receive into `buf`.
pub fn recv(socket: &Socket, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `u8` and `MaybeUninit<u8>` share a layout, and `recv` only
    // ever writes initialized bytes into the slice.
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    socket.recv(uninit)
}

/// Read the single out-of-band byte waiting at the urgent mark.
pub fn recv_urgent_byte(socket: &Socket) -> io::Result<Option<u8>> {
    let mut byte = [MaybeUninit::<u8>::uninit(); 1];
    let n = socket.recv_out_of_band(&mut byte)?;
    // SAFETY: `recv` initialized the first `n` bytes.
    Ok((n == 1).then(|| unsafe { byte[0].assume_init() }))
}

/// Whether the read position sits at the urgent mark.
pub fn at_urgent_mark(socket: &Socket) -> io::Result<bool> {
    unsafe extern "C" {
        fn sockatmark(fd: libc::c_int) -> libc::c_int;
    }

    // SAFETY: the descriptor is owned by `socket` and valid for this call.
    let rc = unsafe { sockatmark(socket.as_raw_fd()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc == 1)
}

/// A non-blocking connect that has not finished yet.
pub fn is_connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

/// Close a socket.
///
/// A graceful close shuts down the write half and gives the peer a short
/// window to close its side before the descriptor is aborted with linger 0.
/// Listeners are closed without the shutdown step.
pub fn close_socket(socket: Socket, graceful: bool) {
    if graceful {
        match socket.peer_addr().ok().and_then(|a| a.as_socket()) {
            Some(peer) => debug!("Closing connection to {}", peer),
            None => debug!("Closing connection fd={}", socket.as_raw_fd()),
        }

        match socket.shutdown(Shutdown::Write) {
            Ok(()) => {
                if let Err(e) = poll_one(socket.as_raw_fd(), READ, GRACEFUL_CLOSE_WAIT) {
                    warn!("Failed to wait for peer shutdown: {}", e);
                }
            }
            Err(e) => debug!("Failed to shut down socket: {}", e),
        }
    }

    if let Err(e) = socket.set_linger(Some(Duration::ZERO)) {
        debug!("Failed to set linger on close: {}", e);
    }
    drop(socket);
}
