//! File transfer operations
//!
//! RETR, STOR and APPE: transfer setup plus the per-chunk retrieve and store
//! steps driven by the session's poll loop.

use log::{debug, info, warn};
use std::io::{self, Read, Write};

use crate::client::{CloseFlags, Session, SessionFlags, SessionMode};
use crate::storage::build_path;
use crate::storage::operations::{open_read, open_write};
use crate::transfer::data_channel;
use crate::transfer::results::{LoopStatus, TransferKind};
use crate::utils::network;

/// How a file transfer opens its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// RETR
    Retrieve,
    /// STOR, honoring a REST offset
    Store,
    /// APPE
    Append,
}

/// Set up a file transfer for `args`.
///
/// Requires an armed PASV listener or PORT target. On success the session
/// waits in `DataConnect` (or is already transferring when a PORT connect
/// completed immediately).
pub(crate) fn start_file_transfer(session: &mut Session, args: &str, mode: FileMode) {
    let path = match build_path(&session.cwd, args) {
        Ok(path) => path,
        Err(e) => {
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(553, &e.to_string());
            return;
        }
    };

    if !session
        .flags
        .intersects(SessionFlags::PASV | SessionFlags::PORT)
    {
        session.set_mode(SessionMode::Command, CloseFlags::ALL);
        session.reply(503, "Bad sequence of commands");
        return;
    }

    let real = session.resolve(&path);
    let opened = match mode {
        FileMode::Retrieve => open_read(&real, session.file_pos),
        FileMode::Store => open_write(&real, session.file_pos, false).map(|f| (f, 0)),
        FileMode::Append => open_write(&real, session.file_pos, true).map(|f| (f, 0)),
    };

    let (file, size) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Session {} failed to open {}: {}", session.id, real.display(), e);
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(450, "failed to open file");
            return;
        }
    };

    let kind = match mode {
        FileMode::Retrieve => TransferKind::FileRetrieve,
        FileMode::Store | FileMode::Append => TransferKind::FileStore,
    };

    info!(
        "Session {} {} {} from offset {}",
        session.id,
        if kind == TransferKind::FileRetrieve { "retrieving" } else { "storing" },
        path,
        session.file_pos
    );

    session.staging.reset();
    session.file = Some(file);
    session.file_size = size;
    session.transfer_name = path;
    session.begin_transfer(kind, SessionMode::DataConnect, CloseFlags::DATA);

    if session.flags.contains(SessionFlags::PORT) {
        if let Err(e) = data_channel::connect(session) {
            debug!("Session {} PORT connect failed: {}", session.id, e);
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(425, "can't open data connection");
        }
    }
}

/// Send the next chunk of the file being retrieved.
pub(crate) fn retrieve_step(session: &mut Session) -> LoopStatus {
    if session.staging.is_drained() {
        let read = match session.file.as_mut() {
            Some(file) => file.read(session.staging.fill_mut()),
            None => Ok(0),
        };

        match read {
            Ok(0) => {
                session.set_mode(SessionMode::Command, CloseFlags::ALL);
                session.reply(226, "OK");
                return LoopStatus::Terminal;
            }
            Ok(n) => {
                session.staging.set_filled(n);
                session.file_pos += n as u64;
                session.publish_progress();
            }
            Err(e) => {
                warn!("Session {} failed to read file: {}", session.id, e);
                session.set_mode(SessionMode::Command, CloseFlags::ALL);
                session.reply(451, "Failed to read file");
                return LoopStatus::Terminal;
            }
        }
    }

    send_pending(session)
}

/// Receive the next chunk and write it to the file being stored.
pub(crate) fn store_step(session: &mut Session) -> LoopStatus {
    if session.staging.is_drained() {
        let received = match session.data.socket(session.command.as_ref()) {
            Some(socket) => network::recv(socket, session.staging.fill_mut()),
            None => Ok(0),
        };

        match received {
            Ok(0) => {
                session.set_mode(SessionMode::Command, CloseFlags::ALL);
                session.reply(226, "OK");
                return LoopStatus::Terminal;
            }
            Ok(n) => session.staging.set_filled(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return LoopStatus::Exit,
            Err(e) => {
                warn!("Session {} failed to receive data: {}", session.id, e);
                session.set_mode(SessionMode::Command, CloseFlags::ALL);
                session.reply(426, "Connection broken during transfer");
                return LoopStatus::Terminal;
            }
        }
    }

    let written = match session.file.as_mut() {
        Some(file) => file.write(session.staging.pending()),
        None => Ok(0),
    };

    match written {
        Ok(n) if n > 0 => {
            session.staging.consume(n);
            session.file_pos += n as u64;
            session.publish_progress();
            LoopStatus::Continue
        }
        result => {
            if let Err(e) = result {
                warn!("Session {} failed to write file: {}", session.id, e);
            }
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(451, "Failed to write file");
            LoopStatus::Terminal
        }
    }
}

/// Flush staged bytes to the data channel. Shared by retrieve and listing.
pub(crate) fn send_pending(session: &mut Session) -> LoopStatus {
    let sent = match session.data.socket(session.command.as_ref()) {
        Some(socket) => network::send(socket, session.staging.pending()),
        None => Ok(0),
    };

    match sent {
        Ok(n) if n > 0 => {
            session.staging.consume(n);
            LoopStatus::Continue
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => LoopStatus::Exit,
        result => {
            match result {
                Err(e) => warn!("Session {} failed to send data: {}", session.id, e),
                Ok(_) => warn!("Session {} data connection reset", session.id),
            }
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(426, "Connection broken during transfer");
            LoopStatus::Terminal
        }
    }
}
