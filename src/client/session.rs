//! Client session management
//!
//! One `Session` per accepted control connection. Every socket, directory
//! stream and file handle of the session lives here and is only touched by
//! the reactor thread, which calls [`Session::poll`] once per tick.

use log::{debug, info, warn};
use socket2::Socket;
use std::fs::{File, ReadDir};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::client::buffers::{CommandBuffer, StagingBuffer};
use crate::client::state::{CloseFlags, SessionFlags, SessionMode};
use crate::client::SessionId;
use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::protocol::parser;
use crate::protocol::responses::format_response;
use crate::server::core::ServerShared;
use crate::storage::listing::{ListingMode, MlstFacts};
use crate::storage::virtual_to_real_path;
use crate::transfer::data_channel::{self, DataChannel};
use crate::transfer::progress::{Direction, ProgressHandle};
use crate::transfer::results::{LoopStatus, TransferKind};
use crate::transfer::{dir_ops, file_ops};
use crate::utils::network::{close_socket, send_all};
use crate::utils::poll::{PollSet, READ, URGENT, WRITE};

/// State of one FTP client.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) peer: SocketAddr,
    /// Local address of the control connection, used for PASV listeners
    pub(crate) local_ip: Ipv4Addr,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) shared: Arc<ServerShared>,

    /// Working directory (virtual)
    pub(crate) cwd: String,
    /// Directory being listed (virtual)
    pub(crate) lwd: String,

    pub(crate) command: Option<Socket>,
    pub(crate) command_buf: CommandBuffer,
    pub(crate) mode: SessionMode,
    pub(crate) flags: SessionFlags,
    /// Time of the last command
    pub(crate) timestamp: SystemTime,

    pub(crate) pasv: Option<Socket>,
    pub(crate) pasv_addr: Option<SocketAddrV4>,
    /// PORT target
    pub(crate) data_addr: Option<SocketAddrV4>,
    pub(crate) data: DataChannel,
    pub(crate) staging: StagingBuffer,

    pub(crate) dir: Option<ReadDir>,
    pub(crate) listing_mode: ListingMode,
    pub(crate) mlst_facts: MlstFacts,

    pub(crate) file: Option<File>,
    /// Offset into the open file; REST sets it before a transfer starts
    pub(crate) file_pos: u64,
    pub(crate) file_size: u64,
    pub(crate) transfer_name: String,
    pub(crate) rename_from: Option<String>,
    pub(crate) transfer: Option<TransferKind>,
    pub(crate) progress: ProgressHandle,
}

impl Session {
    /// Wrap an accepted control connection and greet the client.
    pub fn new(
        command: Socket,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
        shared: Arc<ServerShared>,
    ) -> Self {
        let local_ip = command
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket_ipv4())
            .map(|addr| *addr.ip())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        let id = shared.next_session_id();
        info!("Session {} accepted connection from {}", id, peer);

        let mut session = Self {
            id,
            peer,
            local_ip,
            command_buf: CommandBuffer::new(config.command_buffer_size),
            staging: StagingBuffer::new(config.transfer_buffer_size),
            config,
            shared,
            cwd: "/".to_string(),
            lwd: "/".to_string(),
            command: Some(command),
            mode: SessionMode::Command,
            flags: SessionFlags::empty(),
            timestamp: SystemTime::now(),
            pasv: None,
            pasv_addr: None,
            data_addr: None,
            data: DataChannel::None,
            dir: None,
            listing_mode: ListingMode::default(),
            mlst_facts: MlstFacts::default(),
            file: None,
            file_pos: 0,
            file_size: 0,
            transfer_name: String::new(),
            rename_from: None,
            transfer: None,
            progress: None,
        };

        session.reply(220, "Hello!");
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Move the state machine to `mode`, closing the channels in `close`.
    ///
    /// `Destroy` releases everything, including the control connection, and
    /// is final. Entering `Command` closes the open file and directory stream
    /// and forgets the transfer.
    pub(crate) fn set_mode(&mut self, mode: SessionMode, close: CloseFlags) {
        if self.mode == SessionMode::Destroy {
            return;
        }

        if mode == SessionMode::Destroy {
            self.mode = mode;
            self.close_pasv();
            self.close_data();
            self.close_file();
            self.dir = None;
            self.transfer = None;
            if let Some(command) = self.command.take() {
                close_socket(command, true);
            }
            info!("Session {} with {} closed", self.id, self.peer);
            return;
        }

        if close.contains(CloseFlags::PASV) {
            self.close_pasv();
        }
        if close.contains(CloseFlags::DATA) {
            self.close_data();
        }

        if mode == SessionMode::Command {
            self.close_file();
            self.dir = None;
            self.transfer = None;
            self.staging.reset();
        }

        debug!("Session {} {} -> {}", self.id, self.mode, mode);
        self.mode = mode;
    }

    /// Record the transfer kind and enter a data mode.
    pub(crate) fn begin_transfer(&mut self, kind: TransferKind, mode: SessionMode, close: CloseFlags) {
        self.transfer = Some(kind);
        self.set_mode(mode, close);
        self.flags.remove(SessionFlags::RECV | SessionFlags::SEND);
        self.flags.insert(match kind.direction() {
            Direction::Sending => SessionFlags::SEND,
            Direction::Receiving => SessionFlags::RECV,
        });
    }

    /// Send `<code> <text>\r\n` on the control connection.
    pub(crate) fn reply(&mut self, code: u16, text: &str) {
        self.reply_raw(&format_response(code, text));
    }

    /// Send preformatted reply text. A failed send destroys the session.
    pub(crate) fn reply_raw(&mut self, text: &str) {
        let Some(command) = self.command.as_ref() else {
            return;
        };

        debug!("Session {} <- {}", self.id, text.trim_end());
        if let Err(e) = send_all(command, text.as_bytes()) {
            warn!("Session {} failed to send reply: {}", self.id, e);
            self.set_mode(SessionMode::Destroy, CloseFlags::NONE);
        }
    }

    /// Real path of a virtual path under the served root.
    pub(crate) fn resolve(&self, virtual_path: &str) -> PathBuf {
        virtual_to_real_path(&self.config.server_root_path(), virtual_path)
    }

    /// Publish the current file offset to the progress reporter.
    pub(crate) fn publish_progress(&mut self) {
        let Some(kind) = self.transfer else {
            return;
        };
        let direction = kind.direction();
        let size = match direction {
            Direction::Sending => self.file_size,
            Direction::Receiving => 0,
        };
        self.shared.progress.publish(
            &mut self.progress,
            self.id,
            &self.transfer_name,
            direction,
            self.file_pos,
            size,
        );
    }

    /// Run one non-blocking step: read pending commands, then service the
    /// data channel if the commands left the mode untouched.
    pub fn poll(&mut self) -> Result<(), SessionError> {
        if matches!(self.mode, SessionMode::Invalid | SessionMode::Destroy) {
            return Ok(());
        }
        let Some(command_fd) = self.command.as_ref().map(AsRawFd::as_raw_fd) else {
            return Err(SessionError::Hangup);
        };

        let mode = self.mode;
        let mut set = PollSet::with_capacity(2);
        let command_slot = set.register(command_fd, READ | URGENT);
        let data_slot = match mode {
            SessionMode::DataConnect if self.flags.contains(SessionFlags::PASV) => self
                .pasv
                .as_ref()
                .map(|listener| set.register(listener.as_raw_fd(), READ)),
            SessionMode::DataConnect => self
                .data
                .socket(self.command.as_ref())
                .map(|socket| set.register(socket.as_raw_fd(), WRITE)),
            SessionMode::DataTransfer => {
                let events = if self.flags.contains(SessionFlags::RECV) {
                    READ
                } else {
                    WRITE
                };
                self.data
                    .socket(self.command.as_ref())
                    .map(|socket| set.register(socket.as_raw_fd(), events))
            }
            _ => None,
        };

        set.poll(Duration::ZERO)?;

        let ready = set.readiness(command_slot);
        if ready.unexpected() {
            debug!("Session {} control readiness {:?}", self.id, ready);
        }
        if ready.hangup() {
            return Err(SessionError::Hangup);
        }
        if ready.readable() || ready.urgent() {
            parser::receive(self, ready.urgent())?;
        }

        if self.mode != mode {
            return Ok(());
        }
        let Some(slot) = data_slot else {
            return Ok(());
        };

        let ready = set.readiness(slot);
        if ready.is_empty() {
            return Ok(());
        }
        if ready.hangup() {
            let text = if mode == SessionMode::DataTransfer {
                "Connection broken during transfer"
            } else {
                "Data connection failed"
            };
            warn!("Session {} data connection: {}", self.id, text);
            self.set_mode(SessionMode::Command, CloseFlags::ALL);
            self.reply(426, text);
            return Ok(());
        }

        match mode {
            SessionMode::DataConnect if ready.readable() => data_channel::accept(self),
            SessionMode::DataConnect if ready.writable() => {
                info!("Session {} data connection established", self.id);
                self.set_mode(SessionMode::DataTransfer, CloseFlags::PASV);
                self.reply(150, "Ready");
            }
            SessionMode::DataTransfer if ready.readable() || ready.writable() => self.run_transfer(),
            _ => {}
        }

        Ok(())
    }

    /// Step the transfer until it would block, ends, or the server stops.
    fn run_transfer(&mut self) {
        while let Some(kind) = self.transfer {
            let status = match kind {
                TransferKind::DirList => dir_ops::list_step(self),
                TransferKind::FileRetrieve => file_ops::retrieve_step(self),
                TransferKind::FileStore => file_ops::store_step(self),
            };
            if status != LoopStatus::Continue || self.shared.is_stopping() {
                break;
            }
        }
    }

    fn close_pasv(&mut self) {
        if let Some(listener) = self.pasv.take() {
            if let Some(addr) = self.pasv_addr {
                debug!("Session {} stopped listening on {}", self.id, addr);
            }
            close_socket(listener, false);
        }
    }

    /// The control connection is left alone when it doubles as the data channel.
    fn close_data(&mut self) {
        if let DataChannel::Socket(socket) = std::mem::take(&mut self.data) {
            close_socket(socket, true);
        }
        self.flags.remove(SessionFlags::RECV | SessionFlags::SEND);
    }

    fn close_file(&mut self) {
        self.shared.progress.finish(&mut self.progress);
        if self.file.take().is_some() {
            debug!("Session {} closed {}", self.id, self.transfer_name);
        }
        self.file_pos = 0;
    }
}
