//! Server lifecycle
//!
//! `Server` owns the reactor thread. State the reactor shares with other
//! threads lives in [`ServerShared`]: the lifecycle mode, the start time,
//! the bound address, the startup event and the progress reporter.

use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crate::client::SessionId;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::server::reactor;
use crate::transfer::progress::ProgressReporter;
use crate::utils::{Event, StdEvent};

const SERVER_NAME: &str = "pico-ftp-server";

/// Lifecycle of the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMode {
    Invalid = 0,
    Starting = 1,
    Listening = 2,
    Restarting = 3,
    Stopping = 4,
}

impl ServerMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerMode::Starting,
            2 => ServerMode::Listening,
            3 => ServerMode::Restarting,
            4 => ServerMode::Stopping,
            _ => ServerMode::Invalid,
        }
    }
}

/// State visible to both the reactor and the controlling threads.
#[derive(Debug)]
pub struct ServerShared {
    mode: AtomicU8,
    start_time: Mutex<Option<SystemTime>>,
    local_addr: Mutex<Option<SocketAddr>>,
    pub(crate) ready: StdEvent,
    pub(crate) progress: Arc<ProgressReporter>,
    session_ids: AtomicU64,
    pasv_cursor: AtomicU32,
}

impl ServerShared {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(ServerMode::Invalid as u8),
            start_time: Mutex::new(None),
            local_addr: Mutex::new(None),
            ready: StdEvent::new(),
            progress: Arc::new(ProgressReporter::new()),
            session_ids: AtomicU64::new(1),
            pasv_cursor: AtomicU32::new(0),
        }
    }

    pub fn mode(&self) -> ServerMode {
        ServerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub(crate) fn set_mode(&self, mode: ServerMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if another thread changed the mode.
    pub(crate) fn transition(&self, from: ServerMode, to: ServerMode) -> bool {
        self.mode
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_stopping(&self) -> bool {
        self.mode() == ServerMode::Stopping
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn record_start_time(&self) {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(SystemTime::now());
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = addr;
    }

    pub(crate) fn next_session_id(&self) -> SessionId {
        self.session_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Next port of the configured PASV range, cycling back to `min`.
    pub(crate) fn next_pasv_port(&self, min: u16, max: u16) -> u16 {
        let span = u32::from(max - min) + 1;
        let offset = self.pasv_cursor.fetch_add(1, Ordering::Relaxed) % span;
        min + offset as u16
    }
}

impl Default for ServerShared {
    fn default() -> Self {
        Self::new()
    }
}

/// The FTP server: configuration plus the handle of its reactor thread.
pub struct Server {
    config: Arc<ServerConfig>,
    shared: Arc<ServerShared>,
    reactor: Mutex<Option<JoinHandle<Result<(), ServerError>>>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            shared: Arc::new(ServerShared::new()),
            reactor: Mutex::new(None),
        }
    }

    /// Spawn the reactor and wait until it listens or fails.
    pub fn start(&self) -> Result<(), ServerError> {
        self.config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let mut reactor = self.reactor.lock().unwrap_or_else(|e| e.into_inner());
        if reactor.is_some() || !self.shared.transition(ServerMode::Invalid, ServerMode::Starting) {
            return Err(ServerError::AlreadyRunning);
        }

        info!(
            "Starting {} on {} (max {} sessions)",
            SERVER_NAME,
            self.config.control_socket(),
            self.config.max_sessions
        );

        self.shared.ready.reset();
        let config = Arc::clone(&self.config);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("ftp-reactor".into())
            .spawn(move || reactor::run(config, shared))
            .map_err(|e| {
                self.shared.set_mode(ServerMode::Invalid);
                ServerError::Thread(e)
            })?;

        self.shared.ready.wait(None);

        if self.shared.mode() == ServerMode::Listening {
            *reactor = Some(handle);
            return Ok(());
        }

        // The reactor gave up during startup
        let result = join(handle);
        self.shared.set_mode(ServerMode::Invalid);
        match result {
            Ok(()) => Err(ServerError::NotListening),
            Err(e) => {
                error!("Server failed to start: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the reactor and return how it ended. No-op when not running.
    pub fn stop(&self) -> Result<(), ServerError> {
        let handle = self.reactor.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return Ok(());
        };

        info!("Stopping {}", SERVER_NAME);
        self.shared.set_mode(ServerMode::Stopping);
        let result = join(handle);
        self.shared.set_mode(ServerMode::Invalid);
        self.shared.set_local_addr(None);

        match &result {
            Ok(()) => info!("{} stopped", SERVER_NAME),
            Err(e) => warn!("{} stopped with error: {}", SERVER_NAME, e),
        }
        result
    }

    pub fn server_name(&self) -> &'static str {
        SERVER_NAME
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.shared.start_time()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Address the control listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr()
    }

    pub fn progress(&self) -> Arc<ProgressReporter> {
        Arc::clone(&self.shared.progress)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error while dropping server: {}", e);
        }
    }
}

fn join(handle: JoinHandle<Result<(), ServerError>>) -> Result<(), ServerError> {
    handle.join().unwrap_or(Err(ServerError::Panicked))
}
