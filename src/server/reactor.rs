//! Reactor loop
//!
//! Single thread that owns the control listener and every session. Each tick
//! polls the listener, accepts at most one connection, gives every session
//! one non-blocking step and drops the destroyed ones.

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{CloseFlags, Session, SessionMode};
use crate::config::ServerConfig;
use crate::error::{ServerError, SessionError};
use crate::protocol::responses::format_response;
use crate::server::core::{ServerMode, ServerShared};
use crate::utils::Event;
use crate::utils::network::{close_socket, send_all};
use crate::utils::poll::{READ, poll_one};

/// Reactor thread body: serve until stopped, restarting whenever the
/// network goes away underneath the listener.
pub(crate) fn run(config: Arc<ServerConfig>, shared: Arc<ServerShared>) -> Result<(), ServerError> {
    loop {
        shared.record_start_time();

        let listener = match open_listener(&config) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to start listening: {}", e);
                shared.set_mode(ServerMode::Invalid);
                shared.ready.set();
                return Err(e);
            }
        };

        let local_addr = listener.local_addr().ok().and_then(|addr| addr.as_socket());
        shared.set_local_addr(local_addr);

        if !shared.transition(ServerMode::Starting, ServerMode::Listening) {
            close_socket(listener, false);
            shared.ready.set();
            return Ok(());
        }
        if let Some(addr) = local_addr {
            info!("Listening on {}", addr);
        }
        shared.ready.set();

        let mut sessions: Vec<Session> = Vec::with_capacity(config.max_sessions);
        let result = serve(&listener, &mut sessions, &config, &shared);
        teardown(listener, sessions);

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_network_down() => {
                warn!("Network went down ({}), restarting", e);
                if !shared.transition(ServerMode::Listening, ServerMode::Restarting) {
                    return Ok(());
                }
                std::thread::sleep(config.idle_poll());
                if !shared.transition(ServerMode::Restarting, ServerMode::Starting) {
                    return Ok(());
                }
            }
            Err(e) => {
                error!("Reactor failed: {}", e);
                shared.set_mode(ServerMode::Invalid);
                return Err(e);
            }
        }
    }
}

/// Non-blocking control listener with a backlog of `max_sessions`.
fn open_listener(config: &ServerConfig) -> Result<Socket, ServerError> {
    let addr = config.control_socket();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|source| ServerError::Bind { addr, source })?;

    let backlog = i32::try_from(config.max_sessions).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(ServerError::Listen)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn serve(
    listener: &Socket,
    sessions: &mut Vec<Session>,
    config: &Arc<ServerConfig>,
    shared: &Arc<ServerShared>,
) -> Result<(), ServerError> {
    let mut wait = Duration::ZERO;

    while shared.mode() == ServerMode::Listening {
        let ready = poll_one(listener.as_raw_fd(), READ, wait).map_err(ServerError::Poll)?;
        if ready.hangup() {
            return Err(ServerError::Poll(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "listen socket reported an error",
            )));
        }
        if ready.readable() {
            accept_session(listener, sessions, config, shared);
        }

        let mut immediate = false;
        for session in sessions.iter_mut() {
            match session.poll() {
                Ok(()) => {}
                Err(e) if e.is_would_block() => immediate = true,
                Err(e) => {
                    log_session_end(session, &e);
                    session.set_mode(SessionMode::Destroy, CloseFlags::NONE);
                }
            }
            if session.mode().is_data() {
                immediate = true;
            }
        }

        sessions.retain(|session| session.mode() != SessionMode::Destroy);
        wait = if immediate {
            Duration::ZERO
        } else {
            config.idle_poll()
        };
    }

    Ok(())
}

/// Accept one control connection, or turn it away when the server is full.
fn accept_session(
    listener: &Socket,
    sessions: &mut Vec<Session>,
    config: &Arc<ServerConfig>,
    shared: &Arc<ServerShared>,
) {
    let (socket, addr) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) => {
            warn!("Failed to accept connection: {}", e);
            return;
        }
    };

    let Some(peer) = addr.as_socket() else {
        warn!("Accepted connection from a non-IP address");
        close_socket(socket, false);
        return;
    };

    if let Err(e) = socket
        .set_nonblocking(false)
        .and_then(|()| socket.set_write_timeout(Some(config.command_timeout())))
    {
        warn!("Failed to configure connection from {}: {}", peer, e);
        close_socket(socket, false);
        return;
    }

    if sessions.len() >= config.max_sessions {
        warn!("Rejecting {}: {} sessions already open", peer, sessions.len());
        if let Err(e) = send_all(&socket, format_response(421, "Too many connections").as_bytes()) {
            debug!("Failed to notify {}: {}", peer, e);
        }
        close_socket(socket, true);
        return;
    }

    let session = Session::new(socket, peer, Arc::clone(config), Arc::clone(shared));
    info!("{} of {} sessions in use", sessions.len() + 1, config.max_sessions);
    sessions.push(session);
}

fn log_session_end(session: &Session, err: &SessionError) {
    match err {
        SessionError::PeerClosed | SessionError::Hangup => {
            info!("Session {} with {}: {}", session.id(), session.peer(), err)
        }
        _ => warn!("Session {} with {} failed: {}", session.id(), session.peer(), err),
    }
}

fn teardown(listener: Socket, sessions: Vec<Session>) {
    for mut session in sessions {
        session.set_mode(SessionMode::Destroy, CloseFlags::NONE);
    }
    close_socket(listener, false);
    debug!("Listener closed");
}
