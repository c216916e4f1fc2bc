//! Data channel setup
//!
//! Arms the passive listener for PASV, parses PORT targets, and completes
//! data connections in either direction without blocking the reactor.

use log::{debug, info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::client::{CloseFlags, Session, SessionFlags, SessionMode};
use crate::error::PortError;
use crate::utils::network::{close_socket, increase_buffers, is_connect_in_progress};

/// Where the bytes of a transfer travel.
#[derive(Debug, Default)]
pub enum DataChannel {
    /// No data connection
    #[default]
    None,
    /// Dedicated data connection
    Socket(Socket),
    /// Replies on the control connection itself (STAT and MLST)
    Command,
}

impl DataChannel {
    /// Socket carrying the transfer bytes, given the control socket.
    pub fn socket<'a>(&'a self, command: Option<&'a Socket>) -> Option<&'a Socket> {
        match self {
            DataChannel::Socket(socket) => Some(socket),
            DataChannel::Command => command,
            DataChannel::None => None,
        }
    }
}

/// Parse `h1,h2,h3,h4,p1,p2` into an IPv4 socket address.
pub fn parse_port_args(args: &str) -> Result<SocketAddrV4, PortError> {
    let fields: Vec<&str> = args.split(',').collect();
    if fields.len() != 6 {
        return Err(PortError::FieldCount(fields.len()));
    }

    let mut octets = [0u8; 6];
    for (octet, field) in octets.iter_mut().zip(&fields) {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PortError::NotNumeric(field.to_string()));
        }
        // Digits only, so the parse can fail on overflow alone
        let value: u32 = field
            .parse()
            .map_err(|_| PortError::NotNumeric(field.to_string()))?;
        *octet = u8::try_from(value).map_err(|_| PortError::OutOfRange(value))?;
    }

    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = u16::from_be_bytes([octets[4], octets[5]]);
    Ok(SocketAddrV4::new(ip, port))
}

/// Render a listener address as the `227` reply argument.
pub fn format_pasv(addr: SocketAddrV4) -> String {
    let [h1, h2, h3, h4] = addr.ip().octets();
    let [p1, p2] = addr.port().to_be_bytes();
    format!("{h1},{h2},{h3},{h4},{p1},{p2}")
}

/// Open the passive listener on the control connection's local address.
///
/// The caller has already dropped any previous listener and data connection.
pub(crate) fn enter_passive(session: &mut Session) -> io::Result<SocketAddrV4> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    increase_buffers(&socket, session.config.socket_buffer_size)?;

    let port = match session.config.pasv_port_range() {
        Some((min, max)) => session.shared.next_pasv_port(min, max),
        None => 0,
    };
    let bind_addr = SocketAddrV4::new(session.local_ip, port);
    socket.bind(&SockAddr::from(bind_addr))?;
    socket.listen(1)?;
    socket.set_nonblocking(true)?;

    let addr = match socket.local_addr()?.as_socket() {
        Some(SocketAddr::V4(addr)) => addr,
        _ => return Err(io::Error::from(io::ErrorKind::AddrNotAvailable)),
    };

    info!("Session {} listening on {} for PASV", session.id, addr);
    session.pasv = Some(socket);
    session.pasv_addr = Some(addr);
    Ok(addr)
}

/// Start the PORT connection to the stored peer address.
///
/// An immediate connect moves the session to `DataTransfer`, a pending one
/// leaves it in `DataConnect` waiting for write readiness.
pub(crate) fn connect(session: &mut Session) -> io::Result<()> {
    session.flags.remove(SessionFlags::PORT);

    let target = session
        .data_addr
        .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    if let Err(e) = increase_buffers(&socket, session.config.socket_buffer_size)
        .and_then(|()| socket.set_nonblocking(true))
    {
        close_socket(socket, false);
        return Err(e);
    }

    match socket.connect(&SockAddr::from(target)) {
        Ok(()) => {
            info!("Session {} connected to {}", session.id, target);
            session.data = DataChannel::Socket(socket);
            session.set_mode(SessionMode::DataTransfer, CloseFlags::PASV);
            session.reply(150, "Ready");
            Ok(())
        }
        Err(e) if is_connect_in_progress(&e) => {
            debug!("Session {} connecting to {}", session.id, target);
            session.data = DataChannel::Socket(socket);
            Ok(())
        }
        Err(e) => {
            warn!("Session {} failed to connect to {}: {}", session.id, target, e);
            close_socket(socket, false);
            Err(e)
        }
    }
}

/// Accept the peer's connection on the passive listener.
pub(crate) fn accept(session: &mut Session) {
    if !session.flags.contains(SessionFlags::PASV) {
        session.reply(503, "Bad sequence of commands");
        return;
    }
    session.flags.remove(SessionFlags::PASV);
    session.reply(150, "Ready");

    let accepted = match session.pasv.as_ref() {
        Some(listener) => listener.accept(),
        None => Err(io::Error::from(io::ErrorKind::NotConnected)),
    };

    let result = accepted.and_then(|(socket, addr)| match socket.set_nonblocking(true) {
        Ok(()) => Ok((socket, addr)),
        Err(e) => {
            close_socket(socket, true);
            Err(e)
        }
    });

    match result {
        Ok((socket, addr)) => {
            match addr.as_socket() {
                Some(peer) => info!("Session {} accepted data connection from {}", session.id, peer),
                None => info!("Session {} accepted data connection", session.id),
            }
            session.set_mode(SessionMode::DataTransfer, CloseFlags::PASV);
            session.data = DataChannel::Socket(socket);
        }
        Err(e) => {
            warn!("Session {} failed to accept data connection: {}", session.id, e);
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(425, "Failed to establish connection");
        }
    }
}
