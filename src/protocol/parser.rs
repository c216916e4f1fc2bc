//! FTP Command parsing
//!
//! Reads the control connection into the session's command buffer, splits
//! complete lines into verb and argument, and dispatches them.

use log::{debug, info, warn};
use std::borrow::Cow;

use crate::client::buffers::TELNET_DATA_MARK;
use crate::client::{CloseFlags, Session, SessionFlags, SessionMode};
use crate::error::SessionError;
use crate::protocol::commands::{self, Verb};
use crate::protocol::handlers::handle_command;
use crate::storage::{decode_path, encode_path};
use crate::utils::network::{at_urgent_mark, recv, recv_urgent_byte};

/// Drain readable control data and execute every complete command line.
pub(crate) fn receive(session: &mut Session, urgent: bool) -> Result<(), SessionError> {
    if urgent {
        return receive_urgent(session);
    }

    if session.command_buf.is_full() {
        warn!("Session {} exceeded the command buffer", session.id);
        return Err(SessionError::CommandOverflow);
    }

    let Some(command) = session.command.as_ref() else {
        return Err(SessionError::Hangup);
    };
    let n = recv(command, session.command_buf.spare_mut())?;
    if n == 0 {
        return Err(SessionError::PeerClosed);
    }
    session.command_buf.advance(n);

    // Bytes before the data mark belong to the interrupted command
    if session.flags.contains(SessionFlags::URGENT) && session.command_buf.skip_past_data_mark() {
        session.flags.remove(SessionFlags::URGENT);
    }

    while let Some(mut line) = session.command_buf.take_line() {
        decode_path(&mut line);
        match String::from_utf8(line) {
            Ok(line) => dispatch(session, &line),
            Err(_) => {
                info!("Session {} sent a command that is not UTF-8", session.id);
                session.reply(501, "Invalid character in command");
            }
        }
        if session.mode == SessionMode::Destroy {
            return Ok(());
        }
    }

    if session.command_buf.is_full() {
        warn!("Session {} filled the command buffer without a line end", session.id);
        return Err(SessionError::CommandOverflow);
    }

    Ok(())
}

/// Handle urgent (out-of-band) data, the telnet "interrupt process" that
/// clients send ahead of ABOR.
///
/// In-band bytes up to the urgent mark are discarded. The urgent flag stays
/// set until the data mark shows up, either as the out-of-band byte itself
/// or later in the normal stream.
fn receive_urgent(session: &mut Session) -> Result<(), SessionError> {
    session.flags.insert(SessionFlags::URGENT);

    let Some(command) = session.command.as_ref() else {
        return Err(SessionError::Hangup);
    };

    if !at_urgent_mark(command)? {
        recv(command, session.command_buf.scratch_mut())?;
        session.command_buf.clear();
        if !at_urgent_mark(command)? {
            return Ok(());
        }
    }

    let byte = recv_urgent_byte(command)?;
    session.command_buf.clear();
    debug!("Session {} urgent byte {:?}", session.id, byte);
    if byte == Some(TELNET_DATA_MARK) {
        session.flags.remove(SessionFlags::URGENT);
    }

    Ok(())
}

/// Split a command line into verb and argument at the first whitespace.
/// Exactly one separator is dropped; the argument keeps any further spaces.
pub(crate) fn tokenize(line: &str) -> (&str, &str) {
    match line.find(|c: char| c.is_ascii_whitespace()) {
        Some(idx) => (&line[..idx], &line[idx + 1..]),
        None => (line, ""),
    }
}

/// Look up and execute one command line.
pub(crate) fn dispatch(session: &mut Session, line: &str) {
    let (name, args) = tokenize(line);
    session.timestamp = std::time::SystemTime::now();

    let Some(verb) = commands::lookup(name) else {
        info!("Session {} unimplemented command: {}", session.id, line);
        let mut text = format!("Invalid command \"{}", encode_path(name, false));
        if !args.is_empty() {
            text.push(' ');
            text.push_str(&encode_path(args, false));
        }
        text.push('"');
        session.reply(502, &text);
        return;
    };

    if session.mode != SessionMode::Command {
        if !verb.allowed_during_transfer() {
            warn!(
                "Session {} sent {} during a transfer, aborting it",
                session.id,
                name.to_ascii_uppercase()
            );
            session.set_mode(SessionMode::Command, CloseFlags::ALL);
            session.reply(503, "Invalid command during transfer");
            return;
        }
    } else if verb != Verb::Rnto {
        session.flags.remove(SessionFlags::RENAME);
    }

    debug!("Session {} -> {}", session.id, masked(verb, name, args));
    handle_command(session, verb, args);
}

/// Command text for the log, hiding passwords.
fn masked<'a>(verb: Verb, name: &'a str, args: &'a str) -> Cow<'a, str> {
    match (verb, args.is_empty()) {
        (_, true) => Cow::Borrowed(name),
        (Verb::Pass, false) => Cow::Owned(format!("{} ****", name)),
        _ => Cow::Owned(format!("{} {}", name, args)),
    }
}
