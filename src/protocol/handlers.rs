//! Command handlers module for the FTP server.
//!
//! One handler per verb. Handlers reply on the control connection and move
//! the session's state machine; none of them can fail the session except by
//! a failed reply send.

use log::{debug, info, warn};
use std::fs;
use std::io;
use std::time::SystemTime;

use crate::client::{CloseFlags, Session, SessionFlags, SessionMode};
use crate::error::describe_io;
use crate::protocol::commands::{Verb, help_text};
use crate::protocol::responses::format_multiline;
use crate::storage::listing::{ListingMode, MlstFacts, mtime_utc, render_entry};
use crate::storage::{build_path, cd_up, encode_path};
use crate::transfer::data_channel::{enter_passive, format_pasv, parse_port_args};
use crate::transfer::dir_ops::start_listing;
use crate::transfer::file_ops::{FileMode, start_file_transfer};

/// Dispatches a looked-up verb to its handler.
pub(crate) fn handle_command(session: &mut Session, verb: Verb, args: &str) {
    match verb {
        Verb::Abor => handle_cmd_abor(session),
        Verb::Allo => simple(session, 202, "superfluous command"),
        Verb::Appe => start_file_transfer(session, args, FileMode::Append),
        Verb::Cdup => handle_cmd_cdup(session),
        Verb::Cwd => handle_cmd_cwd(session, args),
        Verb::Dele => handle_cmd_dele(session, args),
        Verb::Feat => handle_cmd_feat(session),
        Verb::Help => handle_cmd_help(session),
        Verb::List => start_listing(session, args, ListingMode::List, true),
        Verb::Mdtm => handle_cmd_mdtm(session, args),
        Verb::Mkd => handle_cmd_mkd(session, args),
        Verb::Mlsd => start_listing(session, args, ListingMode::Mlsd, true),
        Verb::Mlst => handle_cmd_mlst(session, args),
        Verb::Mode => only_accepts(session, args, "S"),
        Verb::Nlst => start_listing(session, args, ListingMode::Nlst, false),
        Verb::Noop => session.reply(200, "OK"),
        Verb::Opts => handle_cmd_opts(session, args),
        Verb::Pass | Verb::User => simple(session, 230, "OK"),
        Verb::Pasv => handle_cmd_pasv(session),
        Verb::Port => handle_cmd_port(session, args),
        Verb::Pwd => handle_cmd_pwd(session),
        Verb::Quit => handle_cmd_quit(session),
        Verb::Rest => handle_cmd_rest(session, args),
        Verb::Retr => start_file_transfer(session, args, FileMode::Retrieve),
        Verb::Rmd => handle_cmd_rmd(session, args),
        Verb::Rnfr => handle_cmd_rnfr(session, args),
        Verb::Rnto => handle_cmd_rnto(session, args),
        Verb::Size => handle_cmd_size(session, args),
        Verb::Stat => handle_cmd_stat(session, args),
        Verb::Stor => start_file_transfer(session, args, FileMode::Store),
        Verb::Stou => simple(session, 502, "unavailable"),
        Verb::Stru => only_accepts(session, args, "F"),
        Verb::Syst => simple(session, 215, "UNIX Type: L8"),
        Verb::Type => handle_cmd_type(session, args),
    }
}

/// Back to command mode, then a fixed reply.
fn simple(session: &mut Session, code: u16, text: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    session.reply(code, text);
}

/// MODE and STRU support a single value each.
fn only_accepts(session: &mut Session, args: &str, value: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    if args.eq_ignore_ascii_case(value) {
        session.reply(200, "OK");
    } else {
        session.reply(504, "unavailable");
    }
}

/// Build a path from the argument, replying `<code> <reason>` on failure.
fn path_or_reply(session: &mut Session, args: &str, code: u16) -> Option<String> {
    match build_path(&session.cwd, args) {
        Ok(path) => Some(path),
        Err(e) => {
            session.reply(code, &e.to_string());
            None
        }
    }
}

fn handle_cmd_abor(session: &mut Session) {
    if session.mode == SessionMode::Command {
        session.reply(225, "No transfer to abort");
        return;
    }

    info!("Session {} aborted its transfer", session.id);
    session.set_mode(SessionMode::Command, CloseFlags::ALL);
    session.reply(225, "Aborted");
    session.reply(425, "Transfer aborted");
}

fn handle_cmd_cdup(session: &mut Session) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    cd_up(&mut session.cwd);
    session.reply(200, "OK");
}

fn handle_cmd_cwd(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);

    if args == ".." {
        cd_up(&mut session.cwd);
        session.reply(200, "OK");
        return;
    }

    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    match fs::metadata(session.resolve(&path)) {
        Err(e) => {
            debug!("Session {} cannot enter {}: {}", session.id, path, e);
            session.reply(550, "unavailable");
        }
        Ok(meta) if !meta.is_dir() => session.reply(553, "not a directory"),
        Ok(_) => {
            session.cwd = path;
            session.reply(200, "OK");
        }
    }
}

fn handle_cmd_dele(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    match fs::remove_file(session.resolve(&path)) {
        Ok(()) => {
            info!("Session {} deleted {}", session.id, path);
            session.reply(250, "OK");
        }
        Err(e) => {
            warn!("Session {} failed to delete {}: {}", session.id, path, e);
            session.reply(550, "failed to delete file");
        }
    }
}

fn handle_cmd_feat(session: &mut Session) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let mlst = format!("MLST {}", session.mlst_facts.feature_list());
    let text = format_multiline(
        211,
        "",
        ["MDTM", mlst.as_str(), "PASV", "SIZE", "TVFS", "UTF8"],
    );
    session.reply_raw(&text);
}

fn handle_cmd_help(session: &mut Session) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    session.reply_raw(&help_text());
}

fn handle_cmd_mdtm(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    match fs::metadata(session.resolve(&path)) {
        Ok(meta) => {
            let stamp = mtime_utc(&meta).format("%Y%m%d%H%M%S").to_string();
            session.reply(213, &stamp);
        }
        Err(_) => session.reply(550, "Error getting mtime"),
    }
}

fn handle_cmd_mkd(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    match fs::create_dir(session.resolve(&path)) {
        Ok(()) => {
            info!("Session {} created directory {}", session.id, path);
            session.reply(250, "OK");
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            session.reply(553, &describe_io(&e));
        }
        Err(e) => {
            warn!("Session {} failed to create {}: {}", session.id, path, e);
            session.reply(550, "failed to create directory");
        }
    }
}

/// Facts for a single path, sent over the control connection.
fn handle_cmd_mlst(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 501) else {
        return;
    };

    let meta = match fs::symlink_metadata(session.resolve(&path)) {
        Ok(meta) => meta,
        Err(e) => {
            session.reply(550, &describe_io(&e));
            return;
        }
    };

    let capacity = session.staging.capacity();
    match render_entry(
        ListingMode::Mlst,
        session.mlst_facts,
        &meta,
        &encode_path(&path, true),
        None,
        session.timestamp,
        capacity,
    ) {
        Ok(line) => session.reply_raw(&format!("250-Status\r\n{}250 End\r\n", line)),
        Err(e) => session.reply(550, &describe_io(&e)),
    }
}

fn handle_cmd_opts(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);

    if ["UTF8", "UTF8 ON", "UTF8 NLST"]
        .iter()
        .any(|opt| args.eq_ignore_ascii_case(opt))
    {
        session.reply(200, "OK");
        return;
    }

    let mlst = args
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("MLST "))
        .map(|_| &args[5..]);
    let Some(list) = mlst else {
        session.reply(504, "invalid argument");
        return;
    };

    session.mlst_facts = MlstFacts::parse(list);
    let enabled = session.mlst_facts.enabled_list();
    if enabled.is_empty() {
        session.reply(200, "MLST OPTS");
    } else {
        session.reply(200, &format!("MLST OPTS {}", enabled));
    }
}

fn handle_cmd_pasv(session: &mut Session) {
    session.set_mode(SessionMode::Command, CloseFlags::ALL);
    session.flags.remove(SessionFlags::PASV | SessionFlags::PORT);

    match enter_passive(session) {
        Ok(addr) => {
            session.flags.insert(SessionFlags::PASV);
            session.reply(227, &format_pasv(addr));
        }
        Err(e) => {
            warn!("Session {} failed to enter passive mode: {}", session.id, e);
            session.reply(451, &describe_io(&e));
        }
    }
}

fn handle_cmd_port(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::ALL);
    session.flags.remove(SessionFlags::PASV | SessionFlags::PORT);

    match parse_port_args(args) {
        Ok(addr) => {
            debug!("Session {} will connect to {}", session.id, addr);
            session.data_addr = Some(addr);
            session.flags.insert(SessionFlags::PORT);
            session.reply(200, "OK");
        }
        Err(e) => {
            debug!("Session {} sent a bad PORT argument {:?}: {}", session.id, args, e);
            session.reply(501, "Invalid argument");
        }
    }
}

fn handle_cmd_pwd(session: &mut Session) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let text = format!("\"{}\"", encode_path(&session.cwd, true));
    session.reply(257, &text);
}

fn handle_cmd_quit(session: &mut Session) {
    session.reply(221, "disconnecting");
    session.set_mode(SessionMode::Destroy, CloseFlags::NONE);
}

fn handle_cmd_rest(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    match parse_offset(args) {
        Some(pos) => {
            session.file_pos = pos;
            session.reply(200, "OK");
        }
        None => session.reply(504, "invalid argument"),
    }
}

/// REST offset: decimal digits only, fitting in a `u64`.
fn parse_offset(args: &str) -> Option<u64> {
    if args.is_empty() || !args.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    args.parse().ok()
}

fn handle_cmd_rmd(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    match fs::remove_dir(session.resolve(&path)) {
        Ok(()) => {
            info!("Session {} removed directory {}", session.id, path);
            session.reply(250, "OK");
        }
        Err(e) => {
            warn!("Session {} failed to remove {}: {}", session.id, path, e);
            session.reply(550, "failed to delete directory");
        }
    }
}

fn handle_cmd_rnfr(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    if let Err(e) = fs::symlink_metadata(session.resolve(&path)) {
        debug!("Session {} cannot rename {}: {}", session.id, path, e);
        session.reply(450, "no such file or directory");
        return;
    }

    session.rename_from = Some(path);
    session.flags.insert(SessionFlags::RENAME);
    session.reply(350, "OK");
}

fn handle_cmd_rnto(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);

    let from = match session.rename_from.take() {
        Some(from) if session.flags.contains(SessionFlags::RENAME) => from,
        _ => {
            session.reply(503, "Bad sequence of commands");
            return;
        }
    };
    session.flags.remove(SessionFlags::RENAME);

    let Some(to) = path_or_reply(session, args, 554) else {
        return;
    };

    match fs::rename(session.resolve(&from), session.resolve(&to)) {
        Ok(()) => {
            info!("Session {} renamed {} to {}", session.id, from, to);
            session.reply(250, "OK");
        }
        Err(e) => {
            warn!("Session {} failed to rename {} to {}: {}", session.id, from, to, e);
            session.reply(550, "failed to rename file/directory");
        }
    }
}

fn handle_cmd_size(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    let Some(path) = path_or_reply(session, args, 553) else {
        return;
    };

    match fs::metadata(session.resolve(&path)) {
        Ok(meta) if meta.is_file() => session.reply(213, &meta.len().to_string()),
        _ => session.reply(550, "Could not get file size."),
    }
}

/// Server status, transfer status, or a listing over the control connection.
fn handle_cmd_stat(session: &mut Session, args: &str) {
    match session.mode {
        SessionMode::DataConnect => {
            let text = format_multiline(211, "FTP server status", ["Waiting for data connection"]);
            session.reply_raw(&text);
            return;
        }
        SessionMode::DataTransfer => {
            let line = format!("Transferred {} bytes", session.file_pos);
            session.reply_raw(&format_multiline(211, "FTP server status", [line]));
            return;
        }
        _ => {}
    }

    if args.is_empty() {
        let uptime = session
            .shared
            .start_time()
            .and_then(|start| SystemTime::now().duration_since(start).ok())
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let line = format!(
            "Uptime: {:02}:{:02}:{:02}",
            uptime / 3600,
            (uptime / 60) % 60,
            uptime % 60
        );
        session.reply_raw(&format_multiline(211, "FTP server status", [line]));
        return;
    }

    start_listing(session, args, ListingMode::Stat, false);
}

/// Transfers are always binary; the flag only records what the client asked.
fn handle_cmd_type(session: &mut Session, args: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::NONE);
    match args.split_ascii_whitespace().next() {
        Some(t) if t.eq_ignore_ascii_case("I") => session.flags.insert(SessionFlags::BINARY),
        Some(t) if t.eq_ignore_ascii_case("A") => session.flags.remove(SessionFlags::BINARY),
        _ => {}
    }
    session.reply(200, "OK");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_offsets() {
        assert_eq!(parse_offset("0"), Some(0));
        assert_eq!(parse_offset("1048576"), Some(1_048_576));
        assert_eq!(parse_offset("18446744073709551615"), Some(u64::MAX));
    }

    #[test]
    fn rest_rejects_bad_offsets() {
        assert_eq!(parse_offset(""), None);
        assert_eq!(parse_offset("-1"), None);
        assert_eq!(parse_offset("+5"), None);
        assert_eq!(parse_offset("12a"), None);
        assert_eq!(parse_offset("18446744073709551616"), None);
    }
}
