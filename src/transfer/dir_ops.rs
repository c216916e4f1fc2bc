//! Directory listing transfers
//!
//! LIST, NLST, MLSD and STAT with an argument. A listing stages one record at
//! a time and flushes it before reading the next directory entry.

use log::{debug, warn};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;

use crate::client::{CloseFlags, Session, SessionFlags, SessionMode};
use crate::error::describe_io;
use crate::storage::listing::{ListingMode, MlstFacts, render_entry, render_raw_entry};
use crate::storage::validation::{PATH_MAX, base_name, encode_name_bytes};
use crate::storage::{build_path, encode_path};
use crate::transfer::data_channel::{self, DataChannel};
use crate::transfer::file_ops::send_pending;
use crate::transfer::results::{LoopStatus, TransferKind};

/// Set up a listing of `args` (the working directory when empty).
///
/// `workaround` retries a failed `LIST -a`/`LIST -l` with the flag removed,
/// for clients that pass `ls` options.
pub(crate) fn start_listing(session: &mut Session, args: &str, mode: ListingMode, workaround: bool) {
    session.listing_mode = mode;
    session.staging.reset();

    if !args.is_empty() {
        let path = match build_path(&session.cwd, args) {
            Ok(path) => path,
            Err(e) => return finish(session, 550, &e.to_string()),
        };
        let real = session.resolve(&path);

        match fs::read_dir(&real) {
            Ok(dir) => {
                session.dir = Some(dir);
                session.lwd = path;
                if let Err(e) = stage_current_dir(session) {
                    return finish(session, 550, &describe_io(&e));
                }
            }
            Err(_) => {
                let meta = match fs::metadata(&real) {
                    Ok(meta) => meta,
                    Err(e) => {
                        if workaround && mode == ListingMode::List {
                            if let Some(rest) = strip_ls_flag(args) {
                                debug!("Session {} retrying LIST without {:?}", session.id, args);
                                return start_listing(session, rest, mode, false);
                            }
                        }
                        return finish(session, 550, &describe_io(&e));
                    }
                };

                if mode == ListingMode::Mlsd {
                    return finish(session, 501, "Invalid argument");
                }

                let name = if mode == ListingMode::Nlst {
                    encode_path(&path, false)
                } else {
                    encode_path(base_name(&path), false)
                };

                let staged = render_entry(
                    mode,
                    session.mlst_facts,
                    &meta,
                    &name,
                    None,
                    session.timestamp,
                    session.staging.capacity(),
                )
                .and_then(|line| stage(session, line.as_bytes()));

                if let Err(e) = staged {
                    return finish(session, 550, &describe_io(&e));
                }
            }
        }
    } else {
        let real = session.resolve(&session.cwd);
        match fs::read_dir(&real) {
            Ok(dir) => {
                session.dir = Some(dir);
                session.lwd = session.cwd.clone();
                if let Err(e) = stage_current_dir(session) {
                    return finish(session, 550, &describe_io(&e));
                }
            }
            Err(e) => {
                warn!("Session {} failed to open {}: {}", session.id, real.display(), e);
                return finish(session, 550, &describe_io(&e));
            }
        }
    }

    if mode == ListingMode::Stat {
        // Records go out on the control connection between 213 lines
        session.begin_transfer(TransferKind::DirList, SessionMode::DataTransfer, CloseFlags::ALL);
        session.data = DataChannel::Command;
        session.reply_raw("213-Status\r\n");
        return;
    }

    if !session
        .flags
        .intersects(SessionFlags::PASV | SessionFlags::PORT)
    {
        return finish(session, 503, "Bad sequence of commands");
    }

    session.begin_transfer(TransferKind::DirList, SessionMode::DataConnect, CloseFlags::DATA);

    if session.flags.contains(SessionFlags::PORT) && data_channel::connect(session).is_err() {
        finish(session, 425, "can't open data connection");
    }
}

/// Stage and send the next listing record.
pub(crate) fn list_step(session: &mut Session) -> LoopStatus {
    if session.staging.is_drained() {
        let code = if session.listing_mode == ListingMode::Stat {
            213
        } else {
            226
        };

        let next = session.dir.as_mut().and_then(|dir| dir.next());
        let entry = match next {
            None => {
                finish(session, code, "OK");
                return LoopStatus::Terminal;
            }
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                warn!("Session {} failed to read directory: {}", session.id, e);
                finish(session, 550, "unavailable");
                return LoopStatus::Terminal;
            }
        };

        let file_name = entry.file_name();

        let line = if session.listing_mode == ListingMode::Nlst {
            let Some(path) = entry_path(&session.lwd, file_name.as_bytes()) else {
                debug!("Session {} skipping {:?}: name too long", session.id, file_name);
                return LoopStatus::Continue;
            };
            let mut line = encode_name_bytes(&path);
            line.extend_from_slice(b"\r\n");
            Ok(line)
        } else {
            // DirEntry metadata does not follow symlinks
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Session {} failed to stat {:?}: {}", session.id, file_name, e);
                    finish(session, 550, "unavailable");
                    return LoopStatus::Terminal;
                }
            };
            render_raw_entry(
                session.listing_mode,
                session.mlst_facts,
                &meta,
                &encode_name_bytes(file_name.as_bytes()),
                session.timestamp,
                session.staging.capacity(),
            )
        };

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                finish(session, 425, &describe_io(&e));
                return LoopStatus::Terminal;
            }
        };

        if let Err(e) = stage(session, &line) {
            finish(session, 425, &describe_io(&e));
            return LoopStatus::Terminal;
        }
    }

    send_pending(session)
}

/// Stage the listed directory itself as a `Type=cdir` MLSD record.
fn stage_current_dir(session: &mut Session) -> io::Result<()> {
    if session.listing_mode != ListingMode::Mlsd || !session.mlst_facts.contains(MlstFacts::TYPE) {
        return Ok(());
    }

    let meta = fs::metadata(session.resolve(&session.lwd))?;
    if !meta.is_dir() {
        return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
    }

    let line = render_entry(
        ListingMode::Mlsd,
        session.mlst_facts,
        &meta,
        &encode_path(&session.lwd, false),
        Some("cdir"),
        session.timestamp,
        session.staging.capacity(),
    )?;
    stage(session, line.as_bytes())
}

/// Virtual path of a directory entry, `None` when it exceeds `PATH_MAX`.
fn entry_path(lwd: &str, name: &[u8]) -> Option<Vec<u8>> {
    let mut path = Vec::with_capacity(lwd.len() + 1 + name.len());
    path.extend_from_slice(lwd.as_bytes());
    if lwd != "/" {
        path.push(b'/');
    }
    path.extend_from_slice(name);
    (path.len() < PATH_MAX).then_some(path)
}

fn stage(session: &mut Session, line: &[u8]) -> io::Result<()> {
    if session.staging.load(line) {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(libc::EOVERFLOW))
    }
}

/// Return to command mode and reply.
fn finish(session: &mut Session, code: u16, text: &str) {
    session.set_mode(SessionMode::Command, CloseFlags::ALL);
    session.reply(code, text);
}

/// `-a`/`-l` prefix of a LIST argument and whatever follows its separator.
fn strip_ls_flag(args: &str) -> Option<&str> {
    if !(args.starts_with("-a") || args.starts_with("-l")) {
        return None;
    }
    Some(args.get(3..).unwrap_or(""))
}
