//! Directory listing records
//!
//! Renders one `LIST`, `NLST`, `MLSD`/`MLST` or `STAT` line per filesystem
//! entry, and tracks which MLST facts a session has enabled.

use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entries modified within this window show a time instead of a year.
const RECENT_WINDOW_SECS: i64 = 60 * 60 * 24 * 365 / 2;

/// Format of the records produced by a listing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingMode {
    #[default]
    List,
    Nlst,
    Mlsd,
    Mlst,
    Stat,
}

/// MLST facts a session asked for with `OPTS MLST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlstFacts(u8);

impl MlstFacts {
    pub const TYPE: MlstFacts = MlstFacts(1 << 0);
    pub const SIZE: MlstFacts = MlstFacts(1 << 1);
    pub const MODIFY: MlstFacts = MlstFacts(1 << 2);
    pub const PERM: MlstFacts = MlstFacts(1 << 3);
    pub const UNIX_MODE: MlstFacts = MlstFacts(1 << 4);

    const NAMES: [(MlstFacts, &'static str); 5] = [
        (Self::TYPE, "Type"),
        (Self::SIZE, "Size"),
        (Self::MODIFY, "Modify"),
        (Self::PERM, "Perm"),
        (Self::UNIX_MODE, "UNIX.mode"),
    ];

    pub const fn empty() -> Self {
        MlstFacts(0)
    }

    pub fn contains(self, other: MlstFacts) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MlstFacts) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse the argument of `OPTS MLST`, e.g. `Type;Size;UNIX.mode;`.
    /// Unknown facts are ignored.
    pub fn parse(list: &str) -> Self {
        let mut facts = MlstFacts::empty();
        for item in list.split(';') {
            let item = item.trim();
            if let Some((flag, _)) = Self::NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(item))
            {
                facts.insert(*flag);
            }
        }
        facts
    }

    /// Enabled facts as `Type;Size;` for the `OPTS MLST` reply.
    pub fn enabled_list(self) -> String {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| format!("{name};"))
            .collect()
    }

    /// All supported facts, enabled ones marked with `*`, for FEAT.
    pub fn feature_list(self) -> String {
        Self::NAMES
            .iter()
            .map(|(flag, name)| {
                let star = if self.contains(*flag) { "*" } else { "" };
                format!("{name}{star};")
            })
            .collect()
    }
}

impl Default for MlstFacts {
    fn default() -> Self {
        MlstFacts(Self::TYPE.0 | Self::SIZE.0 | Self::MODIFY.0 | Self::PERM.0)
    }
}

/// Render one record terminated by CRLF.
///
/// `name` must already be wire-encoded. `type_override` replaces the computed
/// MLST type (used for the `cdir` entry). `now` decides between showing the
/// time or the year in `LIST` output. Records longer than `capacity` fail
/// with `EOVERFLOW`.
pub fn render_entry(
    mode: ListingMode,
    facts: MlstFacts,
    meta: &Metadata,
    name: &str,
    type_override: Option<&str>,
    now: SystemTime,
    capacity: usize,
) -> io::Result<String> {
    let mut line = record_prefix(mode, facts, meta, type_override, now);
    check_capacity(line.len() + name.len(), capacity)?;
    line.push_str(name);
    line.push_str("\r\n");
    Ok(line)
}

/// Same record as [`render_entry`] for a directory entry name taken straight
/// from the file system, which need not be UTF-8.
pub fn render_raw_entry(
    mode: ListingMode,
    facts: MlstFacts,
    meta: &Metadata,
    name: &[u8],
    now: SystemTime,
    capacity: usize,
) -> io::Result<Vec<u8>> {
    let mut line = record_prefix(mode, facts, meta, None, now).into_bytes();
    check_capacity(line.len() + name.len(), capacity)?;
    line.extend_from_slice(name);
    line.extend_from_slice(b"\r\n");
    Ok(line)
}

fn record_prefix(
    mode: ListingMode,
    facts: MlstFacts,
    meta: &Metadata,
    type_override: Option<&str>,
    now: SystemTime,
) -> String {
    match mode {
        ListingMode::Mlsd | ListingMode::Mlst => {
            let mut facts_text = render_facts(facts, meta, type_override);
            if mode == ListingMode::Mlst {
                facts_text.insert(0, ' ');
            }
            if !facts_text.ends_with(' ') {
                facts_text.push(' ');
            }
            facts_text
        }
        ListingMode::Nlst => String::new(),
        ListingMode::List | ListingMode::Stat => {
            let mut text = String::new();
            if mode == ListingMode::Stat {
                text.push(' ');
            }
            text.push_str(&render_long(meta, now));
            text
        }
    }
}

fn check_capacity(len: usize, capacity: usize) -> io::Result<()> {
    if len + 2 > capacity {
        return Err(io::Error::from_raw_os_error(libc::EOVERFLOW));
    }
    Ok(())
}

/// `Type=...;Size=...;Modify=...;Perm=...;UNIX.mode=...;`
fn render_facts(facts: MlstFacts, meta: &Metadata, type_override: Option<&str>) -> String {
    let mut out = String::new();
    let file_type = meta.file_type();

    if facts.contains(MlstFacts::TYPE) {
        let kind = type_override.unwrap_or_else(|| {
            if file_type.is_file() {
                "file"
            } else if file_type.is_dir() {
                "dir"
            } else if file_type.is_symlink() {
                "os.unix=symlink"
            } else if file_type.is_char_device() {
                "os.unix=character"
            } else if file_type.is_block_device() {
                "os.unix=block"
            } else if file_type.is_fifo() {
                "os.unix=fifo"
            } else if file_type.is_socket() {
                "os.unix=socket"
            } else {
                "???"
            }
        });
        out.push_str(&format!("Type={kind};"));
    }

    if facts.contains(MlstFacts::SIZE) {
        out.push_str(&format!("Size={};", meta.size()));
    }

    if facts.contains(MlstFacts::MODIFY) {
        out.push_str(&format!(
            "Modify={};",
            mtime_utc(meta).format("%Y%m%d%H%M%S")
        ));
    }

    if facts.contains(MlstFacts::PERM) {
        out.push_str("Perm=");
        out.push_str(&perm_letters(meta));
        out.push(';');
    }

    if facts.contains(MlstFacts::UNIX_MODE) {
        out.push_str(&format!("UNIX.mode=0{:o};", meta.mode() & 0o7777));
    }

    out
}

/// RFC 3659 permission letters derived from the owner bits.
fn perm_letters(meta: &Metadata) -> String {
    let mode = meta.mode();
    let is_file = meta.file_type().is_file();
    let is_dir = meta.file_type().is_dir();
    let readable = mode & 0o400 != 0;
    let writable = mode & 0o200 != 0;
    let executable = mode & 0o100 != 0;

    let mut perm = String::new();
    if is_file && writable {
        perm.push('a');
    }
    if is_dir && writable {
        perm.push('c');
    }
    perm.push('d');
    if is_dir && executable {
        perm.push('e');
    }
    perm.push('f');
    if is_dir && readable {
        perm.push('l');
    }
    if is_dir && writable {
        perm.push('m');
        perm.push('p');
    }
    if is_file && readable {
        perm.push('r');
    }
    if is_file && writable {
        perm.push('w');
    }
    perm
}

/// `drwxr-xr-x 2 1000 1000 4096 Mar  4 12:30 ` style prefix.
fn render_long(meta: &Metadata, now: SystemTime) -> String {
    let file_type = meta.file_type();
    let type_char = if file_type.is_file() {
        '-'
    } else if file_type.is_dir() {
        'd'
    } else if file_type.is_symlink() {
        'l'
    } else if file_type.is_char_device() {
        'c'
    } else if file_type.is_block_device() {
        'b'
    } else if file_type.is_fifo() {
        'p'
    } else if file_type.is_socket() {
        's'
    } else {
        '?'
    };

    let mode = meta.mode();
    let bit = |mask: u32, ch: char| if mode & mask != 0 { ch } else { '-' };
    let perms: String = [
        bit(0o400, 'r'),
        bit(0o200, 'w'),
        bit(0o100, 'x'),
        bit(0o040, 'r'),
        bit(0o020, 'w'),
        bit(0o010, 'x'),
        bit(0o004, 'r'),
        bit(0o002, 'w'),
        bit(0o001, 'x'),
    ]
    .iter()
    .collect();

    let mtime = meta.mtime();
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let stamp = match DateTime::<Utc>::from_timestamp(mtime, 0) {
        Some(time) if now_secs > mtime && now_secs - mtime < RECENT_WINDOW_SECS => {
            time.format("%b %e %H:%M").to_string()
        }
        Some(time) => time.format("%b %e %Y").to_string(),
        None => "Jan 1 1970".to_string(),
    };

    format!(
        "{type_char}{perms} {} {} {} {} {stamp} ",
        meta.nlink(),
        meta.uid(),
        meta.gid(),
        meta.size()
    )
}

/// Modification time in UTC, the epoch when it cannot be represented.
pub fn mtime_utc(meta: &Metadata) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(meta.mtime(), 0).unwrap_or_default()
}
