//! Module `commands`
//!
//! The verb table used by the dispatcher. Names are matched without regard
//! to case by binary search over a table sorted by name.

use std::cmp::Ordering;

/// Commands per line in the HELP reply.
const HELP_COLUMNS: usize = 14;

/// Recognized FTP verbs. The `X*` aliases resolve to their RFC 959 verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Abor,
    Allo,
    Appe,
    Cdup,
    Cwd,
    Dele,
    Feat,
    Help,
    List,
    Mdtm,
    Mkd,
    Mlsd,
    Mlst,
    Mode,
    Nlst,
    Noop,
    Opts,
    Pass,
    Pasv,
    Port,
    Pwd,
    Quit,
    Rest,
    Retr,
    Rmd,
    Rnfr,
    Rnto,
    Size,
    Stat,
    Stor,
    Stou,
    Stru,
    Syst,
    Type,
    User,
}

impl Verb {
    /// Verbs accepted while a transfer is armed or running.
    pub fn allowed_during_transfer(self) -> bool {
        matches!(self, Verb::Abor | Verb::Stat | Verb::Quit)
    }
}

/// Sorted by name.
pub const COMMANDS: &[(&str, Verb)] = &[
    ("ABOR", Verb::Abor),
    ("ALLO", Verb::Allo),
    ("APPE", Verb::Appe),
    ("CDUP", Verb::Cdup),
    ("CWD", Verb::Cwd),
    ("DELE", Verb::Dele),
    ("FEAT", Verb::Feat),
    ("HELP", Verb::Help),
    ("LIST", Verb::List),
    ("MDTM", Verb::Mdtm),
    ("MKD", Verb::Mkd),
    ("MLSD", Verb::Mlsd),
    ("MLST", Verb::Mlst),
    ("MODE", Verb::Mode),
    ("NLST", Verb::Nlst),
    ("NOOP", Verb::Noop),
    ("OPTS", Verb::Opts),
    ("PASS", Verb::Pass),
    ("PASV", Verb::Pasv),
    ("PORT", Verb::Port),
    ("PWD", Verb::Pwd),
    ("QUIT", Verb::Quit),
    ("REST", Verb::Rest),
    ("RETR", Verb::Retr),
    ("RMD", Verb::Rmd),
    ("RNFR", Verb::Rnfr),
    ("RNTO", Verb::Rnto),
    ("SIZE", Verb::Size),
    ("STAT", Verb::Stat),
    ("STOR", Verb::Stor),
    ("STOU", Verb::Stou),
    ("STRU", Verb::Stru),
    ("SYST", Verb::Syst),
    ("TYPE", Verb::Type),
    ("USER", Verb::User),
    ("XCUP", Verb::Cdup),
    ("XCWD", Verb::Cwd),
    ("XMKD", Verb::Mkd),
    ("XPWD", Verb::Pwd),
    ("XRMD", Verb::Rmd),
];

/// Find the verb for a command name, ignoring ASCII case.
pub fn lookup(name: &str) -> Option<Verb> {
    COMMANDS
        .binary_search_by(|(candidate, _)| compare_ignore_case(candidate, name))
        .ok()
        .map(|idx| COMMANDS[idx].1)
}

fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_uppercase())
        .cmp(b.bytes().map(|c| c.to_ascii_uppercase()))
}

/// Body of the `214` HELP reply.
pub fn help_text() -> String {
    let mut text = String::from("214-The following commands are recognized\r\n");
    for row in COMMANDS.chunks(HELP_COLUMNS) {
        for (name, _) in row {
            text.push(' ');
            text.push_str(name);
        }
        text.push_str("\r\n");
    }
    text.push_str("214 End\r\n");
    text
}
