//! FTP Response handling
//!
//! Formats single-line and multi-line replies.

/// Format an FTP response message
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Format a multi-line reply: `<code>-<header>`, one indented line per
/// item, then `<code> End`.
pub fn format_multiline<I, S>(code: u16, header: &str, lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut reply = format!("{}-{}\r\n", code, header);
    for line in lines {
        reply.push(' ');
        reply.push_str(line.as_ref());
        reply.push_str("\r\n");
    }
    reply.push_str(&format!("{} End\r\n", code));
    reply
}
