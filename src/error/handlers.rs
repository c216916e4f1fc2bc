//! Error handlers
//!
//! Helpers that turn OS errors into reply text.

use std::io;

/// Reason text of an I/O error without the `(os error N)` suffix.
pub fn describe_io(err: &io::Error) -> String {
    let text = err.to_string();
    match text.rfind(" (os error ") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_os_error_suffix() {
        let err = io::Error::from_raw_os_error(libc::EEXIST);
        assert_eq!(describe_io(&err), "File exists");
        let err = io::Error::from_raw_os_error(libc::EINVAL);
        assert_eq!(describe_io(&err), "Invalid argument");
    }

    #[test]
    fn keeps_custom_messages() {
        let err = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(describe_io(&err), "boom");
    }
}
