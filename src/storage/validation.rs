//! Path validation
//!
//! Builds normalized virtual paths from client arguments, maps them onto the
//! served root, and applies the control-channel escaping of newlines and
//! quotes.

use std::path::{Path, PathBuf};

use crate::error::PathError;

/// Longest virtual path accepted from a client.
pub const PATH_MAX: usize = 4096;

/// Reject `..` components and empty components.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    let mut rest = path;
    while let Some(idx) = rest.find("/..") {
        let after = &rest[idx + 3..];
        if after.is_empty() || after.starts_with('/') {
            return Err(PathError::Invalid);
        }
        rest = &rest[idx + 1..];
    }

    if path.contains("//") {
        return Err(PathError::Invalid);
    }

    Ok(())
}

/// Resolve `arg` against `cwd` into a normalized virtual path.
///
/// Absolute arguments are taken as-is, relative ones are appended to `cwd`.
/// Trailing slashes are removed and an empty result becomes `/`.
pub fn build_path(cwd: &str, arg: &str) -> Result<String, PathError> {
    let mut path = if arg.starts_with('/') {
        arg.to_string()
    } else if cwd == "/" {
        format!("/{arg}")
    } else {
        format!("{cwd}/{arg}")
    };

    if path.len() >= PATH_MAX {
        return Err(PathError::NameTooLong);
    }

    validate_path(&path)?;

    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path.is_empty() {
        path.push('/');
    }

    Ok(path)
}

/// Strip the last component of `cwd`. The root stays the root.
pub fn cd_up(cwd: &mut String) {
    match cwd.rfind('/') {
        Some(0) | None => {
            cwd.clear();
            cwd.push('/');
        }
        Some(idx) => cwd.truncate(idx),
    }
}

/// Map a virtual path under the served root.
pub fn virtual_to_real_path(root: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Escape a path for the control channel: LF becomes NUL and, when `quotes`
/// is set, `"` is doubled.
pub fn encode_path(raw: &str, quotes: bool) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\n' => encoded.push('\0'),
            '"' if quotes => encoded.push_str("\"\""),
            other => encoded.push(other),
        }
    }
    encoded
}

/// [`encode_path`] for a name that need not be UTF-8, without quote doubling.
pub fn encode_name_bytes(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .map(|&byte| if byte == b'\n' { 0 } else { byte })
        .collect()
}

/// Undo the wire escaping in place: NUL becomes LF.
pub fn decode_path(buf: &mut [u8]) {
    for byte in buf.iter_mut().filter(|b| **b == 0) {
        *byte = b'\n';
    }
}

/// Final component of a virtual path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_relative_and_absolute_paths() {
        assert_eq!(build_path("/", "file.txt").unwrap(), "/file.txt");
        assert_eq!(build_path("/music", "a.mp3").unwrap(), "/music/a.mp3");
        assert_eq!(build_path("/music", "/other").unwrap(), "/other");
        assert_eq!(build_path("/music", "sub/").unwrap(), "/music/sub");
        assert_eq!(build_path("/", "").unwrap(), "/");
        assert_eq!(build_path("/a", "/").unwrap(), "/");
    }

    #[test]
    fn rejects_parent_and_empty_components() {
        assert_eq!(build_path("/", ".."), Err(PathError::Invalid));
        assert_eq!(build_path("/a", "../b"), Err(PathError::Invalid));
        assert_eq!(build_path("/", "/x/../y"), Err(PathError::Invalid));
        assert_eq!(build_path("/", "a//b"), Err(PathError::Invalid));
        // names merely starting with two dots are fine
        assert_eq!(build_path("/", "..hidden").unwrap(), "/..hidden");
    }

    #[test]
    fn rejects_overlong_paths() {
        let long = "x".repeat(PATH_MAX);
        assert_eq!(build_path("/", &long), Err(PathError::NameTooLong));
    }

    #[test]
    fn cd_up_strips_last_component() {
        let mut cwd = "/a/b".to_string();
        cd_up(&mut cwd);
        assert_eq!(cwd, "/a");
        cd_up(&mut cwd);
        assert_eq!(cwd, "/");
        cd_up(&mut cwd);
        assert_eq!(cwd, "/");
    }

    #[test]
    fn maps_virtual_paths_under_root() {
        let root = Path::new("/srv/ftp");
        assert_eq!(virtual_to_real_path(root, "/"), PathBuf::from("/srv/ftp"));
        assert_eq!(
            virtual_to_real_path(root, "/pub/readme"),
            PathBuf::from("/srv/ftp/pub/readme")
        );
    }

    #[test]
    fn escaping_reverses_through_decode() {
        let original = "dir/\"with\"\nnewline";
        let encoded = encode_path(original, false);
        assert_eq!(encoded, "dir/\"with\"\0newline");

        let mut bytes = encoded.into_bytes();
        decode_path(&mut bytes);
        assert_eq!(bytes, original.as_bytes());
    }

    #[test]
    fn quotes_are_doubled_on_request() {
        assert_eq!(encode_path("say \"hi\"\n", true), "say \"\"hi\"\"\0");
        assert_eq!(encode_path("say \"hi\"", false), "say \"hi\"");
    }

    #[test]
    fn byte_names_escape_newlines_only() {
        assert_eq!(encode_name_bytes(b"caf\xe9\n\"x\""), b"caf\xe9\0\"x\"");
    }

    #[test]
    fn base_name_of_paths() {
        assert_eq!(base_name("/a/b.txt"), "b.txt");
        assert_eq!(base_name("/"), "");
    }
}
