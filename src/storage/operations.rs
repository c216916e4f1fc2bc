//! Storage operations
//!
//! Opens files for the retrieve and store loops, honoring the restart offset
//! set by REST.

use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

/// Open `path` for reading at `offset`. Returns the file and its total size.
pub fn open_read(path: &Path, offset: u64) -> io::Result<(File, u64)> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    if offset != 0 {
        file.seek(SeekFrom::Start(offset))?;
    }

    debug!("Opened {} for reading at {} of {}", path.display(), offset, size);
    Ok((file, size))
}

/// Open `path` for writing.
///
/// * `append` - open in append mode, ignoring `offset`.
/// * otherwise a non-zero `offset` updates the existing file in place from
///   that position, and a zero offset creates or truncates it.
pub fn open_write(path: &Path, offset: u64, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    if append {
        options.append(true).create(true);
    } else if offset != 0 {
        options.read(true).write(true);
    } else {
        options.write(true).create(true).truncate(true);
    }

    let mut file = options.open(path)?;

    if offset != 0 && !append {
        file.seek(SeekFrom::Start(offset))?;
    }

    debug!(
        "Opened {} for writing (append={}, offset={})",
        path.display(),
        append,
        offset
    );
    Ok(file)
}
