//! Key files: passphrases read from a file, or one line of standard input
//! when the path is `-`.

use crate::error::{LuksError, LuksResult};
use std::fs::File;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Largest key file accepted, matching cryptsetup's default limit.
pub const MAX_KEY_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Read passphrase material from `path`. A regular file is used whole;
/// `-` reads a single line from standard input, without the line ending.
pub fn read_key_file(path: &Path) -> LuksResult<Zeroizing<Vec<u8>>> {
    if path == Path::new("-") {
        let stdin = io::stdin();
        return read_key_line(path, &mut stdin.lock());
    }
    let file = File::open(path).map_err(|err| invalid_key(path, err.to_string()))?;
    read_key_bytes(path, file)
}

/// Whole-stream variant used for regular files.
pub fn read_key_bytes<R: Read>(origin: &Path, reader: R) -> LuksResult<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(Vec::new());
    reader
        .take(MAX_KEY_FILE_SIZE + 1)
        .read_to_end(&mut key)?;
    if key.len() as u64 > MAX_KEY_FILE_SIZE {
        return Err(invalid_key(
            origin,
            format!("larger than {MAX_KEY_FILE_SIZE} bytes"),
        ));
    }
    if key.is_empty() {
        return Err(invalid_key(origin, "file is empty"));
    }
    Ok(key)
}

/// Single-line variant used for standard input.
pub fn read_key_line<R: BufRead>(origin: &Path, reader: &mut R) -> LuksResult<Zeroizing<Vec<u8>>> {
    let mut line = Zeroizing::new(Vec::new());
    reader
        .take(MAX_KEY_FILE_SIZE)
        .read_until(b'\n', &mut line)?;
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    if line.is_empty() {
        return Err(invalid_key(origin, "no passphrase on input"));
    }
    Ok(line)
}

fn invalid_key(path: &Path, reason: impl Into<String>) -> LuksError {
    LuksError::InvalidKeyFile {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}
