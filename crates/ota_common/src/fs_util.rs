//! Filesystem helpers shared by the bundle store and the manifest tracker.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Chunk size for every streaming read/hash loop
pub const CHUNK_SIZE: usize = 8 * 1024;

const STAGING_PREFIX: &str = ".staging-";
const STAGING_SUFFIX: &str = ".tmp";

/// Write data to a file atomically using temp file + rename.
/// Readers see either the old content or the new content, never a mix.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Delete a file, treating "already gone" as success.
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// SHA-256 of a file as lowercase hex, read in fixed-size chunks
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Unique hidden path next to `path`, used as the staging file for a rename.
/// The name has a fixed length so any target name the filesystem accepts
/// can also be staged.
pub fn temp_sibling(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}{}{}",
        STAGING_PREFIX,
        uuid::Uuid::new_v4().simple(),
        STAGING_SUFFIX
    ))
}
