//! Bundle Store - flat directory of uploaded update images.
//!
//! Files are addressed only by their sanitized name. Uploads stream through
//! a hidden staging file and a SHA-256 hasher in one pass, then get renamed
//! into place, so a cancelled upload never leaves a partial bundle behind.

use crate::config::{ServerConfig, BUNDLE_EXTENSION};
use crate::error::{OtaError, Result};
use crate::fs_util::{self, CHUNK_SIZE};
use crate::sanitize::{has_extension, sanitize_nonempty};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::{debug, info};

pub const BUNDLE_NOT_FOUND: &str = "Bundle not found";
pub const NO_FILE_SELECTED: &str = "No file selected";

/// A bundle as it exists on disk right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "mtime")]
    pub modified_at: DateTime<Utc>,
}

/// Outcome of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBundle {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
}

impl BundleStore {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            dir: config.bundles_dir(),
        }
    }

    /// Create the bundle directory if it is missing
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Start an incremental upload. The name is validated before anything
    /// touches the disk.
    pub fn begin(&self, raw_name: &str) -> Result<BundleWriter> {
        let name = sanitize_nonempty(raw_name)
            .ok_or_else(|| OtaError::InvalidInput(NO_FILE_SELECTED.to_string()))?;
        if !has_extension(&name, BUNDLE_EXTENSION) {
            return Err(OtaError::InvalidInput(format!(
                "File must be a {} bundle",
                BUNDLE_EXTENSION
            )));
        }

        let target = self.dir.join(&name);
        let staging = fs_util::temp_sibling(&target);
        let file = File::create(&staging)?;
        debug!("Staging upload of {} at {}", name, staging.display());

        Ok(BundleWriter {
            name,
            target,
            staging,
            file: Some(file),
            hasher: Sha256::new(),
            size_bytes: 0,
        })
    }

    /// Store a whole stream under `raw_name`, hashing while writing
    pub fn store<R: Read>(&self, raw_name: &str, mut reader: R) -> Result<StoredBundle> {
        let mut writer = self.begin(raw_name)?;
        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_chunk(&buffer[..n])?;
        }
        writer.finish()
    }

    /// All bundles currently in the store, in directory order
    pub fn list(&self) -> Result<Vec<BundleFile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut bundles = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !has_extension(&name, BUNDLE_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            bundles.push(BundleFile {
                name,
                size_bytes: metadata.len(),
                modified_at: DateTime::<Utc>::from(metadata.modified()?),
            });
        }
        Ok(bundles)
    }

    /// Most recently modified bundle, if any
    pub fn newest(&self) -> Result<Option<BundleFile>> {
        Ok(self.list()?.into_iter().max_by_key(|b| b.modified_at))
    }

    /// Sanitized name if it can address a bundle at all. Staging files and
    /// anything else `list` would skip never match.
    fn bundle_name(raw_name: &str) -> Option<String> {
        sanitize_nonempty(raw_name).filter(|name| has_extension(name, BUNDLE_EXTENSION))
    }

    /// Path of an existing bundle
    pub fn resolve(&self, raw_name: &str) -> Result<PathBuf> {
        let not_found = || OtaError::NotFound(BUNDLE_NOT_FOUND.to_string());
        let name = Self::bundle_name(raw_name).ok_or_else(not_found)?;
        let path = self.dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }

    /// Open an existing bundle for streaming back to a client
    pub fn retrieve(&self, raw_name: &str) -> Result<File> {
        let path = self.resolve(raw_name)?;
        Ok(File::open(path)?)
    }

    /// Snapshot of one bundle's metadata
    pub fn stat(&self, raw_name: &str) -> Result<BundleFile> {
        let path = self.resolve(raw_name)?;
        let metadata = fs::metadata(&path)?;
        Ok(BundleFile {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size_bytes: metadata.len(),
            modified_at: DateTime::<Utc>::from(metadata.modified()?),
        })
    }

    /// Remove a bundle. Returns false when there was nothing to remove.
    pub fn delete(&self, raw_name: &str) -> Result<bool> {
        let Some(name) = Self::bundle_name(raw_name) else {
            return Ok(false);
        };
        let removed = fs_util::remove_if_exists(&self.dir.join(&name))?;
        if removed {
            info!("Deleted bundle {}", name);
        }
        Ok(removed)
    }

    /// Recompute the SHA-256 of a stored bundle
    pub fn hash(&self, raw_name: &str) -> Result<String> {
        let path = self.resolve(raw_name)?;
        Ok(fs_util::hash_file(&path)?)
    }
}

/// In-flight upload. Dropping it without `finish` discards the staged bytes.
pub struct BundleWriter {
    name: String,
    target: PathBuf,
    staging: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    size_bytes: u64,
}

impl BundleWriter {
    /// Sanitized name the bundle will be stored under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| OtaError::InvalidInput("upload already finished".to_string()))?;
        file.write_all(chunk)?;
        self.hasher.update(chunk);
        self.size_bytes += chunk.len() as u64;
        Ok(())
    }

    /// Flush, then move the staged file over the target name.
    /// An existing bundle with the same name is replaced.
    pub fn finish(mut self) -> Result<StoredBundle> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        fs::rename(&self.staging, &self.target)?;

        let sha256 = hex::encode(std::mem::take(&mut self.hasher).finalize());
        info!(
            "Stored bundle {} ({} bytes, sha256 {})",
            self.name, self.size_bytes, sha256
        );

        Ok(StoredBundle {
            name: std::mem::take(&mut self.name),
            size_bytes: self.size_bytes,
            sha256,
        })
    }
}

impl Drop for BundleWriter {
    fn drop(&mut self) {
        // After a successful rename the staging path no longer exists
        if self.staging.exists() {
            debug!("Discarding unfinished upload {}", self.staging.display());
            let _ = fs::remove_file(&self.staging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn store_in(temp: &TempDir) -> BundleStore {
        let config = ServerConfig {
            data_dir: temp.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let store = BundleStore::new(&config);
        store.ensure_dir().unwrap();
        store
    }

    fn dir_names(store: &BundleStore) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_store_and_retrieve() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let data = b"rauc bundle payload".to_vec();

        let stored = store.store("fw-1.0.raucb", Cursor::new(data.clone())).unwrap();
        assert_eq!(stored.name, "fw-1.0.raucb");
        assert_eq!(stored.size_bytes, data.len() as u64);
        assert_eq!(stored.sha256, hex::encode(Sha256::digest(&data)));

        let mut read_back = Vec::new();
        store.retrieve("fw-1.0.raucb").unwrap().read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, data);
        assert_eq!(store.hash("fw-1.0.raucb").unwrap(), stored.sha256);
    }

    #[test]
    fn test_store_sanitizes_name() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let stored = store.store("../../evil fw.raucb", Cursor::new(b"x".to_vec())).unwrap();
        assert_eq!(stored.name, "....evilfw.raucb");
        assert_eq!(dir_names(&store), vec!["....evilfw.raucb".to_string()]);
    }

    #[test]
    fn test_wrong_extension_rejected() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let err = store.store("image.tar.gz", Cursor::new(b"x".to_vec())).unwrap_err();
        assert!(matches!(err, OtaError::InvalidInput(_)));
        assert!(dir_names(&store).is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        for name in ["", "///", "ü"] {
            let err = store.store(name, Cursor::new(b"x".to_vec())).unwrap_err();
            assert!(matches!(err, OtaError::InvalidInput(ref m) if m == NO_FILE_SELECTED));
        }
        assert!(dir_names(&store).is_empty());
    }

    #[test]
    fn test_uppercase_extension_accepted() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        store.store("IMAGE.RAUCB", Cursor::new(b"x".to_vec())).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_overwrite_last_write_wins() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        store.store("a.raucb", Cursor::new(b"old".to_vec())).unwrap();
        store.store("a.raucb", Cursor::new(b"newer".to_vec())).unwrap();

        let bundles = store.list().unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].size_bytes, 5);
    }

    #[test]
    fn test_dropped_writer_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        {
            let mut writer = store.begin("partial.raucb").unwrap();
            writer.write_chunk(b"half of it").unwrap();
        }

        assert!(dir_names(&store).is_empty());
        assert!(matches!(store.resolve("partial.raucb"), Err(OtaError::NotFound(_))));
    }

    #[test]
    fn test_long_name_stored() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let name = format!("{}.raucb", "a".repeat(234));

        let stored = store.store(&name, Cursor::new(b"long".to_vec())).unwrap();
        assert_eq!(stored.name, name);
        assert_eq!(store.stat(&name).unwrap().size_bytes, 4);
        assert_eq!(dir_names(&store), vec![name]);
    }

    #[test]
    fn test_staging_file_not_addressable() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let mut writer = store.begin("fw.raucb").unwrap();
        writer.write_chunk(b"in flight").unwrap();
        let staged = dir_names(&store);
        assert_eq!(staged.len(), 1);
        let staging = &staged[0];

        assert!(matches!(store.resolve(staging), Err(OtaError::NotFound(_))));
        assert!(matches!(store.hash(staging), Err(OtaError::NotFound(_))));
        assert!(matches!(store.stat(staging), Err(OtaError::NotFound(_))));
        assert!(!store.delete(staging).unwrap());
        assert!(store.list().unwrap().is_empty());

        // The upload still completes
        writer.write_chunk(b" and done").unwrap();
        writer.finish().unwrap();
        assert_eq!(dir_names(&store), vec!["fw.raucb".to_string()]);
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        store.store("one.raucb", Cursor::new(b"1".to_vec())).unwrap();
        fs::write(store.dir().join("notes.txt"), "x").unwrap();
        fs::create_dir(store.dir().join("dir.raucb")).unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["one.raucb".to_string()]);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: temp.path().join("nowhere"),
            ..ServerConfig::default()
        };
        assert!(BundleStore::new(&config).list().unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        store.store("gone.raucb", Cursor::new(b"x".to_vec())).unwrap();
        assert!(store.delete("gone.raucb").unwrap());
        assert!(!store.delete("gone.raucb").unwrap());
        assert!(!store.delete("").unwrap());
    }

    #[test]
    fn test_resolve_missing() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        assert!(matches!(store.resolve("nope.raucb"), Err(OtaError::NotFound(_))));
        // Empty after sanitizing must not resolve to the directory itself
        assert!(matches!(store.resolve("/"), Err(OtaError::NotFound(_))));
        assert!(matches!(store.hash(".."), Err(OtaError::NotFound(_))));

        fs::write(store.dir().join("notes.txt"), "x").unwrap();
        assert!(matches!(store.resolve("notes.txt"), Err(OtaError::NotFound(_))));
        assert!(!store.delete("notes.txt").unwrap());
    }
}
