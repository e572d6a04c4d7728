//! Manifest Tracker - the single "currently active bundle" pointer.
//!
//! The record lives in `data_dir/manifest.json`. When it is absent the
//! manifest is derived from the newest bundle on every read.

use crate::bundle_store::{BundleFile, BundleStore, StoredBundle};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::fs_util;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Record served to devices and persisted on activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub bundle_url: String,
    pub compatible: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<String>,
}

impl Manifest {
    /// No bundle available
    pub fn empty(compatible: &str) -> Self {
        Self {
            bundle_url: String::new(),
            compatible: compatible.to_string(),
            filename: String::new(),
            size: None,
            sha256: None,
            released_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_empty()
    }
}

fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct ManifestTracker {
    path: PathBuf,
    store: BundleStore,
    config: ServerConfig,
    // Serializes read-modify-write of the manifest file within this process
    write_lock: Mutex<()>,
}

impl ManifestTracker {
    pub fn new(config: &ServerConfig, store: BundleStore) -> Self {
        Self {
            path: config.manifest_path(),
            store,
            config: config.clone(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persisted manifest, or `None` when no file exists.
    /// Malformed content is a `CorruptState` error.
    pub fn load(&self) -> Result<Option<Manifest>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Manifest devices should see right now
    pub fn current(&self) -> Result<Manifest> {
        if let Some(manifest) = self.load()? {
            return Ok(manifest);
        }

        match self.store.newest()? {
            Some(bundle) => {
                debug!("No manifest on disk, deriving from newest bundle {}", bundle.name);
                let sha256 = self.store.hash(&bundle.name)?;
                Ok(self.build(&bundle.name, bundle.size_bytes, sha256, bundle.modified_at))
            }
            None => Ok(Manifest::empty(&self.config.compatible)),
        }
    }

    /// Make an existing bundle the active one, re-hashing it from disk
    pub fn activate(&self, raw_name: &str) -> Result<Manifest> {
        let BundleFile {
            name, size_bytes, ..
        } = self.store.stat(raw_name)?;
        let sha256 = self.store.hash(&name)?;
        self.save(self.build(&name, size_bytes, sha256, Utc::now()))
    }

    /// Activate a bundle that was just stored, reusing its streamed digest
    pub fn activate_stored(&self, stored: &StoredBundle) -> Result<Manifest> {
        self.save(self.build(
            &stored.name,
            stored.size_bytes,
            stored.sha256.clone(),
            Utc::now(),
        ))
    }

    /// Remove the persisted manifest
    pub fn clear(&self) -> Result<bool> {
        let _guard = self.lock();
        Ok(fs_util::remove_if_exists(&self.path)?)
    }

    /// Remove the persisted manifest only if it points at `name`.
    ///
    /// This never fails: an unreadable manifest is left in place so the
    /// bundle deletion that triggered the check still succeeds.
    pub fn clear_if_active(&self, name: &str) -> bool {
        let _guard = self.lock();
        match self.load() {
            Ok(Some(manifest)) if manifest.filename == name => {
                match fs_util::remove_if_exists(&self.path) {
                    Ok(removed) => {
                        if removed {
                            info!("Cleared manifest for deleted bundle {}", name);
                        }
                        removed
                    }
                    Err(e) => {
                        warn!("Could not remove manifest {}: {}", self.path.display(), e);
                        false
                    }
                }
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Leaving manifest in place, could not read it: {}", e);
                false
            }
        }
    }

    fn build(&self, name: &str, size: u64, sha256: String, released: DateTime<Utc>) -> Manifest {
        Manifest {
            bundle_url: self.config.bundle_url(name),
            compatible: self.config.compatible.clone(),
            filename: name.to_string(),
            size: Some(size),
            sha256: Some(sha256),
            released_at: Some(iso8601(released)),
        }
    }

    fn save(&self, manifest: Manifest) -> Result<Manifest> {
        let json = serde_json::to_string_pretty(&manifest)?;
        let _guard = self.lock();
        fs_util::atomic_write(&self.path, json.as_bytes())?;
        info!("Activated bundle {}", manifest.filename);
        Ok(manifest)
    }
}
