//! Bundle service - store and manifest operations that span both.

use crate::bundle_store::{BundleFile, BundleStore, StoredBundle};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::manifest::{Manifest, ManifestTracker};
use std::io::Read;
use tracing::info;

pub struct BundleService {
    store: BundleStore,
    manifests: ManifestTracker,
}

impl BundleService {
    /// Build the store and tracker for `config`, creating the bundle
    /// directory if needed.
    pub fn open(config: &ServerConfig) -> Result<Self> {
        let store = BundleStore::new(config);
        store.ensure_dir()?;
        let manifests = ManifestTracker::new(config, store.clone());
        info!("Serving bundles from {}", store.dir().display());
        Ok(Self { store, manifests })
    }

    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    pub fn manifests(&self) -> &ManifestTracker {
        &self.manifests
    }

    pub fn list(&self) -> Result<Vec<BundleFile>> {
        self.store.list()
    }

    pub fn current(&self) -> Result<Manifest> {
        self.manifests.current()
    }

    pub fn activate(&self, raw_name: &str) -> Result<Manifest> {
        self.manifests.activate(raw_name)
    }

    pub fn hash(&self, raw_name: &str) -> Result<String> {
        self.store.hash(raw_name)
    }

    /// Store a bundle and optionally make it the active one
    pub fn upload<R: Read>(
        &self,
        raw_name: &str,
        reader: R,
        activate: bool,
    ) -> Result<(StoredBundle, Option<Manifest>)> {
        let stored = self.store.store(raw_name, reader)?;
        let manifest = if activate {
            Some(self.manifests.activate_stored(&stored)?)
        } else {
            None
        };
        Ok((stored, manifest))
    }

    /// Delete a bundle, dropping the manifest too if it pointed at it
    pub fn delete(&self, raw_name: &str) -> Result<bool> {
        let Some(name) = crate::sanitize::sanitize_nonempty(raw_name) else {
            return Ok(false);
        };
        let removed = self.store.delete(&name)?;
        if removed {
            self.manifests.clear_if_active(&name);
        }
        Ok(removed)
    }
}
