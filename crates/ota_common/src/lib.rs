//! Shared storage core for the OTA bundle server.

pub mod bundle_store;
pub mod config;
pub mod error;
pub mod fs_util;
pub mod manifest;
pub mod sanitize;
pub mod service;

pub use bundle_store::{BundleFile, BundleStore, BundleWriter, StoredBundle};
pub use config::ServerConfig;
pub use error::{OtaError, Result};
pub use manifest::{Manifest, ManifestTracker};
pub use sanitize::sanitize;
pub use service::BundleService;
