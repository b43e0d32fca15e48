//! Provisioning service for Cellar compatibility environments.
//!
//! This crate ties the schema, store, and runtime layers together into the
//! `Provisioner`: the API the surrounding launcher calls to pick a runtime,
//! keep the shared template prefix current, clone per-game prefixes from it,
//! run prerequisite and bundled installers, and produce launch specs.
//! Concurrent identical requests are collapsed by a single-flight coordinator.

pub mod config;
pub mod deps;
pub mod packages;
pub mod progress;
pub mod provisioner;
pub mod single_flight;

pub use config::CellarConfig;
pub use deps::DependencyInstaller;
pub use packages::{
    classify_installer, find_installers, install_extra_components, InstallerKind,
    PackageInstaller, PackageReport,
};
pub use progress::{Progress, ProgressFn};
pub use provisioner::{
    EnvironmentReport, LaunchReport, Provisioner, ProvisionerBuilder, StageReport,
};
pub use single_flight::SingleFlight;

use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the provisioning service.
///
/// `Clone` so that every caller attached to one in-flight operation receives
/// the same outcome; non-clonable sources are held behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("no compatibility runtime found")]
    NoRuntime,
    #[error("schema error: {0}")]
    Schema(#[from] cellar_schema::SchemaError),
    #[error("store error: {0}")]
    Store(Arc<cellar_store::StoreError>),
    #[error("runtime error: {0}")]
    Runtime(Arc<cellar_runtime::RuntimeError>),
    #[error("environment '{path}' belongs to '{existing}', not '{slug}'")]
    SlugCollision {
        slug: String,
        existing: String,
        path: String,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("provisioning task failed: {0}")]
    TaskFailed(String),
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<cellar_store::StoreError> for CoreError {
    fn from(e: cellar_store::StoreError) -> Self {
        CoreError::Store(Arc::new(e))
    }
}

impl From<cellar_runtime::RuntimeError> for CoreError {
    fn from(e: cellar_runtime::RuntimeError) -> Self {
        CoreError::Runtime(Arc::new(e))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
