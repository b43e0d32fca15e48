//! Identifiers, runtime fingerprints, and game launch records for Cellar.
//!
//! This crate defines the schema layer shared by every other crate: validated
//! environment slugs (`Slug`), short runtime fingerprints derived from a
//! runtime's resolved launcher path (`fingerprint_launcher`), and the records
//! exchanged with the surrounding launcher (`GameInfo`, `LaunchOptions`).

pub mod game;
pub mod identity;
pub mod types;

pub use game::{parse_launch_line, GameInfo, LaunchLine, LaunchOptions, DEFAULT_APP_ID};
pub use identity::{env_dir_name, fingerprint_launcher, FINGERPRINT_LEN};
pub use types::{slugify, validate_slug, RuntimeFingerprint, Slug, TEMPLATE_SLUG};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid environment slug '{slug}': {reason}")]
    InvalidSlug { slug: String, reason: String },
    #[error("slug '{0}' is reserved for the template environment")]
    ReservedSlug(String),
}
