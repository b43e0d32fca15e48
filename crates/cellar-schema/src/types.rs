//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Slug of the shared template environment every target is cloned from.
pub const TEMPLATE_SLUG: &str = "default";

const MAX_SLUG_LEN: usize = 64;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }
    };
}

string_newtype!(
    /// Logical name of an environment, restricted to `[a-zA-Z0-9_-]{1,64}`.
    Slug
);

string_newtype!(
    /// Short blake3 prefix of a runtime's resolved launcher path.
    RuntimeFingerprint
);

impl Slug {
    /// Validate and wrap a slug.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        validate_slug(s)?;
        Ok(Self(s.to_owned()))
    }

    /// The reserved slug of the template environment.
    pub fn template() -> Self {
        Self(TEMPLATE_SLUG.to_owned())
    }

    pub fn is_template(&self) -> bool {
        self.0 == TEMPLATE_SLUG
    }
}

impl RuntimeFingerprint {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }
}

impl From<&str> for RuntimeFingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RuntimeFingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

pub fn validate_slug(slug: &str) -> Result<(), SchemaError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(SchemaError::InvalidSlug {
            slug: slug.to_owned(),
            reason: format!("must be 1-{MAX_SLUG_LEN} characters"),
        });
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(SchemaError::InvalidSlug {
            slug: slug.to_owned(),
            reason: "must match [a-zA-Z0-9_-]".to_owned(),
        });
    }
    Ok(())
}

/// Derive a slug from a free-form title.
///
/// Returns `None` when nothing usable remains (e.g. a title made only of symbols).
pub fn slugify(title: &str) -> Option<Slug> {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out.truncate(MAX_SLUG_LEN);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(Slug(trimmed.to_owned()))
    }
}
