//! Resource version tracking for xDS.
//!
//! One version covers the whole resource set of a type URL. A version moves
//! only when that set changes, and the empty version means nothing has been
//! applied yet.

use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;

/// Version identifier for the resource set of one type URL.
///
/// # Example
///
/// ```rust
/// use xds_core::ResourceVersion;
///
/// let v1 = ResourceVersion::new("v1");
/// let empty = ResourceVersion::empty();
///
/// assert!(!v1.is_empty());
/// assert!(empty.is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Create a new resource version from a string.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Create an empty resource version (initial state).
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Derive a version from content.
    ///
    /// Feeds every chunk into an FNV-1a hasher, so equal chunk sequences
    /// always produce equal versions.
    #[must_use]
    pub fn from_content<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = FnvHasher::default();
        for chunk in chunks {
            hasher.write(chunk);
            // Separator keeps ["ab", "c"] and ["a", "bc"] apart.
            hasher.write_u8(0xff);
        }
        Self(format!("{:016x}", hasher.finish()))
    }

    /// Check if the version is empty (initial state).
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the version as a string slice.
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<ResourceVersion> for String {
    fn from(v: ResourceVersion) -> Self {
        v.0
    }
}

impl AsRef<str> for ResourceVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
