//! Per-type snapshot: an immutable version plus resource set.
//!
//! A snapshot is what a reader gets from the store. It is:
//!
//! - **Immutable**: never modified after construction, only replaced
//! - **Versioned**: one version covers every resource it holds
//! - **Shareable**: handed out as `Arc<TypeSnapshot>` to any number of sessions

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use xds_core::{Resource, ResourceVersion, TypeUrl, XdsError, XdsResult};

/// The applied version and resources of one type URL.
#[derive(Debug, Clone)]
pub struct TypeSnapshot {
    type_url: TypeUrl,
    version: ResourceVersion,
    /// Ordered by name so iteration and hashing are deterministic.
    resources: BTreeMap<String, Arc<Resource>>,
    created_at: Instant,
}

impl TypeSnapshot {
    /// Build a snapshot, rejecting duplicate names and foreign resource types.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Validation`] when two resources share a name, when
    /// a resource belongs to another type URL, or when `version` is empty.
    pub fn new(
        type_url: TypeUrl,
        version: ResourceVersion,
        resources: Vec<Resource>,
    ) -> XdsResult<Self> {
        if version.is_empty() {
            return Err(XdsError::validation(
                type_url.as_str(),
                "",
                "version cannot be empty",
            ));
        }

        let mut by_name = BTreeMap::new();
        for resource in resources {
            if resource.type_url() != type_url.as_str() {
                return Err(XdsError::validation(
                    type_url.as_str(),
                    resource.name(),
                    format!("resource of type {} in a {} set", resource.type_url(), type_url),
                ));
            }
            let name = resource.name().to_string();
            if by_name.insert(name.clone(), Arc::new(resource)).is_some() {
                return Err(XdsError::validation(
                    type_url.as_str(),
                    name,
                    "duplicate resource name",
                ));
            }
        }

        Ok(Self {
            type_url,
            version,
            resources: by_name,
            created_at: Instant::now(),
        })
    }

    /// Get the type URL.
    #[inline]
    #[must_use]
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// Get the version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> &ResourceVersion {
        &self.version
    }

    /// When this snapshot was built.
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get the number of resources.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if there are no resources.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Get a resource by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    /// Iterate over resources in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    /// Resource names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Resources of interest to a subscription.
    ///
    /// An empty name set selects every resource. Names with no resource are
    /// skipped.
    #[must_use]
    pub fn select(&self, names: &BTreeSet<String>) -> Vec<Arc<Resource>> {
        if names.is_empty() {
            return self.resources.values().cloned().collect();
        }
        names.iter().filter_map(|n| self.resources.get(n)).cloned().collect()
    }

    /// Whether both snapshots hold equal resources under equal names.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.resources.len() == other.resources.len()
            && self
                .resources
                .iter()
                .zip(other.resources.iter())
                .all(|((a_name, a), (b_name, b))| a_name == b_name && a == b)
    }
}
