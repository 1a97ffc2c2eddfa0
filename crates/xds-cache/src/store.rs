//! The resource version store.
//!
//! [`ResourceVersionStore`] is the authoritative record of what is applied
//! per type URL. Each type URL maps to one `Arc<TypeSnapshot>` that is
//! replaced whole on apply, so a reader either sees the complete old set or
//! the complete new one.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};
use xds_core::{Resource, ResourceVersion, TypeUrl, XdsError, XdsResult};

use crate::snapshot::TypeSnapshot;
use crate::stats::StoreStats;
use crate::watch::WatchManager;

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot was replaced and watches were notified.
    Applied,
    /// The same version with the same content was already applied.
    Unchanged,
}

/// Authoritative per-type store of applied resources.
///
/// ## Thread Safety
///
/// All operations are thread-safe. The check-and-replace of an apply runs
/// under the `DashMap` entry lock for its type URL, and watch notification
/// happens only after that lock is released.
#[derive(Debug)]
pub struct ResourceVersionStore {
    snapshots: DashMap<TypeUrl, Arc<TypeSnapshot>>,
    watches: WatchManager,
    stats: StoreStats,
}

impl Default for ResourceVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceVersionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_watch_buffer(16)
    }

    /// Create an empty store whose watches buffer `size` updates.
    pub fn with_watch_buffer(size: usize) -> Self {
        Self {
            snapshots: DashMap::new(),
            watches: WatchManager::with_buffer_size(size),
            stats: StoreStats::new(),
        }
    }

    /// Get the watch manager.
    #[inline]
    pub fn watches(&self) -> &WatchManager {
        &self.watches
    }

    /// Get store statistics.
    #[inline]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Replace the resource set of `type_url`.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Validation`] for duplicate names, resources of
    /// another type, an empty version, or a version that is already applied
    /// with different content. A failed apply leaves the store untouched.
    pub fn apply(
        &self,
        type_url: impl Into<TypeUrl>,
        version: impl Into<ResourceVersion>,
        resources: Vec<Resource>,
    ) -> XdsResult<ApplyOutcome> {
        let type_url = type_url.into();
        let candidate = match TypeSnapshot::new(type_url.clone(), version.into(), resources) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                self.stats.record_rejected();
                warn!(type_url = %type_url, error = %e, "rejected resource set");
                return Err(e);
            }
        };

        // Entry guard is dropped at the end of this block, before notify.
        let outcome = match self.snapshots.entry(type_url.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.version() != candidate.version() {
                    entry.insert(Arc::clone(&candidate));
                    Ok(ApplyOutcome::Applied)
                } else if current.same_content(&candidate) {
                    Ok(ApplyOutcome::Unchanged)
                } else {
                    Err(XdsError::validation(
                        type_url.as_str(),
                        "",
                        format!("version {} already applied with different content", candidate.version()),
                    ))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&candidate));
                Ok(ApplyOutcome::Applied)
            }
        };

        match outcome {
            Ok(ApplyOutcome::Applied) => {
                self.stats.record_applied();
                debug!(
                    type_url = %type_url,
                    version = %candidate.version(),
                    resources = candidate.len(),
                    "applied resource set"
                );
                let delivered = self.watches.notify(&type_url, candidate);
                self.stats.record_notifications(delivered as u64);
            }
            Ok(ApplyOutcome::Unchanged) => {
                self.stats.record_unchanged();
                trace!(type_url = %type_url, version = %candidate.version(), "resource set unchanged");
            }
            Err(ref e) => {
                self.stats.record_rejected();
                warn!(type_url = %type_url, error = %e, "rejected resource set");
            }
        }
        outcome
    }

    /// Apply with a version derived from the content.
    ///
    /// Identical content always yields the identical version, so re-applying
    /// an unchanged set is [`ApplyOutcome::Unchanged`].
    ///
    /// # Errors
    ///
    /// As [`ResourceVersionStore::apply`].
    pub fn apply_versioned(
        &self,
        type_url: impl Into<TypeUrl>,
        mut resources: Vec<Resource>,
    ) -> XdsResult<(ResourceVersion, ApplyOutcome)> {
        resources.sort_by(|a, b| a.name().cmp(b.name()));
        let encoded: Vec<Vec<u8>> = resources.iter().map(|r| r.encode().value).collect();
        let version = ResourceVersion::from_content(
            resources
                .iter()
                .map(|r| r.name().as_bytes())
                .zip(encoded.iter().map(Vec::as_slice))
                .flat_map(|(name, bytes)| [name, bytes]),
        );
        let outcome = self.apply(type_url, version.clone(), resources)?;
        Ok((version, outcome))
    }

    /// Current snapshot of `type_url`, if anything has been applied.
    pub fn snapshot(&self, type_url: &str) -> Option<Arc<TypeSnapshot>> {
        self.stats.record_read();
        // Clone the Arc and drop the Ref immediately.
        self.snapshots.get(type_url).map(|r| Arc::clone(&*r))
    }

    /// Current version of `type_url`; empty when nothing has been applied.
    pub fn version(&self, type_url: &str) -> ResourceVersion {
        self.snapshots
            .get(type_url)
            .map(|r| r.version().clone())
            .unwrap_or_default()
    }

    /// Type URLs with an applied snapshot.
    pub fn type_urls(&self) -> Vec<TypeUrl> {
        let mut urls: Vec<_> = self.snapshots.iter().map(|r| r.key().clone()).collect();
        urls.sort();
        urls
    }
}
