//! # xds-cache
//!
//! Versioned resource store for xDS.
//!
//! - [`ResourceVersionStore`] - Authoritative per-type record of applied resources
//! - [`TypeSnapshot`] - Immutable version plus resource set of one type URL
//! - [`WatchManager`] - Per-type change notifications
//!
//! ## Key Design Decisions
//!
//! - One `Arc<TypeSnapshot>` per type URL, replaced whole on apply
//! - Readers clone the `Arc` and never block writers
//! - All `DashMap` references are dropped before watches are notified
//! - A rejected apply leaves the previous snapshot in effect
//!
//! ## Example
//!
//! ```rust
//! use xds_cache::{ApplyOutcome, ResourceVersionStore};
//! use xds_core::TypeUrl;
//!
//! let store = ResourceVersionStore::new();
//! assert!(store.version(TypeUrl::LISTENER).is_empty());
//!
//! let outcome = store.apply(TypeUrl::LISTENER, "v1", vec![]).unwrap();
//! assert_eq!(outcome, ApplyOutcome::Applied);
//! assert_eq!(store.version(TypeUrl::LISTENER).as_str(), "v1");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod snapshot;
mod stats;
mod store;
mod watch;

pub use snapshot::TypeSnapshot;
pub use stats::StoreStats;
pub use store::{ApplyOutcome, ResourceVersionStore};
pub use watch::{PendingUpdates, Watch, WatchId, WatchManager};
