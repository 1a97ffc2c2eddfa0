//! # meridian-xds
//!
//! xDS management plane and data plane building blocks.
//!
//! - Versioned per-type resource store with change watches
//! - Discovery sessions with ACK/NACK tracking, multiplexed over one
//!   aggregated stream or served per type
//! - Load reporting, on both sides of the stream
//! - Filter chain selection for accepted connections
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use meridian_xds::prelude::*;
//!
//! let store = Arc::new(ResourceVersionStore::new());
//! store.apply(TypeUrl::CLUSTER, "v1", vec![]).unwrap();
//!
//! let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
//! let _ads = server.ads();
//! ```
//!
//! ## Architecture
//!
//! - `xds-types` - Wire messages
//! - `xds-core` - Domain types, registry and errors
//! - `xds-cache` - Resource version store
//! - `xds-server` - Sessions, multiplexer and services
//! - `xds-dataplane` - Matcher, load stats, reporter and discovery client
//!
//! This crate re-exports all of them.
//!
//! ## Design Principles
//!
//! 1. **No panics in library code** - All errors are returned as `Result`
//! 2. **No locks held across await points** - Snapshots are shared as `Arc`
//! 3. **All or nothing** - A rejected update leaves the previous state in effect
//! 4. **Observable** - Metrics through the `metrics` facade, logs through `tracing`

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use xds_cache as cache;
pub use xds_core as core;
pub use xds_dataplane as dataplane;
pub use xds_server as server;
pub use xds_types as types;

/// Prelude module for convenient imports.
///
/// ```rust
/// use meridian_xds::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use xds_core::{
        Cluster, ClusterLoadAssignment, FilterChain, FilterChainMatch, Listener, Locality, Node,
        NodeHash, Resource, ResourceRegistry, ResourceVersion, RouteConfiguration, TypeUrl,
        XdsError, XdsResult,
    };

    // Store types
    pub use xds_cache::{ApplyOutcome, ResourceVersionStore, TypeSnapshot};

    // Management plane types
    pub use xds_server::{
        DiscoveryMultiplexer, DiscoverySession, ServerConfig, SessionPolicy, XdsServer,
        XdsServerBuilder,
    };

    // Data plane types
    pub use xds_dataplane::{
        ChainSelection, ConnectionMetadata, ConnectionRouter, DiscoveryClient,
        FilterChainMatcher, LoadReporter, LoadStatsAggregator, ResourceBundle,
    };
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.75";

    /// Get version info as a string.
    pub fn version_string() -> String {
        format!("meridian-xds {VERSION} (MSRV {MSRV})")
    }
}
