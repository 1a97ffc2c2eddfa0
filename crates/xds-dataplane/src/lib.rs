//! # xds-dataplane
//!
//! Node side of xDS.
//!
//! - [`FilterChainMatcher`] - Most-specific filter chain for a connection
//! - [`ConnectionRouter`] - Chain selection against the local store
//! - [`LoadStatsAggregator`] - Per cluster and locality request accounting
//! - [`LoadReporter`] - Periodic load reports on the interval the
//!   management plane asks for
//! - [`DiscoveryClient`] - Applies pushes and answers with ACK or NACK
//! - [`Bootstrap`], [`FileSource`], [`ApiPoller`] - Where configuration
//!   comes from when it is not pushed
//!
//! ## Example
//!
//! ```rust
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use xds_cache::ResourceVersionStore;
//! use xds_dataplane::{ChainSelection, ConnectionMetadata, ConnectionRouter, ResourceBundle};
//! use xds_core::TypeUrl;
//!
//! let bundle = ResourceBundle::from_json(r#"{
//!     "listeners": [{
//!         "name": "ingress",
//!         "address": { "address": "0.0.0.0", "port_value": 443 },
//!         "filter_chains": [
//!             {
//!                 "name": "api",
//!                 "filter_chain_match": { "server_names": ["api.example.com"] },
//!                 "filters": [{ "name": "envoy.filters.network.http_connection_manager" }]
//!             },
//!             { "name": "default", "filters": [{ "name": "envoy.filters.network.tcp_proxy" }] }
//!         ]
//!     }]
//! }"#).unwrap();
//!
//! let store = Arc::new(ResourceVersionStore::new());
//! store
//!     .apply_versioned(TypeUrl::LISTENER, bundle.resources(TypeUrl::LISTENER).unwrap())
//!     .unwrap();
//!
//! let router = ConnectionRouter::new(store);
//! let source: SocketAddr = "192.0.2.7:40000".parse().unwrap();
//! let destination: SocketAddr = "10.0.0.1:443".parse().unwrap();
//! let conn = ConnectionMetadata::new(source, destination).with_server_name("api.example.com");
//!
//! match router.select("ingress", &conn) {
//!     ChainSelection::Selected(selected) => assert_eq!(selected.chain.name, "api"),
//!     other => panic!("unexpected selection: {other:?}"),
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod bundle;
pub mod client;
pub mod load_stats;
pub mod matcher;
pub mod reporter;
pub mod router;
pub mod source;

pub use bootstrap::{Bootstrap, ConfigSource, LoadReportingConfig, NodeConfig};
pub use bundle::ResourceBundle;
pub use client::{DiscoveryClient, ResponseDisposition};
pub use load_stats::{LoadStatsAggregator, RequestOutcome};
pub use matcher::{ConnectionMetadata, FilterChainMatcher};
pub use reporter::{LoadReporter, DEFAULT_REPORTING_INTERVAL};
pub use router::{ChainSelection, ConnectionRouter, SelectedChain};
pub use source::{ApiPoller, Fetcher, FileSource};
