//! # xds-core
//!
//! Core types and error handling shared by the management plane and the
//! data plane.
//!
//! - [`XdsError`] - Error taxonomy with gRPC status code mapping
//! - [`ResourceVersion`] - Coarse per-type version
//! - [`Node`], [`Locality`], [`NodeHash`] - Node identity
//! - [`Resource`] - Tagged union over the served resource kinds
//! - [`ResourceRegistry`] - Type URL to decoder mapping
//! - [`TypeUrl`] - Type URL handling and constants
//!
//! ## Example
//!
//! ```rust
//! use xds_core::{NodeHash, ResourceRegistry, ResourceVersion, TypeUrl};
//!
//! let node = NodeHash::from_id("my-envoy-node");
//! let version = ResourceVersion::new("v1");
//! let registry = ResourceRegistry::with_default_types();
//!
//! assert!(!version.is_empty());
//! assert!(registry.contains(TypeUrl::LISTENER));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoint;
mod error;
mod listener;
mod node;
mod resource;
mod type_url;
mod version;

pub use endpoint::{
    Cluster, ClusterLoadAssignment, HealthStatus, LbEndpoint, LocalityLbEndpoints,
    RouteConfiguration, VirtualHost, MAX_ENDPOINT_WEIGHT,
};
pub use error::XdsError;
pub use listener::{
    AddressSuffix, Filter, FilterChain, FilterChainMatch, Listener, ServerNameMatch, TlsContext,
};
pub use node::{Locality, Node, NodeHash};
pub use resource::{DecodeFn, Resource, ResourceRegistry, ResourceTypeInfo};
pub use type_url::TypeUrl;
pub use version::ResourceVersion;

/// Result type alias using [`XdsError`].
pub type Result<T> = std::result::Result<T, XdsError>;

/// Result alias used throughout the workspace.
pub type XdsResult<T> = Result<T>;
