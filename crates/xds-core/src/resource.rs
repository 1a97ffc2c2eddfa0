//! Resource model and registry.
//!
//! [`Resource`] is a closed union over the resource kinds this workspace
//! serves. [`ResourceRegistry`] maps a type URL to the function that decodes
//! and validates a payload of that type; it is the single entry point from
//! opaque `Any` payloads into the validated model.

use std::collections::HashMap;
use std::fmt;

use prost::Message;
use prost_types::Any;
use xds_types::envoy::config::cluster::v3 as cluster_wire;
use xds_types::envoy::config::endpoint::v3 as endpoint_wire;
use xds_types::envoy::config::listener::v3 as listener_wire;
use xds_types::envoy::config::route::v3 as route_wire;

use crate::{
    Cluster, ClusterLoadAssignment, Listener, RouteConfiguration, TypeUrl, XdsError, XdsResult,
};

/// A validated xDS resource.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    /// Listener (LDS).
    Listener(Listener),
    /// Cluster (CDS).
    Cluster(Cluster),
    /// Endpoint assignment (EDS).
    ClusterLoadAssignment(ClusterLoadAssignment),
    /// Route configuration (RDS).
    RouteConfiguration(RouteConfiguration),
}

impl Resource {
    /// Type URL of this resource.
    #[must_use]
    pub fn type_url(&self) -> &'static str {
        match self {
            Self::Listener(_) => TypeUrl::LISTENER,
            Self::Cluster(_) => TypeUrl::CLUSTER,
            Self::ClusterLoadAssignment(_) => TypeUrl::ENDPOINT,
            Self::RouteConfiguration(_) => TypeUrl::ROUTE,
        }
    }

    /// Resource name, unique within its type URL.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Listener(l) => &l.name,
            Self::Cluster(c) => &c.name,
            Self::ClusterLoadAssignment(c) => &c.cluster_name,
            Self::RouteConfiguration(r) => &r.name,
        }
    }

    /// Encode to a protobuf `Any`.
    #[must_use]
    pub fn encode(&self) -> Any {
        let value = match self {
            Self::Listener(l) => listener_wire::Listener::from(l).encode_to_vec(),
            Self::Cluster(c) => cluster_wire::Cluster::from(c).encode_to_vec(),
            Self::ClusterLoadAssignment(c) => {
                endpoint_wire::ClusterLoadAssignment::from(c).encode_to_vec()
            }
            Self::RouteConfiguration(r) => route_wire::RouteConfiguration::from(r).encode_to_vec(),
        };
        Any {
            type_url: self.type_url().to_string(),
            value,
        }
    }

    /// The listener, if this is one.
    #[must_use]
    pub fn as_listener(&self) -> Option<&Listener> {
        match self {
            Self::Listener(l) => Some(l),
            _ => None,
        }
    }

    /// The endpoint assignment, if this is one.
    #[must_use]
    pub fn as_cluster_load_assignment(&self) -> Option<&ClusterLoadAssignment> {
        match self {
            Self::ClusterLoadAssignment(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Listener> for Resource {
    fn from(l: Listener) -> Self {
        Self::Listener(l)
    }
}

impl From<Cluster> for Resource {
    fn from(c: Cluster) -> Self {
        Self::Cluster(c)
    }
}

impl From<ClusterLoadAssignment> for Resource {
    fn from(c: ClusterLoadAssignment) -> Self {
        Self::ClusterLoadAssignment(c)
    }
}

impl From<RouteConfiguration> for Resource {
    fn from(r: RouteConfiguration) -> Self {
        Self::RouteConfiguration(r)
    }
}

/// Decodes and validates one `Any` payload.
pub type DecodeFn = fn(&Any) -> XdsResult<Resource>;

/// Information about a registered resource type.
#[derive(Clone)]
pub struct ResourceTypeInfo {
    /// The type URL.
    pub type_url: TypeUrl,
    /// Short name for the type.
    pub short_name: &'static str,
    /// Description of the resource type.
    pub description: &'static str,
    /// Decoder for payloads of this type.
    pub decode: DecodeFn,
}

impl fmt::Debug for ResourceTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTypeInfo")
            .field("type_url", &self.type_url)
            .field("short_name", &self.short_name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

fn decode_message<M: Message + Default>(any: &Any) -> XdsResult<M> {
    M::decode(any.value.as_slice()).map_err(|e| XdsError::DecodingError {
        type_url: any.type_url.clone(),
        message: e.to_string(),
    })
}

fn decode_listener(any: &Any) -> XdsResult<Resource> {
    decode_message::<listener_wire::Listener>(any)
        .and_then(Listener::try_from)
        .map(Resource::Listener)
}

fn decode_cluster(any: &Any) -> XdsResult<Resource> {
    decode_message::<cluster_wire::Cluster>(any)
        .and_then(Cluster::try_from)
        .map(Resource::Cluster)
}

fn decode_cluster_load_assignment(any: &Any) -> XdsResult<Resource> {
    decode_message::<endpoint_wire::ClusterLoadAssignment>(any)
        .and_then(ClusterLoadAssignment::try_from)
        .map(Resource::ClusterLoadAssignment)
}

fn decode_route(any: &Any) -> XdsResult<Resource> {
    decode_message::<route_wire::RouteConfiguration>(any)
        .and_then(RouteConfiguration::try_from)
        .map(Resource::RouteConfiguration)
}

/// Registry for resource types.
///
/// # Example
///
/// ```rust
/// use xds_core::{ResourceRegistry, TypeUrl};
///
/// let registry = ResourceRegistry::with_default_types();
/// assert!(registry.contains(TypeUrl::LISTENER));
/// assert!(!registry.contains("type.googleapis.com/unknown.Type"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct ResourceRegistry {
    types: HashMap<TypeUrl, ResourceTypeInfo>,
}

impl ResourceRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with Listener, Cluster, ClusterLoadAssignment and RouteConfiguration.
    #[must_use]
    pub fn with_default_types() -> Self {
        let mut registry = Self::new();

        registry.register(ResourceTypeInfo {
            type_url: TypeUrl::new(TypeUrl::LISTENER),
            short_name: "Listener",
            description: "Listener Discovery Service (LDS)",
            decode: decode_listener,
        });

        registry.register(ResourceTypeInfo {
            type_url: TypeUrl::new(TypeUrl::CLUSTER),
            short_name: "Cluster",
            description: "Cluster Discovery Service (CDS)",
            decode: decode_cluster,
        });

        registry.register(ResourceTypeInfo {
            type_url: TypeUrl::new(TypeUrl::ENDPOINT),
            short_name: "ClusterLoadAssignment",
            description: "Endpoint Discovery Service (EDS)",
            decode: decode_cluster_load_assignment,
        });

        registry.register(ResourceTypeInfo {
            type_url: TypeUrl::new(TypeUrl::ROUTE),
            short_name: "RouteConfiguration",
            description: "Route Discovery Service (RDS)",
            decode: decode_route,
        });

        registry
    }

    /// Register a resource type, replacing any previous entry.
    pub fn register(&mut self, info: ResourceTypeInfo) {
        self.types.insert(info.type_url.clone(), info);
    }

    /// Get information about a resource type by type URL.
    #[must_use]
    pub fn get(&self, type_url: &str) -> Option<&ResourceTypeInfo> {
        self.types.get(type_url)
    }

    /// Check if a type URL is registered.
    #[must_use]
    pub fn contains(&self, type_url: &str) -> bool {
        self.types.contains_key(type_url)
    }

    /// All registered type URLs, sorted.
    #[must_use]
    pub fn type_urls(&self) -> Vec<&TypeUrl> {
        let mut urls: Vec<_> = self.types.keys().collect();
        urls.sort();
        urls
    }

    /// Get the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Decode and validate one payload.
    ///
    /// # Errors
    ///
    /// `InvalidTypeUrl` for unregistered types, `DecodingError` for bytes
    /// that do not parse, `Validation` for well-formed but invalid resources.
    pub fn decode(&self, any: &Any) -> XdsResult<Resource> {
        let info = self.get(&any.type_url).ok_or_else(|| XdsError::InvalidTypeUrl {
            type_url: any.type_url.clone(),
            reason: "no decoder registered".to_string(),
        })?;
        (info.decode)(any)
    }

    /// Decode a whole response payload. Fails on the first bad resource.
    ///
    /// # Errors
    ///
    /// As [`ResourceRegistry::decode`], plus `InvalidTypeUrl` when a payload's
    /// type differs from `type_url`.
    pub fn decode_all(&self, type_url: &str, resources: &[Any]) -> XdsResult<Vec<Resource>> {
        resources
            .iter()
            .map(|any| {
                if any.type_url != type_url {
                    return Err(XdsError::InvalidTypeUrl {
                        type_url: any.type_url.clone(),
                        reason: format!("expected {type_url}"),
                    });
                }
                self.decode(any)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn cluster(name: &str) -> Resource {
        Resource::Cluster(Cluster {
            name: name.to_string(),
            eds_service_name: None,
            connect_timeout: Duration::from_secs(1),
        })
    }

    #[test]
    fn test_registry_with_default_types() {
        let registry = ResourceRegistry::with_default_types();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get(TypeUrl::ENDPOINT).map(|i| i.short_name), Some("ClusterLoadAssignment"));
        assert_eq!(registry.type_urls()[0].as_str(), TypeUrl::CLUSTER);
    }

    #[test]
    fn test_encode_decode_through_registry() {
        let registry = ResourceRegistry::with_default_types();
        let resource = cluster("backend");

        let any = resource.encode();
        assert_eq!(any.type_url, TypeUrl::CLUSTER);
        assert_eq!(registry.decode(&any).unwrap(), resource);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let registry = ResourceRegistry::with_default_types();
        let any = Any {
            type_url: "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret".into(),
            value: vec![],
        };
        assert!(matches!(registry.decode(&any), Err(XdsError::InvalidTypeUrl { .. })));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let registry = ResourceRegistry::with_default_types();
        let any = Any {
            type_url: TypeUrl::LISTENER.into(),
            value: vec![0xff, 0xff, 0xff],
        };
        assert!(matches!(registry.decode(&any), Err(XdsError::DecodingError { .. })));
    }

    #[test]
    fn test_decode_all_checks_type() {
        let registry = ResourceRegistry::with_default_types();
        let payload = vec![cluster("a").encode()];
        assert!(registry.decode_all(TypeUrl::CLUSTER, &payload).is_ok());
        assert!(registry.decode_all(TypeUrl::LISTENER, &payload).is_err());
    }

    #[test]
    fn test_empty_name_is_validation_error() {
        let registry = ResourceRegistry::with_default_types();
        let any = Any {
            type_url: TypeUrl::CLUSTER.into(),
            value: cluster_wire::Cluster::default().encode_to_vec(),
        };
        assert!(matches!(registry.decode(&any), Err(XdsError::Validation { .. })));
    }
}
