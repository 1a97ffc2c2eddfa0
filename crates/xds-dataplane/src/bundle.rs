//! JSON resource bundles.
//!
//! A bundle holds complete resource sets in their wire shape, grouped by
//! kind. Loading validates every resource before anything is applied.

use std::path::Path;

use serde::{Deserialize, Serialize};
use xds_core::{
    Cluster, ClusterLoadAssignment, Listener, Resource, RouteConfiguration, TypeUrl, XdsError,
    XdsResult,
};
use xds_types::envoy::config::cluster::v3 as cluster_wire;
use xds_types::envoy::config::endpoint::v3 as endpoint_wire;
use xds_types::envoy::config::listener::v3 as listener_wire;
use xds_types::envoy::config::route::v3 as route_wire;

/// Resource sets keyed by kind, as authored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBundle {
    /// Listeners.
    pub listeners: Vec<listener_wire::Listener>,
    /// Clusters.
    pub clusters: Vec<cluster_wire::Cluster>,
    /// Endpoint assignments.
    pub endpoints: Vec<endpoint_wire::ClusterLoadAssignment>,
    /// Route configurations.
    pub routes: Vec<route_wire::RouteConfiguration>,
}

impl ResourceBundle {
    /// Parse a bundle from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::DecodingError`] for malformed JSON.
    pub fn from_json(json: &str) -> XdsResult<Self> {
        serde_json::from_str(json).map_err(|e| XdsError::DecodingError {
            type_url: String::new(),
            message: format!("invalid resource bundle: {e}"),
        })
    }

    /// Read and parse a bundle file.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Internal`] when the file cannot be read and
    /// [`XdsError::DecodingError`] when it does not parse.
    pub async fn load(path: impl AsRef<Path>) -> XdsResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| XdsError::internal(format!("reading {}", path.display()), e))?;
        Self::from_json(&json)
    }

    /// Validated resources of one type.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Validation`] for the first invalid resource and
    /// [`XdsError::InvalidTypeUrl`] for a type a bundle cannot hold.
    pub fn resources(&self, type_url: &str) -> XdsResult<Vec<Resource>> {
        match type_url {
            TypeUrl::LISTENER => convert::<_, Listener>(&self.listeners),
            TypeUrl::CLUSTER => convert::<_, Cluster>(&self.clusters),
            TypeUrl::ENDPOINT => convert::<_, ClusterLoadAssignment>(&self.endpoints),
            TypeUrl::ROUTE => convert::<_, RouteConfiguration>(&self.routes),
            other => Err(XdsError::InvalidTypeUrl {
                type_url: other.to_string(),
                reason: "not a bundle resource type".to_string(),
            }),
        }
    }

    /// Validated resources of every type, in a fixed type order.
    ///
    /// # Errors
    ///
    /// As [`ResourceBundle::resources`].
    pub fn all_resources(&self) -> XdsResult<Vec<(TypeUrl, Vec<Resource>)>> {
        [
            TypeUrl::CLUSTER,
            TypeUrl::ENDPOINT,
            TypeUrl::LISTENER,
            TypeUrl::ROUTE,
        ]
        .into_iter()
        .map(|type_url| Ok((TypeUrl::new(type_url), self.resources(type_url)?)))
        .collect()
    }
}

fn convert<W, D>(items: &[W]) -> XdsResult<Vec<Resource>>
where
    W: Clone,
    D: TryFrom<W, Error = XdsError> + Into<Resource>,
{
    items
        .iter()
        .cloned()
        .map(|item| D::try_from(item).map(Into::into))
        .collect()
}
