//! Data-plane bootstrap configuration.
//!
//! The bootstrap names the node and, per resource type, where that type's
//! configuration comes from. Sources are resolved once at load time.
//!
//! ```rust
//! use xds_core::TypeUrl;
//! use xds_dataplane::{Bootstrap, ConfigSource};
//!
//! let bootstrap = Bootstrap::from_json(r#"{
//!     "node": { "id": "edge-1", "cluster": "edge" },
//!     "sources": {
//!         "type.googleapis.com/envoy.config.listener.v3.Listener": { "kind": "ads" },
//!         "type.googleapis.com/envoy.config.cluster.v3.Cluster":
//!             { "kind": "path", "path": "/etc/meridian/clusters.json" }
//!     }
//! }"#).unwrap();
//!
//! let sources = bootstrap.resolve().unwrap();
//! assert_eq!(sources.len(), 2);
//! assert_eq!(sources[1].1, ConfigSource::Ads);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xds_core::{Locality, Node, ResourceRegistry, TypeUrl, XdsError, XdsResult};

/// Where one resource type's configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigSource {
    /// A resource bundle on disk, reloaded when it changes.
    Path {
        /// Bundle location.
        path: PathBuf,
    },
    /// A fetch endpoint polled on a fixed delay.
    Api {
        /// Delay between polls.
        #[serde(rename = "refresh_delay_ms", with = "millis")]
        refresh_delay: Duration,
    },
    /// The aggregated discovery stream.
    Ads,
}

/// Node identity as written in the bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identifier; required.
    pub id: String,
    /// Cluster the node belongs to.
    pub cluster: String,
    /// Where the node runs.
    pub locality: Locality,
}

/// Load reporting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReportingConfig {
    /// Management cluster that receives load reports.
    pub cluster: String,
}

/// Data-plane bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    /// Node identity.
    pub node: NodeConfig,
    /// Configuration source per type URL.
    #[serde(default)]
    pub sources: BTreeMap<String, ConfigSource>,
    /// Load reporting, when enabled.
    #[serde(default)]
    pub load_reporting: Option<LoadReportingConfig>,
}

impl Bootstrap {
    /// Parse a bootstrap from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Configuration`] for malformed JSON.
    pub fn from_json(json: &str) -> XdsResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| XdsError::Configuration(format!("invalid bootstrap: {e}")))
    }

    /// Read and parse a bootstrap file.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Configuration`] when the file cannot be read or
    /// parsed.
    pub async fn load(path: impl AsRef<Path>) -> XdsResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            XdsError::Configuration(format!("reading bootstrap {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Domain node built from the bootstrap identity.
    pub fn node(&self) -> Node {
        Node::new(self.node.id.clone())
            .with_cluster(self.node.cluster.clone())
            .with_locality(self.node.locality.clone())
    }

    /// Validate the bootstrap and return its sources, ordered by type URL.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Configuration`] for an empty node id, a type URL
    /// without a registered decoder, a zero refresh delay, or load
    /// reporting without a cluster.
    pub fn resolve(&self) -> XdsResult<Vec<(TypeUrl, ConfigSource)>> {
        if self.node.id.is_empty() {
            return Err(XdsError::Configuration("node id must be set".into()));
        }
        if let Some(lrs) = &self.load_reporting {
            if lrs.cluster.is_empty() {
                return Err(XdsError::Configuration(
                    "load reporting requires a cluster".into(),
                ));
            }
        }

        let registry = ResourceRegistry::with_default_types();
        self.sources
            .iter()
            .map(|(type_url, source)| {
                if !registry.contains(type_url) {
                    return Err(XdsError::Configuration(format!(
                        "no resource type registered for {type_url}"
                    )));
                }
                if let ConfigSource::Api { refresh_delay } = source {
                    if refresh_delay.is_zero() {
                        return Err(XdsError::Configuration(format!(
                            "refresh delay for {type_url} must be non-zero"
                        )));
                    }
                }
                Ok((TypeUrl::new(type_url.clone()), source.clone()))
            })
            .collect()
    }

    /// Type URLs served over the aggregated stream.
    pub fn ads_types(&self) -> Vec<TypeUrl> {
        self.sources
            .iter()
            .filter(|(_, source)| matches!(source, ConfigSource::Ads))
            .map(|(type_url, _)| TypeUrl::new(type_url.clone()))
            .collect()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
