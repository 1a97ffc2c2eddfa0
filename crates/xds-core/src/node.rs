//! Node identity for xDS.
//!
//! A [`Node`] is supplied once, on the first request of a stream, and is
//! immutable for the life of that stream. [`NodeHash`] is a compact key for
//! the node id used in logs and per-node bookkeeping.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use xds_types::envoy::config::core::v3 as wire;

use crate::{XdsError, XdsResult};

/// Region/zone/sub-zone triple identifying where a node or endpoint runs.
///
/// Empty components are wildcards at their level. Displayed as
/// `region:zone:sub_zone`, omitting trailing empty parts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Locality {
    /// Geographic region.
    pub region: String,
    /// Zone within the region.
    pub zone: String,
    /// Sub-zone within the zone.
    pub sub_zone: String,
}

impl Locality {
    /// Create a locality from its components.
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        sub_zone: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            sub_zone: sub_zone.into(),
        }
    }

    /// The locality with every component unset.
    #[must_use]
    pub fn unspecified() -> Self {
        Self::default()
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.region)?;
        if !self.zone.is_empty() || !self.sub_zone.is_empty() {
            write!(f, ":{}", self.zone)?;
        }
        if !self.sub_zone.is_empty() {
            write!(f, ":{}", self.sub_zone)?;
        }
        Ok(())
    }
}

impl From<wire::Locality> for Locality {
    fn from(l: wire::Locality) -> Self {
        Self {
            region: l.region,
            zone: l.zone,
            sub_zone: l.sub_zone,
        }
    }
}

impl From<&Locality> for wire::Locality {
    fn from(l: &Locality) -> Self {
        Self {
            region: l.region.clone(),
            zone: l.zone.clone(),
            sub_zone: l.sub_zone.clone(),
        }
    }
}

/// Identity of a data-plane instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    /// Opaque node identifier.
    pub id: String,
    /// Cluster the node belongs to.
    pub cluster: String,
    /// Where the node runs.
    pub locality: Locality,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Build version of the node software.
    pub build_version: String,
}

impl Node {
    /// Create a node with only an id set.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the cluster.
    #[must_use]
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    /// Set the locality.
    #[must_use]
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    /// Hash of the node id.
    #[must_use]
    pub fn hash(&self) -> NodeHash {
        NodeHash::from_id(&self.id)
    }
}

impl TryFrom<wire::Node> for Node {
    type Error = XdsError;

    fn try_from(node: wire::Node) -> XdsResult<Self> {
        if node.id.is_empty() {
            return Err(XdsError::validation("", "node", "node id cannot be empty"));
        }
        Ok(Self {
            id: node.id,
            cluster: node.cluster,
            locality: node.locality.map(Locality::from).unwrap_or_default(),
            metadata: node.metadata.into_iter().collect(),
            build_version: node.build_version,
        })
    }
}

impl From<&Node> for wire::Node {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            cluster: node.cluster.clone(),
            metadata: node.metadata.clone().into_iter().collect(),
            locality: Some((&node.locality).into()),
            build_version: node.build_version.clone(),
        }
    }
}

/// Hash-based node identifier.
///
/// `NodeHash` uses FNV-1a hashing to turn node ids into fixed-size keys.
///
/// # Example
///
/// ```rust
/// use xds_core::NodeHash;
///
/// let node1 = NodeHash::from_id("envoy-node-1");
/// let node2 = NodeHash::from_id("envoy-node-2");
/// assert_ne!(node1, node2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHash(u64);

impl NodeHash {
    /// Create a node hash from a node ID string.
    #[must_use]
    pub fn from_id(node_id: &str) -> Self {
        let mut hasher = FnvHasher::default();
        node_id.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Get the raw hash value.
    #[must_use]
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
