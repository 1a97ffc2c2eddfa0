//! Validated cluster, endpoint and route models.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use xds_types::envoy::config::cluster::v3 as cluster_wire;
use xds_types::envoy::config::core::v3::SocketAddress;
use xds_types::envoy::config::endpoint::v3 as wire;
use xds_types::envoy::config::route::v3 as route_wire;

pub use xds_types::envoy::config::core::v3::HealthStatus;

use crate::{Locality, TypeUrl, XdsError, XdsResult};

/// Largest accepted endpoint weight.
pub const MAX_ENDPOINT_WEIGHT: u32 = 100;

/// A single upstream host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LbEndpoint {
    /// Host address.
    pub address: SocketAddr,
    /// Health as reported by the management plane.
    pub health_status: HealthStatus,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Weight in [1, 100]; `None` means uniform.
    pub load_balancing_weight: Option<u32>,
}

impl LbEndpoint {
    /// Whether the endpoint may receive traffic.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self.health_status, HealthStatus::Healthy | HealthStatus::Unknown)
    }
}

/// Endpoints of one locality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalityLbEndpoints {
    /// Where these endpoints run.
    pub locality: Locality,
    /// Hosts.
    pub lb_endpoints: Vec<LbEndpoint>,
    /// Locality weight, never zero when set.
    pub load_balancing_weight: Option<u32>,
}

impl LocalityLbEndpoints {
    /// Number of healthy endpoints.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.lb_endpoints.iter().filter(|e| e.is_healthy()).count()
    }

    /// Weight of each endpoint, in order. Endpoints without a weight count as 1.
    #[must_use]
    pub fn effective_weights(&self) -> Vec<u32> {
        self.lb_endpoints.iter().map(|e| e.load_balancing_weight.unwrap_or(1)).collect()
    }
}

/// Endpoints of one cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterLoadAssignment {
    /// Cluster these endpoints belong to.
    pub cluster_name: String,
    /// Primary endpoints.
    pub endpoints: Vec<LocalityLbEndpoints>,
    /// Used only when the primary set has no healthy endpoint.
    pub failover_endpoints: Vec<LocalityLbEndpoints>,
    /// Percentage of traffic to drop, in [0, 100].
    pub drop_overload: f64,
}

impl ClusterLoadAssignment {
    /// The endpoint set traffic should go to.
    ///
    /// The failover set replaces the primary set only when the primary set has
    /// no healthy endpoint and the failover set is non-empty.
    #[must_use]
    pub fn effective_endpoints(&self) -> &[LocalityLbEndpoints] {
        let primary_healthy: usize = self.endpoints.iter().map(|l| l.healthy_count()).sum();
        if primary_healthy == 0 && !self.failover_endpoints.is_empty() {
            &self.failover_endpoints
        } else {
            &self.endpoints
        }
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> XdsError {
    XdsError::validation(TypeUrl::ENDPOINT, name, reason)
}

fn parse_socket(cluster: &str, address: Option<SocketAddress>) -> XdsResult<SocketAddr> {
    let address = address.ok_or_else(|| invalid(cluster, "endpoint without address"))?;
    let ip: IpAddr = address
        .address
        .parse()
        .map_err(|e| invalid(cluster, format!("invalid endpoint address {:?}: {e}", address.address)))?;
    let port = u16::try_from(address.port_value)
        .map_err(|_| invalid(cluster, format!("port {} out of range", address.port_value)))?;
    Ok(SocketAddr::new(ip, port))
}

fn locality_from_wire(cluster: &str, l: wire::LocalityLbEndpoints) -> XdsResult<LocalityLbEndpoints> {
    if l.load_balancing_weight == Some(0) {
        return Err(invalid(cluster, "locality weight cannot be zero"));
    }
    let lb_endpoints = l
        .lb_endpoints
        .into_iter()
        .map(|e| {
            let health_status = e.health_status();
            if let Some(w) = e.load_balancing_weight {
                if !(1..=MAX_ENDPOINT_WEIGHT).contains(&w) {
                    return Err(invalid(cluster, format!("endpoint weight {w} outside [1, 100]")));
                }
            }
            Ok(LbEndpoint {
                address: parse_socket(cluster, e.address)?,
                health_status,
                metadata: e.metadata.into_iter().collect(),
                load_balancing_weight: e.load_balancing_weight,
            })
        })
        .collect::<XdsResult<Vec<_>>>()?;

    Ok(LocalityLbEndpoints {
        locality: l.locality.map(Locality::from).unwrap_or_default(),
        lb_endpoints,
        load_balancing_weight: l.load_balancing_weight,
    })
}

fn locality_to_wire(l: &LocalityLbEndpoints) -> wire::LocalityLbEndpoints {
    wire::LocalityLbEndpoints {
        locality: Some((&l.locality).into()),
        lb_endpoints: l
            .lb_endpoints
            .iter()
            .map(|e| wire::LbEndpoint {
                address: Some(SocketAddress {
                    address: e.address.ip().to_string(),
                    port_value: u32::from(e.address.port()),
                }),
                health_status: e.health_status as i32,
                metadata: e.metadata.clone().into_iter().collect(),
                load_balancing_weight: e.load_balancing_weight,
            })
            .collect(),
        load_balancing_weight: l.load_balancing_weight,
    }
}

impl TryFrom<wire::ClusterLoadAssignment> for ClusterLoadAssignment {
    type Error = XdsError;

    fn try_from(c: wire::ClusterLoadAssignment) -> XdsResult<Self> {
        if c.cluster_name.is_empty() {
            return Err(invalid("", "cluster name cannot be empty"));
        }
        let name = c.cluster_name;

        let drop_overload = c.policy.map(|p| p.drop_overload).unwrap_or(0.0);
        if !(0.0..=100.0).contains(&drop_overload) {
            return Err(invalid(&name, format!("drop_overload {drop_overload} outside [0, 100]")));
        }

        let endpoints = c
            .endpoints
            .into_iter()
            .map(|l| locality_from_wire(&name, l))
            .collect::<XdsResult<Vec<_>>>()?;
        let failover_endpoints = c
            .failover_endpoints
            .into_iter()
            .map(|l| locality_from_wire(&name, l))
            .collect::<XdsResult<Vec<_>>>()?;

        Ok(Self {
            cluster_name: name,
            endpoints,
            failover_endpoints,
            drop_overload,
        })
    }
}

impl From<&ClusterLoadAssignment> for wire::ClusterLoadAssignment {
    fn from(c: &ClusterLoadAssignment) -> Self {
        Self {
            cluster_name: c.cluster_name.clone(),
            endpoints: c.endpoints.iter().map(locality_to_wire).collect(),
            failover_endpoints: c.failover_endpoints.iter().map(locality_to_wire).collect(),
            policy: Some(wire::cluster_load_assignment::Policy {
                drop_overload: c.drop_overload,
            }),
        }
    }
}

/// Upstream cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    /// Cluster name.
    pub name: String,
    /// Load assignment name, when it differs from the cluster name.
    pub eds_service_name: Option<String>,
    /// Upstream connect timeout.
    pub connect_timeout: Duration,
}

impl Cluster {
    /// Name of the load assignment serving this cluster.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.eds_service_name.as_deref().unwrap_or(&self.name)
    }
}

impl TryFrom<cluster_wire::Cluster> for Cluster {
    type Error = XdsError;

    fn try_from(c: cluster_wire::Cluster) -> XdsResult<Self> {
        if c.name.is_empty() {
            return Err(XdsError::validation(TypeUrl::CLUSTER, "", "cluster name cannot be empty"));
        }
        Ok(Self {
            name: c.name,
            eds_service_name: Some(c.eds_service_name).filter(|s| !s.is_empty()),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
        })
    }
}

impl From<&Cluster> for cluster_wire::Cluster {
    fn from(c: &Cluster) -> Self {
        Self {
            name: c.name.clone(),
            eds_service_name: c.eds_service_name.clone().unwrap_or_default(),
            connect_timeout_ms: u64::try_from(c.connect_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A set of domains routed to one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualHost {
    /// Virtual host name.
    pub name: String,
    /// Domains served.
    pub domains: Vec<String>,
    /// Target cluster.
    pub cluster: String,
}

/// Route configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConfiguration {
    /// Route configuration name.
    pub name: String,
    /// Virtual hosts.
    pub virtual_hosts: Vec<VirtualHost>,
}

impl TryFrom<route_wire::RouteConfiguration> for RouteConfiguration {
    type Error = XdsError;

    fn try_from(r: route_wire::RouteConfiguration) -> XdsResult<Self> {
        if r.name.is_empty() {
            return Err(XdsError::validation(TypeUrl::ROUTE, "", "route name cannot be empty"));
        }
        let virtual_hosts = r
            .virtual_hosts
            .into_iter()
            .map(|v| {
                if v.name.is_empty() {
                    return Err(XdsError::validation(
                        TypeUrl::ROUTE,
                        r.name.as_str(),
                        "virtual host name cannot be empty",
                    ));
                }
                Ok(VirtualHost {
                    name: v.name,
                    domains: v.domains,
                    cluster: v.cluster,
                })
            })
            .collect::<XdsResult<Vec<_>>>()?;
        Ok(Self {
            name: r.name,
            virtual_hosts,
        })
    }
}

impl From<&RouteConfiguration> for route_wire::RouteConfiguration {
    fn from(r: &RouteConfiguration) -> Self {
        Self {
            name: r.name.clone(),
            virtual_hosts: r
                .virtual_hosts
                .iter()
                .map(|v| route_wire::VirtualHost {
                    name: v.name.clone(),
                    domains: v.domains.clone(),
                    cluster: v.cluster.clone(),
                })
                .collect(),
        }
    }
}
