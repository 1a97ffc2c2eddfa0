//! # xds-types
//!
//! Wire messages for the xDS APIs.
//!
//! This crate holds the protobuf messages exchanged between a management
//! plane and its data-plane nodes:
//!
//! - Discovery envelope (`DiscoveryRequest`, `DiscoveryResponse`)
//! - Resource messages (`Listener`, `Cluster`, `ClusterLoadAssignment`,
//!   `RouteConfiguration`)
//! - Load reporting (`LoadStatsRequest`, `LoadStatsResponse`, `ClusterStats`)
//!
//! The messages are plain `prost` structs, so any transport that can carry
//! protobuf bytes can carry them. Resource messages also implement `serde`
//! so that configuration can be authored as JSON.
//!
//! These types are unvalidated. `xds-core` turns them into the validated
//! resource model.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)] // Field docs mirror the upstream API

pub use prost::Message;
pub use prost_types::Any;

pub mod envoy {
    //! Envoy xDS types.

    pub mod config {
        //! Configuration messages.

        pub mod core {
            //! Core configuration types.

            pub mod v3 {
                //! Core v3 API.

                use std::collections::HashMap;

                use serde::{Deserialize, Serialize};

                /// Identity of a data-plane node.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct Node {
                    /// Opaque node identifier.
                    #[prost(string, tag = "1")]
                    pub id: String,
                    /// Cluster the node belongs to.
                    #[prost(string, tag = "2")]
                    pub cluster: String,
                    /// Free-form metadata.
                    #[prost(map = "string, string", tag = "3")]
                    pub metadata: HashMap<String, String>,
                    /// Where the node runs.
                    #[prost(message, optional, tag = "4")]
                    pub locality: Option<Locality>,
                    /// Build version of the node software.
                    #[prost(string, tag = "5")]
                    pub build_version: String,
                }

                /// Region/zone/sub-zone triple.
                #[derive(Clone, PartialEq, Eq, Hash, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct Locality {
                    #[prost(string, tag = "1")]
                    pub region: String,
                    #[prost(string, tag = "2")]
                    pub zone: String,
                    #[prost(string, tag = "3")]
                    pub sub_zone: String,
                }

                /// IP socket address.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct SocketAddress {
                    #[prost(string, tag = "1")]
                    pub address: String,
                    #[prost(uint32, tag = "2")]
                    pub port_value: u32,
                }

                /// CIDR range: an address prefix plus a prefix length.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct CidrRange {
                    #[prost(string, tag = "1")]
                    pub address_prefix: String,
                    #[prost(uint32, tag = "2")]
                    pub prefix_len: u32,
                }

                /// Identifier of the management plane that produced a response.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct ControlPlane {
                    #[prost(string, tag = "1")]
                    pub identifier: String,
                }

                /// Endpoint health as seen by the management plane.
                #[derive(
                    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
                )]
                #[repr(i32)]
                pub enum HealthStatus {
                    Unknown = 0,
                    Healthy = 1,
                    Unhealthy = 2,
                    Draining = 3,
                    Timeout = 4,
                    Degraded = 5,
                }
            }
        }

        pub mod listener {
            //! Listener configuration.

            pub mod v3 {
                //! Listener v3 API.

                use serde::{Deserialize, Serialize};

                use super::super::core::v3::{CidrRange, SocketAddress};

                /// Listener configuration.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct Listener {
                    #[prost(string, tag = "1")]
                    pub name: String,
                    /// Address the listener binds to.
                    #[prost(message, optional, tag = "2")]
                    pub address: Option<SocketAddress>,
                    /// Candidate filter chains, in declaration order.
                    #[prost(message, repeated, tag = "3")]
                    pub filter_chains: Vec<FilterChain>,
                    /// Select chains by the connection's original destination.
                    #[prost(bool, optional, tag = "4")]
                    pub use_original_dst: Option<bool>,
                    #[prost(uint32, optional, tag = "5")]
                    pub per_connection_buffer_limit_bytes: Option<u32>,
                    /// Legacy field, kept for compatibility only.
                    #[prost(bool, optional, tag = "6")]
                    pub bind_to_port: Option<bool>,
                }

                /// A match predicate plus the filters it selects.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct FilterChain {
                    #[prost(message, optional, tag = "1")]
                    pub filter_chain_match: Option<FilterChainMatch>,
                    #[prost(message, optional, tag = "2")]
                    pub tls_context: Option<DownstreamTlsContext>,
                    #[prost(message, repeated, tag = "3")]
                    pub filters: Vec<Filter>,
                    #[prost(string, tag = "7")]
                    pub name: String,
                }

                /// Connection criteria for a filter chain. Unset fields match anything.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct FilterChainMatch {
                    #[prost(string, repeated, tag = "1")]
                    pub server_names: Vec<String>,
                    #[prost(message, repeated, tag = "3")]
                    pub prefix_ranges: Vec<CidrRange>,
                    #[prost(string, tag = "4")]
                    pub address_suffix: String,
                    #[prost(uint32, optional, tag = "5")]
                    pub suffix_len: Option<u32>,
                    #[prost(message, repeated, tag = "6")]
                    pub source_prefix_ranges: Vec<CidrRange>,
                    #[prost(uint32, repeated, tag = "7")]
                    pub source_ports: Vec<u32>,
                    #[prost(uint32, optional, tag = "8")]
                    pub destination_port: Option<u32>,
                }

                /// A network filter: a name plus opaque configuration.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct Filter {
                    #[prost(string, tag = "1")]
                    pub name: String,
                    #[prost(bytes = "vec", tag = "2")]
                    pub config: Vec<u8>,
                    /// Legacy v1 filter type, kept for compatibility only.
                    #[prost(message, optional, tag = "3")]
                    pub deprecated_v1: Option<filter::DeprecatedV1>,
                }

                pub mod filter {
                    //! Filter sub-types.

                    use serde::{Deserialize, Serialize};

                    /// Legacy v1 filter description.
                    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                    #[serde(default)]
                    pub struct DeprecatedV1 {
                        #[prost(string, tag = "1")]
                        pub r#type: String,
                    }
                }

                /// TLS server context for a filter chain. The handshake itself is
                /// performed elsewhere.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct DownstreamTlsContext {
                    #[prost(string, tag = "1")]
                    pub certificate_name: String,
                    #[prost(bool, tag = "2")]
                    pub require_client_certificate: bool,
                    #[prost(string, repeated, tag = "3")]
                    pub alpn_protocols: Vec<String>,
                }
            }
        }

        pub mod cluster {
            //! Cluster configuration.

            pub mod v3 {
                //! Cluster v3 API.

                use serde::{Deserialize, Serialize};

                /// Upstream cluster configuration.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct Cluster {
                    #[prost(string, tag = "1")]
                    pub name: String,
                    /// Name used to look up the cluster's load assignment.
                    #[prost(string, tag = "2")]
                    pub eds_service_name: String,
                    #[prost(uint64, tag = "3")]
                    pub connect_timeout_ms: u64,
                }
            }
        }

        pub mod route {
            //! Route configuration.

            pub mod v3 {
                //! Route v3 API.

                use serde::{Deserialize, Serialize};

                /// Route configuration.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct RouteConfiguration {
                    #[prost(string, tag = "1")]
                    pub name: String,
                    #[prost(message, repeated, tag = "2")]
                    pub virtual_hosts: Vec<VirtualHost>,
                }

                /// A set of domains routed to one cluster.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct VirtualHost {
                    #[prost(string, tag = "1")]
                    pub name: String,
                    #[prost(string, repeated, tag = "2")]
                    pub domains: Vec<String>,
                    #[prost(string, tag = "3")]
                    pub cluster: String,
                }
            }
        }

        pub mod endpoint {
            //! Endpoint configuration and load reports.

            pub mod v3 {
                //! Endpoint v3 API.

                use std::collections::HashMap;

                use serde::{Deserialize, Serialize};

                use super::super::core::v3::{Locality, SocketAddress};

                /// Endpoints of one cluster.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct ClusterLoadAssignment {
                    #[prost(string, tag = "1")]
                    pub cluster_name: String,
                    /// Primary endpoints.
                    #[prost(message, repeated, tag = "2")]
                    pub endpoints: Vec<LocalityLbEndpoints>,
                    /// Used only when the primary set has no healthy endpoint.
                    #[prost(message, repeated, tag = "3")]
                    pub failover_endpoints: Vec<LocalityLbEndpoints>,
                    #[prost(message, optional, tag = "4")]
                    pub policy: Option<cluster_load_assignment::Policy>,
                }

                pub mod cluster_load_assignment {
                    //! Load assignment sub-types.

                    use serde::{Deserialize, Serialize};

                    /// Load balancing policy.
                    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                    #[serde(default)]
                    pub struct Policy {
                        /// Percentage of traffic to drop, in [0, 100].
                        #[prost(double, tag = "1")]
                        pub drop_overload: f64,
                    }
                }

                /// Endpoints of one locality.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct LocalityLbEndpoints {
                    #[prost(message, optional, tag = "1")]
                    pub locality: Option<Locality>,
                    #[prost(message, repeated, tag = "2")]
                    pub lb_endpoints: Vec<LbEndpoint>,
                    #[prost(uint32, optional, tag = "3")]
                    pub load_balancing_weight: Option<u32>,
                }

                /// A single upstream host.
                #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
                #[serde(default)]
                pub struct LbEndpoint {
                    #[prost(message, optional, tag = "1")]
                    pub address: Option<SocketAddress>,
                    #[prost(
                        enumeration = "super::super::core::v3::HealthStatus",
                        tag = "2"
                    )]
                    pub health_status: i32,
                    #[prost(map = "string, string", tag = "3")]
                    pub metadata: HashMap<String, String>,
                    /// Weight in [1, 100].
                    #[prost(uint32, optional, tag = "4")]
                    pub load_balancing_weight: Option<u32>,
                }

                /// Per-cluster load report.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct ClusterStats {
                    #[prost(string, tag = "1")]
                    pub cluster_name: String,
                    #[prost(message, repeated, tag = "2")]
                    pub upstream_locality_stats: Vec<UpstreamLocalityStats>,
                    #[prost(uint64, tag = "3")]
                    pub total_dropped_requests: u64,
                    /// Time covered by this report.
                    #[prost(message, optional, tag = "4")]
                    pub load_report_interval: Option<::prost_types::Duration>,
                }

                /// Per-locality request counters.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct UpstreamLocalityStats {
                    #[prost(message, optional, tag = "1")]
                    pub locality: Option<Locality>,
                    #[prost(uint64, tag = "2")]
                    pub total_successful_requests: u64,
                    #[prost(uint64, tag = "3")]
                    pub total_requests_in_progress: u64,
                    #[prost(uint64, tag = "4")]
                    pub total_error_requests: u64,
                    #[prost(message, repeated, tag = "5")]
                    pub load_metric_stats: Vec<EndpointLoadMetricStats>,
                    #[prost(uint64, tag = "6")]
                    pub total_issued_requests: u64,
                }

                /// Accumulated values of one named metric.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct EndpointLoadMetricStats {
                    #[prost(string, tag = "1")]
                    pub metric_name: String,
                    #[prost(uint64, tag = "2")]
                    pub num_requests_finished_with_metric: u64,
                    #[prost(double, tag = "3")]
                    pub total_metric_value: f64,
                }
            }
        }
    }

    pub mod service {
        //! Service envelopes.

        pub mod discovery {
            //! Discovery service definitions.

            pub mod v3 {
                //! Discovery service v3 API.

                use super::super::super::config::core::v3::{ControlPlane, Node};

                /// Discovery request sent by a node.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct DiscoveryRequest {
                    /// Last version the node applied (empty on first request).
                    #[prost(string, tag = "1")]
                    pub version_info: String,
                    #[prost(message, optional, tag = "2")]
                    pub node: Option<Node>,
                    /// Requested resource names (empty for all).
                    #[prost(string, repeated, tag = "3")]
                    pub resource_names: Vec<String>,
                    #[prost(string, tag = "4")]
                    pub type_url: String,
                    /// Nonce of the response this request answers.
                    #[prost(string, tag = "5")]
                    pub response_nonce: String,
                    /// Set when the node rejects the previous response.
                    #[prost(message, optional, tag = "6")]
                    pub error_detail: Option<crate::google::rpc::Status>,
                }

                /// Discovery response sent by the management plane.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct DiscoveryResponse {
                    #[prost(string, tag = "1")]
                    pub version_info: String,
                    #[prost(message, repeated, tag = "2")]
                    pub resources: Vec<::prost_types::Any>,
                    /// Whether this push is experimental.
                    #[prost(bool, tag = "3")]
                    pub canary: bool,
                    #[prost(string, tag = "4")]
                    pub type_url: String,
                    #[prost(string, tag = "5")]
                    pub nonce: String,
                    #[prost(message, optional, tag = "6")]
                    pub control_plane: Option<ControlPlane>,
                }
            }
        }

        pub mod load_stats {
            //! Load reporting service definitions.

            pub mod v3 {
                //! Load reporting v3 API.

                use super::super::super::config::core::v3::Node;
                use super::super::super::config::endpoint::v3::ClusterStats;

                /// Load report sent by a node.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct LoadStatsRequest {
                    #[prost(message, optional, tag = "1")]
                    pub node: Option<Node>,
                    #[prost(message, repeated, tag = "2")]
                    pub cluster_stats: Vec<ClusterStats>,
                }

                /// Reporting instructions from the management plane.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct LoadStatsResponse {
                    /// Clusters to report on.
                    #[prost(string, repeated, tag = "1")]
                    pub clusters: Vec<String>,
                    #[prost(message, optional, tag = "2")]
                    pub load_reporting_interval: Option<::prost_types::Duration>,
                }
            }
        }
    }
}

pub mod google {
    //! Google API types.

    pub mod rpc {
        //! gRPC status types.

        /// Status carried by a NACK.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Status {
            #[prost(int32, tag = "1")]
            pub code: i32,
            #[prost(string, tag = "2")]
            pub message: String,
            #[prost(message, repeated, tag = "3")]
            pub details: Vec<::prost_types::Any>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::envoy::config::core::v3::{CidrRange, HealthStatus};
    use super::envoy::config::endpoint::v3::LbEndpoint;
    use super::envoy::config::listener::v3::{FilterChain, FilterChainMatch, Listener};
    use super::Message;

    #[test]
    fn listener_survives_wire_encoding() {
        let listener = Listener {
            name: "ingress".to_string(),
            filter_chains: vec![FilterChain {
                filter_chain_match: Some(FilterChainMatch {
                    server_names: vec!["*.example.com".to_string()],
                    prefix_ranges: vec![CidrRange {
                        address_prefix: "10.0.0.0".to_string(),
                        prefix_len: 8,
                    }],
                    destination_port: Some(443),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            use_original_dst: Some(true),
            ..Default::default()
        };

        let bytes = listener.encode_to_vec();
        let decoded = Listener::decode(bytes.as_slice()).expect("decode listener");
        assert_eq!(decoded, listener);
    }

    #[test]
    fn listener_parses_from_sparse_json() {
        let json = r#"{
            "name": "ingress",
            "address": { "address": "0.0.0.0", "port_value": 8443 },
            "filter_chains": [ { "filters": [ { "name": "tcp_proxy" } ] } ]
        }"#;

        let listener: Listener = serde_json::from_str(json).expect("parse listener");
        assert_eq!(listener.name, "ingress");
        assert_eq!(listener.filter_chains.len(), 1);
        assert!(listener.filter_chains[0].filter_chain_match.is_none());
        assert!(listener.use_original_dst.is_none());
    }

    #[test]
    fn health_status_accessor() {
        let endpoint = LbEndpoint {
            health_status: HealthStatus::Draining as i32,
            ..Default::default()
        };
        assert_eq!(endpoint.health_status(), HealthStatus::Draining);
    }
}
