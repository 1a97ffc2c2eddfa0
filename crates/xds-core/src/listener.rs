//! Validated listener model.
//!
//! [`Listener`] is built from the wire message with `TryFrom`, which is where
//! every structural check happens: CIDR ranges parse and fit their address
//! family, SNI patterns are well-formed, ports fit in 16 bits and no two
//! chains of one listener carry the same match predicate. Code downstream of
//! the conversion can rely on those properties without checking again.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use ipnet::IpNet;
use xds_types::envoy::config::core::v3::{CidrRange, SocketAddress};
use xds_types::envoy::config::listener::v3 as wire;

use crate::{TypeUrl, XdsError, XdsResult};

fn invalid(name: &str, reason: impl fmt::Display) -> XdsError {
    XdsError::validation(TypeUrl::LISTENER, name, reason.to_string())
}

/// Width of an address family in bits.
#[inline]
fn family_bits(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Listener configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    /// Unique listener name.
    pub name: String,
    /// Address the listener binds to.
    pub address: SocketAddr,
    /// Candidate chains in declaration order.
    pub filter_chains: Vec<FilterChain>,
    /// Use the connection's original destination for chain selection.
    pub use_original_dst: bool,
    /// Per-connection buffer limit.
    pub per_connection_buffer_limit_bytes: Option<u32>,
    /// Legacy bind flag. Carried through, never consulted.
    pub bind_to_port: Option<bool>,
}

impl Listener {
    /// Chain by name.
    #[must_use]
    pub fn filter_chain(&self, name: &str) -> Option<&FilterChain> {
        self.filter_chains.iter().find(|c| c.name == name)
    }
}

/// A match predicate plus the filters it selects.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterChain {
    /// Optional chain name, used in logs.
    pub name: String,
    /// Connection criteria.
    pub filter_chain_match: FilterChainMatch,
    /// Filters, executed in order.
    pub filters: Vec<Filter>,
    /// TLS server context, if the chain terminates TLS.
    pub tls_context: Option<TlsContext>,
}

impl FilterChain {
    /// A chain with no filters cannot serve a connection.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// A network filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    /// Filter name.
    pub name: String,
    /// Opaque filter configuration.
    pub config: Vec<u8>,
    /// Legacy v1 filter type. Carried through, never consulted.
    pub deprecated_v1_type: Option<String>,
}

/// TLS server context of a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsContext {
    /// Name of the certificate to present.
    pub certificate_name: String,
    /// Whether clients must present a certificate.
    pub require_client_certificate: bool,
    /// ALPN protocols offered.
    pub alpn_protocols: Vec<String>,
}

/// SNI pattern: an exact host name or a single leading wildcard label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServerNameMatch {
    /// Matches the host name exactly.
    Exact(String),
    /// `*.example.com`, stored as the suffix `.example.com`.
    Wildcard(String),
}

impl ServerNameMatch {
    /// Score of `server_name` against this pattern, `None` when it does not match.
    ///
    /// Exact matches outrank every wildcard; among wildcards the longer
    /// suffix is the more specific one. `server_name` must be lowercase
    /// with no trailing dot.
    #[must_use]
    pub fn specificity(&self, server_name: &str) -> Option<usize> {
        match self {
            Self::Exact(name) => (name == server_name).then_some(usize::MAX),
            Self::Wildcard(suffix) => {
                let matched =
                    server_name.len() > suffix.len() && server_name.ends_with(suffix.as_str());
                matched.then_some(suffix.len())
            }
        }
    }
}

impl FromStr for ServerNameMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('.');
        if s.is_empty() {
            return Err("empty server name".to_string());
        }
        let (wildcard, rest) = match s.strip_prefix("*.") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if rest.is_empty() || rest.contains('*') {
            return Err(format!(
                "invalid server name {s:?}: wildcards may only appear as a leading '*.'"
            ));
        }
        let rest = rest.to_ascii_lowercase();
        Ok(if wildcard {
            Self::Wildcard(format!(".{rest}"))
        } else {
            Self::Exact(rest)
        })
    }
}

impl fmt::Display for ServerNameMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Wildcard(suffix) => write!(f, "*{suffix}"),
        }
    }
}

/// Destination address suffix: the low `len` bits of an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressSuffix {
    /// Address supplying the suffix bits.
    pub address: IpAddr,
    /// Number of low bits compared.
    pub len: u8,
}

impl AddressSuffix {
    /// Whether the low `len` bits of `ip` equal the suffix.
    ///
    /// Addresses of another family never match.
    #[must_use]
    pub fn matches(&self, ip: IpAddr) -> bool {
        match (self.address, ip) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let mask = u32::MAX.checked_shr(32 - u32::from(self.len)).unwrap_or(0);
                u32::from(a) & mask == u32::from(b) & mask
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let mask = u128::MAX.checked_shr(128 - u32::from(self.len)).unwrap_or(0);
                u128::from(a) & mask == u128::from(b) & mask
            }
            _ => false,
        }
    }
}

/// Connection criteria for a chain. Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FilterChainMatch {
    /// SNI patterns; empty means the chain is for connections without SNI.
    pub server_names: Vec<ServerNameMatch>,
    /// Destination CIDR ranges.
    pub prefix_ranges: Vec<IpNet>,
    /// Destination address suffix.
    pub address_suffix: Option<AddressSuffix>,
    /// Source CIDR ranges.
    pub source_prefix_ranges: Vec<IpNet>,
    /// Source ports.
    pub source_ports: BTreeSet<u16>,
    /// Destination port.
    pub destination_port: Option<u16>,
}

fn parse_cidr(listener: &str, range: &CidrRange) -> XdsResult<IpNet> {
    let ip: IpAddr = range.address_prefix.parse().map_err(|e| {
        invalid(listener, format_args!("invalid CIDR address {:?}: {e}", range.address_prefix))
    })?;
    let len = u8::try_from(range.prefix_len)
        .ok()
        .filter(|len| *len <= family_bits(&ip))
        .ok_or_else(|| {
            invalid(
                listener,
                format_args!("prefix length {} too long for {ip}", range.prefix_len),
            )
        })?;
    IpNet::new(ip, len)
        .map(|net| net.trunc())
        .map_err(|e| invalid(listener, format_args!("invalid CIDR {ip}/{len}: {e}")))
}

fn parse_port(listener: &str, port: u32) -> XdsResult<u16> {
    u16::try_from(port).map_err(|_| invalid(listener, format_args!("port {port} out of range")))
}

impl FilterChainMatch {
    fn from_wire(listener: &str, m: wire::FilterChainMatch) -> XdsResult<Self> {
        let server_names = m
            .server_names
            .iter()
            .map(|s| s.parse::<ServerNameMatch>().map_err(|e| invalid(listener, e)))
            .collect::<XdsResult<Vec<_>>>()?;

        let prefix_ranges = m
            .prefix_ranges
            .iter()
            .map(|r| parse_cidr(listener, r))
            .collect::<XdsResult<Vec<_>>>()?;

        let source_prefix_ranges = m
            .source_prefix_ranges
            .iter()
            .map(|r| parse_cidr(listener, r))
            .collect::<XdsResult<Vec<_>>>()?;

        let address_suffix = if m.address_suffix.is_empty() {
            None
        } else {
            let address: IpAddr = m.address_suffix.parse().map_err(|e| {
                invalid(listener, format_args!("invalid address suffix {:?}: {e}", m.address_suffix))
            })?;
            let bits = family_bits(&address);
            let len = match m.suffix_len {
                None => bits,
                Some(len) => u8::try_from(len).ok().filter(|l| *l <= bits).ok_or_else(|| {
                    invalid(listener, format_args!("suffix length {len} too long for {address}"))
                })?,
            };
            Some(AddressSuffix { address, len })
        };

        let source_ports = m
            .source_ports
            .iter()
            .map(|p| parse_port(listener, *p))
            .collect::<XdsResult<BTreeSet<_>>>()?;

        let destination_port = m.destination_port.map(|p| parse_port(listener, p)).transpose()?;

        Ok(Self {
            server_names,
            prefix_ranges,
            address_suffix,
            source_prefix_ranges,
            source_ports,
            destination_port,
        })
    }
}

fn cidr_to_wire(net: &IpNet) -> CidrRange {
    CidrRange {
        address_prefix: net.addr().to_string(),
        prefix_len: u32::from(net.prefix_len()),
    }
}

impl From<&FilterChainMatch> for wire::FilterChainMatch {
    fn from(m: &FilterChainMatch) -> Self {
        Self {
            server_names: m.server_names.iter().map(ToString::to_string).collect(),
            prefix_ranges: m.prefix_ranges.iter().map(cidr_to_wire).collect(),
            address_suffix: m.address_suffix.map(|s| s.address.to_string()).unwrap_or_default(),
            suffix_len: m.address_suffix.map(|s| u32::from(s.len)),
            source_prefix_ranges: m.source_prefix_ranges.iter().map(cidr_to_wire).collect(),
            source_ports: m.source_ports.iter().map(|p| u32::from(*p)).collect(),
            destination_port: m.destination_port.map(u32::from),
        }
    }
}

impl TryFrom<wire::Listener> for Listener {
    type Error = XdsError;

    fn try_from(l: wire::Listener) -> XdsResult<Self> {
        if l.name.is_empty() {
            return Err(invalid("", "listener name cannot be empty"));
        }
        let name = l.name;

        let address = match l.address {
            Some(SocketAddress {
                address,
                port_value,
            }) => {
                let ip: IpAddr = address.parse().map_err(|e| {
                    invalid(&name, format_args!("invalid bind address {address:?}: {e}"))
                })?;
                SocketAddr::new(ip, parse_port(&name, port_value)?)
            }
            None => return Err(invalid(&name, "missing bind address")),
        };

        if l.filter_chains.is_empty() {
            return Err(invalid(&name, "listener has no filter chains"));
        }

        let mut seen = HashSet::with_capacity(l.filter_chains.len());
        let mut filter_chains = Vec::with_capacity(l.filter_chains.len());
        for chain in l.filter_chains {
            let filter_chain_match =
                FilterChainMatch::from_wire(&name, chain.filter_chain_match.unwrap_or_default())?;
            if !seen.insert(filter_chain_match.clone()) {
                return Err(invalid(
                    &name,
                    format_args!("multiple filter chains with the same match: {filter_chain_match:?}"),
                ));
            }

            let filters = chain
                .filters
                .into_iter()
                .map(|f| {
                    if f.name.is_empty() {
                        return Err(invalid(&name, "filter name cannot be empty"));
                    }
                    Ok(Filter {
                        name: f.name,
                        config: f.config,
                        deprecated_v1_type: f.deprecated_v1.map(|d| d.r#type),
                    })
                })
                .collect::<XdsResult<Vec<_>>>()?;

            filter_chains.push(FilterChain {
                name: chain.name,
                filter_chain_match,
                filters,
                tls_context: chain.tls_context.map(|t| TlsContext {
                    certificate_name: t.certificate_name,
                    require_client_certificate: t.require_client_certificate,
                    alpn_protocols: t.alpn_protocols,
                }),
            });
        }

        Ok(Self {
            name,
            address,
            filter_chains,
            use_original_dst: l.use_original_dst.unwrap_or(false),
            per_connection_buffer_limit_bytes: l.per_connection_buffer_limit_bytes,
            bind_to_port: l.bind_to_port,
        })
    }
}

impl From<&Listener> for wire::Listener {
    fn from(l: &Listener) -> Self {
        Self {
            name: l.name.clone(),
            address: Some(SocketAddress {
                address: l.address.ip().to_string(),
                port_value: u32::from(l.address.port()),
            }),
            filter_chains: l
                .filter_chains
                .iter()
                .map(|c| wire::FilterChain {
                    filter_chain_match: Some((&c.filter_chain_match).into()),
                    tls_context: c.tls_context.as_ref().map(|t| wire::DownstreamTlsContext {
                        certificate_name: t.certificate_name.clone(),
                        require_client_certificate: t.require_client_certificate,
                        alpn_protocols: t.alpn_protocols.clone(),
                    }),
                    filters: c
                        .filters
                        .iter()
                        .map(|f| wire::Filter {
                            name: f.name.clone(),
                            config: f.config.clone(),
                            deprecated_v1: f
                                .deprecated_v1_type
                                .clone()
                                .map(|r#type| wire::filter::DeprecatedV1 { r#type }),
                        })
                        .collect(),
                    name: c.name.clone(),
                })
                .collect(),
            use_original_dst: l.use_original_dst.then_some(true),
            per_connection_buffer_limit_bytes: l.per_connection_buffer_limit_bytes,
            bind_to_port: l.bind_to_port,
        }
    }
}
