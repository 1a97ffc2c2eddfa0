//! Filter chain selection.
//!
//! A listener's chains are narrowed stage by stage. Each stage scores the
//! remaining candidates, drops those that fail the criterion and keeps only
//! the best-scoring ones:
//!
//! 1. Server name (SNI)
//! 2. Destination prefix
//! 3. Source prefix, then source port, then destination port
//! 4. Destination address suffix
//!
//! Stages 1 and 2 always run. The later stages only break ties: once a
//! single candidate is left it is selected as is. Chains still tied after
//! the last stage resolve to the first in declaration order. An empty
//! candidate set at any stage is a miss; the matcher never falls back to a
//! default chain.

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use tracing::trace;
use xds_core::{FilterChain, FilterChainMatch, Listener};

/// What is known about a connection when it is accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Peer address.
    pub source: SocketAddr,
    /// Address the connection was accepted on.
    pub destination: SocketAddr,
    /// Server name from the TLS client hello.
    pub server_name: Option<String>,
    /// Destination before redirection, when the platform reports one.
    pub original_destination: Option<SocketAddr>,
}

impl ConnectionMetadata {
    /// Metadata of a plain connection without SNI.
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            source,
            destination,
            server_name: None,
            original_destination: None,
        }
    }

    /// Attach the presented server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Attach the pre-redirection destination.
    #[must_use]
    pub fn with_original_destination(mut self, destination: SocketAddr) -> Self {
        self.original_destination = Some(destination);
        self
    }
}

/// Stage score; higher is more specific, `None` eliminates the chain.
type Score = Option<u32>;

/// Selects the filter chain of one listener for a connection.
///
/// Selection is pure: the same listener and metadata always yield the same
/// chain.
#[derive(Debug, Clone, Copy)]
pub struct FilterChainMatcher<'a> {
    listener: &'a Listener,
}

impl<'a> FilterChainMatcher<'a> {
    /// Create a matcher over `listener`'s chains.
    pub fn new(listener: &'a Listener) -> Self {
        Self { listener }
    }

    /// The chain selected for `conn`, or `None` when no chain matches.
    pub fn select(&self, conn: &ConnectionMetadata) -> Option<&'a FilterChain> {
        self.select_index(conn)
            .map(|index| &self.listener.filter_chains[index])
    }

    /// Index of the chain selected for `conn` in declaration order.
    pub fn select_index(&self, conn: &ConnectionMetadata) -> Option<usize> {
        let destination = self.destination(conn);
        let dst_ip = destination.ip();
        let src_ip = conn.source.ip();
        let server_name = conn.server_name.as_deref().map(normalize_server_name);

        let by_server_name = |m: &FilterChainMatch| server_name_score(m, server_name.as_deref());
        let by_destination_prefix = |m: &FilterChainMatch| prefix_score(&m.prefix_ranges, dst_ip);
        let by_source_prefix = |m: &FilterChainMatch| prefix_score(&m.source_prefix_ranges, src_ip);
        let by_source_port = |m: &FilterChainMatch| source_port_score(m, conn.source.port());
        let by_destination_port =
            |m: &FilterChainMatch| destination_port_score(m, destination.port());
        let by_suffix = |m: &FilterChainMatch| suffix_score(m, dst_ip);

        let filters: [(&str, &dyn Fn(&FilterChainMatch) -> Score); 2] = [
            ("server_name", &by_server_name),
            ("destination_prefix", &by_destination_prefix),
        ];
        let tie_breaks: [(&str, &dyn Fn(&FilterChainMatch) -> Score); 4] = [
            ("source_prefix", &by_source_prefix),
            ("source_port", &by_source_port),
            ("destination_port", &by_destination_port),
            ("address_suffix", &by_suffix),
        ];

        let mut candidates: Vec<usize> = (0..self.listener.filter_chains.len()).collect();
        for (index, (stage, score)) in filters.into_iter().chain(tie_breaks).enumerate() {
            if index >= filters.len() && candidates.len() == 1 {
                break;
            }
            candidates = self.narrow(candidates, score);
            if candidates.is_empty() {
                trace!(listener = %self.listener.name, stage, "no filter chain matched");
                return None;
            }
        }
        candidates.first().copied()
    }

    /// Destination used for destination criteria.
    fn destination(&self, conn: &ConnectionMetadata) -> SocketAddr {
        match conn.original_destination {
            Some(original) if self.listener.use_original_dst => original,
            _ => conn.destination,
        }
    }

    fn narrow(
        &self,
        candidates: Vec<usize>,
        score: &dyn Fn(&FilterChainMatch) -> Score,
    ) -> Vec<usize> {
        let scored: Vec<(usize, u32)> = candidates
            .into_iter()
            .filter_map(|index| {
                score(&self.listener.filter_chains[index].filter_chain_match).map(|s| (index, s))
            })
            .collect();
        let Some(best) = scored.iter().map(|&(_, s)| s).max() else {
            return Vec::new();
        };
        scored
            .into_iter()
            .filter(|&(_, s)| s == best)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Lowercase with any trailing root dot removed.
fn normalize_server_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// With SNI, only chains naming it survive; without, only chains naming none.
fn server_name_score(m: &FilterChainMatch, server_name: Option<&str>) -> Score {
    match server_name {
        Some(name) => m
            .server_names
            .iter()
            .filter_map(|pattern| pattern.specificity(name))
            .max()
            .map(|s| u32::try_from(s).unwrap_or(u32::MAX)),
        None => m.server_names.is_empty().then_some(0),
    }
}

/// Longest containing prefix; no ranges counts as a zero-length match.
fn prefix_score(ranges: &[IpNet], ip: IpAddr) -> Score {
    if ranges.is_empty() {
        return Some(0);
    }
    ranges
        .iter()
        .filter(|range| range.contains(&ip))
        .map(|range| u32::from(range.prefix_len()))
        .max()
}

fn source_port_score(m: &FilterChainMatch, port: u16) -> Score {
    if m.source_ports.is_empty() {
        Some(0)
    } else {
        m.source_ports.contains(&port).then_some(1)
    }
}

fn destination_port_score(m: &FilterChainMatch, port: u16) -> Score {
    match m.destination_port {
        None => Some(0),
        Some(expected) => (expected == port).then_some(1),
    }
}

fn suffix_score(m: &FilterChainMatch, ip: IpAddr) -> Score {
    match &m.address_suffix {
        None => Some(0),
        Some(suffix) => suffix.matches(ip).then_some(u32::from(suffix.len)),
    }
}
