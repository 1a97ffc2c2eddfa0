//! Connection routing against the applied listeners.

use std::sync::Arc;

use metrics::counter;
use tracing::debug;
use xds_cache::ResourceVersionStore;
use xds_core::{FilterChain, ResourceVersion, TypeUrl};

use crate::matcher::{ConnectionMetadata, FilterChainMatcher};

/// A chain chosen for a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedChain {
    /// Listener the chain belongs to.
    pub listener: String,
    /// Listener version the selection was made against.
    pub version: ResourceVersion,
    /// Position of the chain in the listener.
    pub index: usize,
    /// The chain itself.
    pub chain: FilterChain,
}

/// Outcome of routing one connection.
///
/// Every outcome except [`ChainSelection::Selected`] means the caller
/// closes the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainSelection {
    /// A chain with filters was selected.
    Selected(SelectedChain),
    /// No chain matched the connection.
    NoMatch,
    /// The matching chain has no filters.
    EmptyFilterChain,
    /// No listener of that name is applied.
    UnknownListener,
}

impl ChainSelection {
    /// Short label of the outcome, used as a metric label.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Selected(_) => "selected",
            Self::NoMatch => "no_match",
            Self::EmptyFilterChain => "empty_filter_chain",
            Self::UnknownListener => "unknown_listener",
        }
    }

    /// The selected chain, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&SelectedChain> {
        match self {
            Self::Selected(selected) => Some(selected),
            _ => None,
        }
    }
}

/// Routes accepted connections to filter chains.
///
/// Each call loads the listener snapshot once, so a concurrent apply never
/// changes the chain list under an in-flight selection.
#[derive(Debug, Clone)]
pub struct ConnectionRouter {
    store: Arc<ResourceVersionStore>,
}

impl ConnectionRouter {
    /// Create a router reading listeners from `store`.
    pub fn new(store: Arc<ResourceVersionStore>) -> Self {
        Self { store }
    }

    /// Select the chain of `listener` for `conn`.
    pub fn select(&self, listener: &str, conn: &ConnectionMetadata) -> ChainSelection {
        let selection = self.select_inner(listener, conn);
        counter!(
            "dataplane_filter_chain_selections_total",
            "outcome" => selection.outcome()
        )
        .increment(1);
        debug!(
            listener,
            source = %conn.source,
            destination = %conn.destination,
            server_name = conn.server_name.as_deref().unwrap_or(""),
            outcome = selection.outcome(),
            "filter chain selection"
        );
        selection
    }

    fn select_inner(&self, name: &str, conn: &ConnectionMetadata) -> ChainSelection {
        let Some(snapshot) = self.store.snapshot(TypeUrl::LISTENER) else {
            return ChainSelection::UnknownListener;
        };
        let Some(listener) = snapshot.get(name).and_then(|r| r.as_listener()) else {
            return ChainSelection::UnknownListener;
        };

        match FilterChainMatcher::new(listener).select_index(conn) {
            None => ChainSelection::NoMatch,
            Some(index) => {
                let chain = &listener.filter_chains[index];
                if chain.is_empty() {
                    ChainSelection::EmptyFilterChain
                } else {
                    ChainSelection::Selected(SelectedChain {
                        listener: listener.name.clone(),
                        version: snapshot.version().clone(),
                        index,
                        chain: chain.clone(),
                    })
                }
            }
        }
    }
}
