//! Stream context and identification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use xds_core::{Node, NodeHash};

/// Unique identifier for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    /// Generate a new unique stream ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Context for an active stream.
///
/// Tracks the stream identifier, the node that opened it (set once, from
/// the first request) and request/response counts.
#[derive(Debug)]
pub struct StreamContext {
    id: StreamId,
    node: Option<Node>,
    node_hash: Option<NodeHash>,
    created_at: Instant,
    requests: AtomicU64,
    responses: AtomicU64,
}

impl StreamContext {
    /// Create a new stream context.
    pub fn new() -> Self {
        Self {
            id: StreamId::new(),
            node: None,
            node_hash: None,
            created_at: Instant::now(),
            requests: AtomicU64::new(0),
            responses: AtomicU64::new(0),
        }
    }

    /// Get the stream ID.
    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The node, once identified.
    #[inline]
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// Get the node hash if set.
    #[inline]
    pub fn node_hash(&self) -> Option<NodeHash> {
        self.node_hash
    }

    /// Record the node. Later calls are ignored: a node is immutable for
    /// the life of its stream.
    pub fn set_node(&mut self, node: Node) {
        if self.node.is_none() {
            self.node_hash = Some(node.hash());
            self.node = Some(node);
        }
    }

    /// Get stream duration.
    #[inline]
    pub fn duration(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Record a request.
    #[inline]
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response.
    #[inline]
    pub fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total requests.
    #[inline]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Get total responses.
    #[inline]
    pub fn response_count(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }
}

impl Default for StreamContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_unique() {
        let id1 = StreamId::new();
        let id2 = StreamId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn stream_context_counting() {
        let ctx = StreamContext::new();
        ctx.record_request();
        ctx.record_request();
        ctx.record_response();

        assert_eq!(ctx.request_count(), 2);
        assert_eq!(ctx.response_count(), 1);
    }

    #[test]
    fn stream_context_node_is_immutable() {
        let mut ctx = StreamContext::new();
        assert!(ctx.node().is_none());

        ctx.set_node(Node::new("first"));
        ctx.set_node(Node::new("second"));

        assert_eq!(ctx.node().map(|n| n.id.as_str()), Some("first"));
        assert_eq!(ctx.node_hash(), Some(NodeHash::from_id("first")));
    }
}
