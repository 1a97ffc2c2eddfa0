//! Watch system for store update notifications.
//!
//! The watch system provides:
//! - Unique watch identifiers ([`WatchId`])
//! - Owned subscriptions ([`Watch`]) for receiving updates of one type
//! - Pending sets ([`PendingUpdates`]) shared by the types one stream follows
//! - Watch management ([`WatchManager`]) for fan-out and cleanup
//!
//! Channel delivery uses `try_send`: a full channel drops the update, so
//! receivers should treat a notification as "something changed" and read
//! the latest snapshot from the store. A pending set never drops: repeated
//! changes of one type coalesce into a single entry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};
use xds_core::TypeUrl;

use crate::TypeSnapshot;

/// Unique identifier for a watch subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value of this watch ID.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// A watch subscription owning its receiver.
#[derive(Debug)]
pub struct Watch {
    id: WatchId,
    type_url: TypeUrl,
    receiver: mpsc::Receiver<Arc<TypeSnapshot>>,
}

impl Watch {
    /// Get the unique identifier for this watch.
    #[inline]
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Get the type URL this watch follows.
    #[inline]
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// Receive the next snapshot update.
    ///
    /// Returns `None` once the watch has been cancelled.
    pub async fn recv(&mut self) -> Option<Arc<TypeSnapshot>> {
        self.receiver.recv().await
    }

    /// Try to receive a snapshot update without waiting.
    pub fn try_recv(&mut self) -> Result<Arc<TypeSnapshot>, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Type URLs changed since their owner last looked.
///
/// Shared by every subscription of one stream. Marking a type that is
/// already pending is a no-op, so no change is lost however many arrive
/// before the owner wakes.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    dirty: Mutex<HashSet<TypeUrl>>,
    wake: Notify,
}

impl PendingUpdates {
    /// Create an empty pending set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `type_url` as changed and wake the owner.
    pub fn mark(&self, type_url: &TypeUrl) {
        self.dirty
            .lock()
            .expect("pending lock poisoned")
            .insert(type_url.clone());
        self.wake.notify_one();
    }

    /// Take every pending type URL without waiting.
    pub fn take(&self) -> Vec<TypeUrl> {
        self.dirty
            .lock()
            .expect("pending lock poisoned")
            .drain()
            .collect()
    }

    /// Wait until at least one type URL is pending, then take them all.
    pub async fn changed(&self) -> Vec<TypeUrl> {
        loop {
            let taken = self.take();
            if !taken.is_empty() {
                return taken;
            }
            // A mark racing with the take leaves a permit, so this returns.
            self.wake.notified().await;
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Channel(mpsc::Sender<Arc<TypeSnapshot>>),
    Pending(Weak<PendingUpdates>),
}

#[derive(Debug, Clone)]
struct WatchSender {
    id: WatchId,
    target: Target,
}

enum Delivery {
    Sent,
    Skipped,
    Closed,
}

impl WatchSender {
    fn deliver(&self, type_url: &TypeUrl, snapshot: Arc<TypeSnapshot>) -> Delivery {
        match &self.target {
            Target::Channel(sender) => match sender.try_send(snapshot) {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(watch_id = %self.id, "watch channel full, skipping update");
                    Delivery::Skipped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
            Target::Pending(pending) => match pending.upgrade() {
                Some(pending) => {
                    pending.mark(type_url);
                    Delivery::Sent
                }
                None => Delivery::Closed,
            },
        }
    }
}

/// Manager for watch subscriptions, keyed by type URL.
///
/// Uses a `Mutex` internally but operations are fast (no I/O).
#[derive(Debug)]
pub struct WatchManager {
    watches: Mutex<HashMap<TypeUrl, Vec<WatchSender>>>,
    channel_buffer: usize,
}

impl Default for WatchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchManager {
    /// Create a new watch manager with default settings.
    pub fn new() -> Self {
        Self::with_buffer_size(16)
    }

    /// Create a new watch manager with a custom channel buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            channel_buffer: buffer_size.max(1),
        }
    }

    fn register(&self, type_url: TypeUrl, target: Target) -> WatchId {
        let id = WatchId::next();
        debug!(watch_id = %id, type_url = %type_url, "subscribed");
        {
            let mut watches = self.watches.lock().expect("watch lock poisoned");
            watches.entry(type_url).or_default().push(WatchSender { id, target });
        }
        id
    }

    /// Mark `type_url` in `pending` on every change of that type.
    ///
    /// Several subscriptions may share one pending set; this is how a
    /// stream follows all of its types without one starving another.
    /// The set is held weakly and the subscription lapses once it is
    /// dropped.
    pub fn subscribe(&self, type_url: TypeUrl, pending: &Arc<PendingUpdates>) -> WatchId {
        self.register(type_url, Target::Pending(Arc::downgrade(pending)))
    }

    /// Create a watch with its own channel.
    pub fn create_watch(&self, type_url: TypeUrl) -> Watch {
        let (sender, receiver) = mpsc::channel(self.channel_buffer);
        let id = self.register(type_url.clone(), Target::Channel(sender));
        Watch {
            id,
            type_url,
            receiver,
        }
    }

    /// Cancel a watch subscription.
    pub fn cancel(&self, watch_id: WatchId) {
        let mut watches = self.watches.lock().expect("watch lock poisoned");

        for senders in watches.values_mut() {
            if let Some(pos) = senders.iter().position(|s| s.id == watch_id) {
                senders.swap_remove(pos);
                debug!(watch_id = %watch_id, "cancelled watch");
                return;
            }
        }

        warn!(watch_id = %watch_id, "attempted to cancel unknown watch");
    }

    /// Notify every watch of `type_url`. Returns the number of deliveries.
    ///
    /// Removes any closed watches automatically.
    pub fn notify(&self, type_url: &TypeUrl, snapshot: Arc<TypeSnapshot>) -> usize {
        // Clone senders while holding lock briefly
        let senders: Vec<WatchSender> = {
            let watches = self.watches.lock().expect("watch lock poisoned");
            watches.get(type_url).cloned().unwrap_or_default()
        };

        if senders.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut closed_ids = Vec::new();
        for sender in &senders {
            match sender.deliver(type_url, Arc::clone(&snapshot)) {
                Delivery::Sent => delivered += 1,
                Delivery::Skipped => {}
                Delivery::Closed => closed_ids.push(sender.id),
            }
        }

        if !closed_ids.is_empty() {
            let mut watches = self.watches.lock().expect("watch lock poisoned");
            if let Some(senders) = watches.get_mut(type_url) {
                senders.retain(|s| !closed_ids.contains(&s.id));
            }
            debug!(count = closed_ids.len(), "removed closed watches");
        }

        trace!(type_url = %type_url, delivered, "notified watches of snapshot update");
        delivered
    }

    /// Get the number of active watches for a type URL.
    pub fn watch_count(&self, type_url: &str) -> usize {
        let watches = self.watches.lock().expect("watch lock poisoned");
        watches.get(type_url).map(Vec::len).unwrap_or(0)
    }

    /// Get the total number of active watches.
    pub fn total_watch_count(&self) -> usize {
        let watches = self.watches.lock().expect("watch lock poisoned");
        watches.values().map(Vec::len).sum()
    }
}
