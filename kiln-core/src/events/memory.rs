//! In-memory event bus
//!
//! MemoryEventBus stores events in a Vec for replay and uses a broadcast
//! channel for live subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use kiln_plugin_api::{EventPublisher, HostEvent, Verdict};

/// Sequence number assigned to each published event
pub type EventSeq = u64;

/// Inspects a cancellable event and returns a reason to veto it.
pub type VetoRule = Box<dyn Fn(&HostEvent) -> Option<String> + Send + Sync>;

/// In-memory implementation of [`EventPublisher`]
///
/// Thread-safe via RwLock and atomics. Publishing never blocks on
/// subscribers; a lagging receiver loses the oldest events.
pub struct MemoryEventBus {
    /// Stored events with sequence numbers
    events: RwLock<Vec<(EventSeq, HostEvent)>>,
    /// Next sequence number to assign
    next_seq: AtomicU64,
    /// Broadcast channel for live subscribers
    tx: broadcast::Sender<(EventSeq, HostEvent)>,
    /// Veto rules keyed by the plugin that registered them
    vetoes: RwLock<Vec<(String, VetoRule)>>,
}

impl MemoryEventBus {
    /// Create a new MemoryEventBus with the given broadcast channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            events: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            tx,
            vetoes: RwLock::new(Vec::new()),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<(EventSeq, HostEvent)> {
        self.tx.subscribe()
    }

    /// Add a rule that may veto cancellable events.
    ///
    /// `owner` is the plugin the rule belongs to; the rule is dropped when that
    /// plugin is unloaded.
    pub fn add_veto<F>(&self, owner: impl Into<String>, rule: F)
    where
        F: Fn(&HostEvent) -> Option<String> + Send + Sync + 'static,
    {
        self.vetoes.write().push((owner.into(), Box::new(rule)));
    }

    pub fn veto_count(&self) -> usize {
        self.vetoes.read().len()
    }

    /// All stored events, oldest first.
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.read().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Stored events starting at `seq`.
    pub fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, HostEvent)> {
        self.events
            .read()
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    /// Stored events concerning `plugin`.
    pub fn events_for(&self, plugin: &str) -> Vec<HostEvent> {
        self.events
            .read()
            .iter()
            .filter(|(_, e)| e.plugin() == plugin)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for MemoryEventBus {
    fn publish(&self, event: &HostEvent) -> Verdict {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        // Store for replay
        self.events.write().push((seq, event.clone()));

        // Broadcast to live subscribers (ignore if no receivers)
        let _ = self.tx.send((seq, event.clone()));

        if !event.is_cancellable() {
            return Verdict::Proceed;
        }

        let vetoes = self.vetoes.read();
        for (owner, rule) in vetoes.iter() {
            if let Some(reason) = rule(event) {
                tracing::info!(
                    plugin = %event.plugin(),
                    vetoed_by = %owner,
                    reason = %reason,
                    "Event vetoed"
                );
                return Verdict::veto(reason);
            }
        }
        Verdict::Proceed
    }

    fn release(&self, plugin: &str) {
        self.vetoes.write().retain(|(owner, _)| owner != plugin);
    }
}
