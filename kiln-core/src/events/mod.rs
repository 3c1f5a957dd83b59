//! Event system for kiln
//!
//! The plugin host publishes [`HostEvent`]s through the
//! [`EventPublisher`](kiln_plugin_api::EventPublisher) it was built with.
//! [`MemoryEventBus`] is the in-process implementation: it keeps every event
//! for inspection, fans out to live subscribers and evaluates veto rules.

pub mod memory;

pub use kiln_plugin_api::{HostEvent, Verdict};
pub use memory::{EventSeq, MemoryEventBus, VetoRule};
