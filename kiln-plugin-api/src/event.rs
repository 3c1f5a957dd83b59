//! Lifecycle events published by the host.
//!
//! The host only publishes; whoever implements [`EventPublisher`] decides
//! what subscribers exist. A `StatusChanging` event for a guarded transition
//! may be vetoed, which is the only cancellation mechanism in the lifecycle.

use serde::{Deserialize, Serialize};

use crate::status::PluginStatus;

/// An event describing plugin lifecycle progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// The host is about to instantiate the plugin.
    LoadingStarted { plugin: String },
    /// The plugin's load hook returned successfully.
    Loaded { plugin: String, version: String },
    /// The plugin is about to change status.
    StatusChanging {
        plugin: String,
        from: PluginStatus,
        to: PluginStatus,
        /// Whether a [`Verdict::Veto`] will be honoured.
        cancellable: bool,
    },
    /// The plugin finished its enable phases.
    Enabled { plugin: String },
    /// The plugin finished its disable phases.
    Disabled { plugin: String },
    /// Application-defined event published by a plugin through its context.
    Custom {
        plugin: String,
        kind: String,
        payload: serde_json::Value,
    },
}

impl HostEvent {
    /// Name of the plugin this event concerns.
    pub fn plugin(&self) -> &str {
        match self {
            Self::LoadingStarted { plugin }
            | Self::Loaded { plugin, .. }
            | Self::StatusChanging { plugin, .. }
            | Self::Enabled { plugin }
            | Self::Disabled { plugin }
            | Self::Custom { plugin, .. } => plugin,
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::StatusChanging {
                cancellable: true,
                ..
            }
        )
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::LoadingStarted { .. } => "loading_started",
            Self::Loaded { .. } => "loaded",
            Self::StatusChanging { .. } => "status_changing",
            Self::Enabled { .. } => "enabled",
            Self::Disabled { .. } => "disabled",
            Self::Custom { kind, .. } => kind,
        }
    }
}

/// Subscriber decision on a published event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Verdict {
    #[default]
    Proceed,
    Veto { reason: String },
}

impl Verdict {
    pub fn veto(reason: impl Into<String>) -> Self {
        Self::Veto {
            reason: reason.into(),
        }
    }

    pub fn is_veto(&self) -> bool {
        matches!(self, Self::Veto { .. })
    }
}

/// Sink for host lifecycle events (the application's event bus).
pub trait EventPublisher: Send + Sync {
    /// Publish an event. The verdict only matters for cancellable events.
    fn publish(&self, event: &HostEvent) -> Verdict;

    /// Drop every listener or rule registered on behalf of `plugin`.
    fn release(&self, _plugin: &str) {}
}

/// Publisher that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: &HostEvent) -> Verdict {
        Verdict::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_accessor() {
        let event = HostEvent::StatusChanging {
            plugin: "alpha".into(),
            from: PluginStatus::Loaded,
            to: PluginStatus::PreEnable,
            cancellable: true,
        };
        assert_eq!(event.plugin(), "alpha");
        assert!(event.is_cancellable());
        assert_eq!(event.kind(), "status_changing");
    }

    #[test]
    fn test_enabled_is_not_cancellable() {
        let event = HostEvent::Enabled {
            plugin: "alpha".into(),
        };
        assert!(!event.is_cancellable());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = HostEvent::Custom {
            plugin: "alpha".into(),
            kind: "greeting".into(),
            payload: serde_json::json!({"text": "hi"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"custom\""));
        let parsed: HostEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_null_publisher_never_vetoes() {
        let verdict = NullPublisher.publish(&HostEvent::LoadingStarted {
            plugin: "x".into(),
        });
        assert_eq!(verdict, Verdict::Proceed);
        assert!(Verdict::veto("no").is_veto());
    }
}
