//! Plugin lifecycle status and phases

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a loaded plugin.
///
/// There is exactly one authoritative status per plugin runtime. The stable
/// statuses are `Unloaded`, `Loaded`, `Enabled` and `Disabled`; the rest are
/// transient and only observed while a phase sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Unloaded,
    Loaded,
    PreEnable,
    Enable,
    PostEnable,
    Enabled,
    PreDisable,
    Disable,
    PostDisable,
    Disabled,
}

impl PluginStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Besides the forward chain, an enable phase may fall back to `Loaded`
    /// and a disable phase may fall back to `Enabled`.
    pub fn can_transition_to(self, next: PluginStatus) -> bool {
        use PluginStatus::*;
        matches!(
            (self, next),
            (Unloaded, Loaded)
                | (Loaded, PreEnable)
                | (PreEnable, Enable)
                | (Enable, PostEnable)
                | (PostEnable, Enabled)
                | (Enabled, PreDisable)
                | (PreDisable, Disable)
                | (Disable, PostDisable)
                | (PostDisable, Disabled)
                | (PreEnable | Enable | PostEnable, Loaded)
                | (PreDisable | Disable | PostDisable, Enabled)
        )
    }

    /// Stable statuses survive between sweeps.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            Self::Unloaded | Self::Loaded | Self::Enabled | Self::Disabled
        )
    }

    /// `PreEnable` through `Enabled`: the plugin is (becoming) active.
    pub fn is_enable_side(self) -> bool {
        matches!(
            self,
            Self::PreEnable | Self::Enable | Self::PostEnable | Self::Enabled
        )
    }

    /// The stable status a failed phase falls back to.
    pub fn fallback(self) -> PluginStatus {
        match self {
            Self::PreEnable | Self::Enable | Self::PostEnable => Self::Loaded,
            Self::PreDisable | Self::Disable | Self::PostDisable => Self::Enabled,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "UNLOADED",
            Self::Loaded => "LOADED",
            Self::PreEnable => "PRE_ENABLE",
            Self::Enable => "ENABLE",
            Self::PostEnable => "POST_ENABLE",
            Self::Enabled => "ENABLED",
            Self::PreDisable => "PRE_DISABLE",
            Self::Disable => "DISABLE",
            Self::PostDisable => "POST_DISABLE",
            Self::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hook-bearing step of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreEnable,
    Enable,
    PostEnable,
    PreDisable,
    Disable,
    PostDisable,
}

impl Phase {
    pub const ENABLE_PHASES: [Phase; 3] = [Phase::PreEnable, Phase::Enable, Phase::PostEnable];
    pub const DISABLE_PHASES: [Phase; 3] =
        [Phase::PreDisable, Phase::Disable, Phase::PostDisable];

    /// Status a plugin must hold for this phase to apply to it.
    pub fn expected(self) -> PluginStatus {
        match self {
            Self::PreEnable => PluginStatus::Loaded,
            Self::Enable => PluginStatus::PreEnable,
            Self::PostEnable => PluginStatus::Enable,
            Self::PreDisable => PluginStatus::Enabled,
            Self::Disable => PluginStatus::PreDisable,
            Self::PostDisable => PluginStatus::Disable,
        }
    }

    /// Status the plugin holds while (and after) this phase's hook runs.
    pub fn target(self) -> PluginStatus {
        match self {
            Self::PreEnable => PluginStatus::PreEnable,
            Self::Enable => PluginStatus::Enable,
            Self::PostEnable => PluginStatus::PostEnable,
            Self::PreDisable => PluginStatus::PreDisable,
            Self::Disable => PluginStatus::Disable,
            Self::PostDisable => PluginStatus::PostDisable,
        }
    }

    /// Stable status reached once the final phase of a chain completes.
    pub fn finalizes_to(self) -> Option<PluginStatus> {
        match self {
            Self::PostEnable => Some(PluginStatus::Enabled),
            Self::PostDisable => Some(PluginStatus::Disabled),
            _ => None,
        }
    }

    /// Whether an event subscriber may veto entering this phase.
    pub fn is_vetoable(self) -> bool {
        matches!(self, Self::PreEnable | Self::Enable | Self::PreDisable)
    }

    pub fn is_disable(self) -> bool {
        matches!(self, Self::PreDisable | Self::Disable | Self::PostDisable)
    }

    pub fn hook_name(self) -> &'static str {
        match self {
            Self::PreEnable => "on_pre_enable",
            Self::Enable => "on_enable",
            Self::PostEnable => "on_post_enable",
            Self::PreDisable => "on_pre_disable",
            Self::Disable => "on_disable",
            Self::PostDisable => "on_post_disable",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain_is_legal() {
        let chain = [
            PluginStatus::Unloaded,
            PluginStatus::Loaded,
            PluginStatus::PreEnable,
            PluginStatus::Enable,
            PluginStatus::PostEnable,
            PluginStatus::Enabled,
            PluginStatus::PreDisable,
            PluginStatus::Disable,
            PluginStatus::PostDisable,
            PluginStatus::Disabled,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_pre_enable_only_from_loaded() {
        assert!(PluginStatus::Loaded.can_transition_to(PluginStatus::PreEnable));
        assert!(!PluginStatus::Enabled.can_transition_to(PluginStatus::PreEnable));
        assert!(!PluginStatus::Disabled.can_transition_to(PluginStatus::PreEnable));
        assert!(!PluginStatus::Unloaded.can_transition_to(PluginStatus::PreEnable));
    }

    #[test]
    fn test_pre_disable_only_from_enabled() {
        assert!(PluginStatus::Enabled.can_transition_to(PluginStatus::PreDisable));
        assert!(!PluginStatus::Loaded.can_transition_to(PluginStatus::PreDisable));
        assert!(!PluginStatus::PostEnable.can_transition_to(PluginStatus::PreDisable));
    }

    #[test]
    fn test_disabled_is_terminal() {
        for next in [
            PluginStatus::Loaded,
            PluginStatus::PreEnable,
            PluginStatus::Enabled,
        ] {
            assert!(!PluginStatus::Disabled.can_transition_to(next));
        }
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(PluginStatus::Enable.fallback(), PluginStatus::Loaded);
        assert_eq!(PluginStatus::PostDisable.fallback(), PluginStatus::Enabled);
        assert_eq!(PluginStatus::Loaded.fallback(), PluginStatus::Loaded);
    }

    #[test]
    fn test_phase_tables_agree() {
        for phase in Phase::ENABLE_PHASES.iter().chain(&Phase::DISABLE_PHASES) {
            assert!(phase.expected().can_transition_to(phase.target()));
            if let Some(done) = phase.finalizes_to() {
                assert!(phase.target().can_transition_to(done));
            }
        }
        assert!(!Phase::PostEnable.is_vetoable());
        assert!(Phase::PreDisable.is_vetoable());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PluginStatus::PreEnable).unwrap();
        assert_eq!(json, "\"pre_enable\"");
    }
}
