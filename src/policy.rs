//! Signal kinds and the per-signal policy map.
//!
//! Every detector feeds exactly one [`SignalKind`]. What happens to it is
//! decided by one explicit [`SignalPolicy`] per kind, never by scattered
//! toggles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Categories of suspicious activity the gate can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// PrintScreen / Snapshot key
    ScreenshotKey,
    /// F12 or Ctrl+Shift+I/J/C
    DevToolsKey,
    /// Right-click menu
    ContextMenu,
    /// Copy or cut
    Clipboard,
    /// Sustained window blur or hidden document
    FocusLoss,
    /// Outer/inner window size gap above threshold
    InspectorGeometry,
    /// Console string-coercion probe fired
    InspectorConsoleProbe,
}

impl SignalKind {
    pub const ALL: [SignalKind; 7] = [
        SignalKind::ScreenshotKey,
        SignalKind::DevToolsKey,
        SignalKind::ContextMenu,
        SignalKind::Clipboard,
        SignalKind::FocusLoss,
        SignalKind::InspectorGeometry,
        SignalKind::InspectorConsoleProbe,
    ];
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::ScreenshotKey => write!(f, "screenshot key"),
            SignalKind::DevToolsKey => write!(f, "devtools shortcut"),
            SignalKind::ContextMenu => write!(f, "context menu"),
            SignalKind::Clipboard => write!(f, "clipboard"),
            SignalKind::FocusLoss => write!(f, "focus loss"),
            SignalKind::InspectorGeometry => write!(f, "inspector (window size)"),
            SignalKind::InspectorConsoleProbe => write!(f, "inspector (console probe)"),
        }
    }
}

/// What the gate does with a signal of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPolicy {
    /// Counts toward the violation window.
    Enforce,
    /// Logged and shown as a transient notice, never counted.
    LogOnly,
    /// Listener is not installed.
    Disabled,
}

/// Explicit `{signal: policy}` map.
///
/// Kinds missing from a deserialized map fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<SignalKind, SignalPolicy>", into = "BTreeMap<SignalKind, SignalPolicy>")]
pub struct SignalPolicies {
    policies: BTreeMap<SignalKind, SignalPolicy>,
}

impl SignalPolicies {
    pub fn default_policy(kind: SignalKind) -> SignalPolicy {
        match kind {
            SignalKind::ContextMenu | SignalKind::Clipboard => SignalPolicy::LogOnly,
            _ => SignalPolicy::Enforce,
        }
    }

    pub fn get(&self, kind: SignalKind) -> SignalPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or_else(|| Self::default_policy(kind))
    }

    pub fn set(&mut self, kind: SignalKind, policy: SignalPolicy) {
        self.policies.insert(kind, policy);
    }

    pub fn with(mut self, kind: SignalKind, policy: SignalPolicy) -> Self {
        self.set(kind, policy);
        self
    }

    pub fn is_enabled(&self, kind: SignalKind) -> bool {
        self.get(kind) != SignalPolicy::Disabled
    }
}

impl Default for SignalPolicies {
    fn default() -> Self {
        let policies = SignalKind::ALL
            .iter()
            .map(|&kind| (kind, Self::default_policy(kind)))
            .collect();
        Self { policies }
    }
}

impl From<BTreeMap<SignalKind, SignalPolicy>> for SignalPolicies {
    fn from(overrides: BTreeMap<SignalKind, SignalPolicy>) -> Self {
        let mut policies = Self::default();
        for (kind, policy) in overrides {
            policies.set(kind, policy);
        }
        policies
    }
}

impl From<SignalPolicies> for BTreeMap<SignalKind, SignalPolicy> {
    fn from(policies: SignalPolicies) -> Self {
        policies.policies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policies = SignalPolicies::default();
        assert_eq!(policies.get(SignalKind::ScreenshotKey), SignalPolicy::Enforce);
        assert_eq!(policies.get(SignalKind::FocusLoss), SignalPolicy::Enforce);
        assert_eq!(policies.get(SignalKind::ContextMenu), SignalPolicy::LogOnly);
        assert_eq!(policies.get(SignalKind::Clipboard), SignalPolicy::LogOnly);
    }

    #[test]
    fn test_partial_map_keeps_defaults() {
        let policies: SignalPolicies =
            serde_json::from_str(r#"{"focus_loss": "disabled"}"#).unwrap();
        assert_eq!(policies.get(SignalKind::FocusLoss), SignalPolicy::Disabled);
        assert!(!policies.is_enabled(SignalKind::FocusLoss));
        assert_eq!(policies.get(SignalKind::DevToolsKey), SignalPolicy::Enforce);
    }
}
