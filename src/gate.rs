//! Secure Viewer Gate state machine.
//!
//! ```text
//! Initializing ──(startup delay)──> Armed ──(threshold / camera verdict)──> Breached
//!                                    │  ^
//!                                    └──┘ warned
//! ```
//!
//! The gate is a deterrent, not a security boundary. Every signal it sees
//! comes from client-side code that a determined viewer can bypass; nothing
//! here claims cryptographic or OS-level guarantees.
//!
//! This type is pure: callers pass the current time in milliseconds since
//! mount. Timers live in [`crate::monitor`].

use crate::config::GateConfig;
use crate::policy::{SignalKind, SignalPolicies, SignalPolicy};
use crate::violation::ViolationLog;
use crate::watermark::{Viewer, Watermark};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    /// Startup grace period, detection off.
    Initializing,
    /// Steady state.
    Armed,
    /// Terminal for the lifetime of the mount.
    Breached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    Pending,
    Loaded,
    Unavailable,
}

/// What the host page should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateView {
    /// Not a one-time view: children as-is, no overlays.
    Unprotected,
    /// Children with the diagonal and corner watermarks.
    Protected {
        watermark: Watermark,
        diagonal_text: String,
        corner_text: String,
        notice: Option<String>,
    },
    /// Media failed to load. Not a breach.
    Unavailable,
    /// Block screen; children must not be rendered.
    Blocked { reason: String },
}

impl GateView {
    pub fn renders_children(&self) -> bool {
        matches!(self, GateView::Unprotected | GateView::Protected { .. })
    }

    pub fn has_watermark(&self) -> bool {
        matches!(self, GateView::Protected { .. })
    }
}

/// Result of feeding one classified signal to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Dropped: unprotected, still initializing, or policy disabled.
    Ignored,
    /// LogOnly signal, surfaced as a transient notice.
    Noticed { message: String },
    /// Counted, still under the threshold.
    Counted { count: usize },
    /// This signal crossed the threshold.
    Breached { reason: String },
    /// Already terminal.
    AlreadyBreached,
}

/// Payload for the one consumption report of a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeReport {
    pub viewer: Viewer,
    pub media_url: String,
}

#[derive(Debug, Clone)]
struct Notice {
    message: String,
    expires_at_ms: u64,
}

/// One mounted protected session.
#[derive(Debug)]
pub struct SecureViewerGate {
    one_time_view: bool,
    media_url: String,
    viewer: Viewer,
    phase: GatePhase,
    media: MediaState,
    violations: ViolationLog,
    max_violations: usize,
    policies: SignalPolicies,
    console_probe: bool,
    notice_ttl_ms: u64,
    notice: Option<Notice>,
    breach_reason: Option<String>,
    consumed_reported: bool,
}

impl SecureViewerGate {
    pub fn new(
        config: &GateConfig,
        one_time_view: bool,
        media_url: impl Into<String>,
        viewer: Viewer,
    ) -> Self {
        Self {
            one_time_view,
            media_url: media_url.into(),
            viewer,
            phase: GatePhase::Initializing,
            media: MediaState::Pending,
            violations: ViolationLog::new(config.window_ms),
            max_violations: config.max_violations,
            policies: config.signals.clone(),
            console_probe: config.console_probe,
            notice_ttl_ms: config.notice_ttl_ms,
            notice: None,
            breach_reason: None,
            consumed_reported: false,
        }
    }

    pub fn is_one_time_view(&self) -> bool {
        self.one_time_view
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase != GatePhase::Initializing
    }

    pub fn is_breached(&self) -> bool {
        self.phase == GatePhase::Breached
    }

    pub fn breach_reason(&self) -> Option<&str> {
        self.breach_reason.as_deref()
    }

    pub fn media_state(&self) -> MediaState {
        self.media
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn violations(&self) -> &ViolationLog {
        &self.violations
    }

    /// Signal kinds that get a listener on this mount. Empty when the
    /// content is not a one-time view.
    pub fn installed_listeners(&self) -> Vec<SignalKind> {
        if !self.one_time_view {
            return Vec::new();
        }
        SignalKind::ALL
            .iter()
            .copied()
            .filter(|&kind| self.policies.is_enabled(kind))
            .filter(|&kind| kind != SignalKind::InspectorConsoleProbe || self.console_probe)
            .collect()
    }

    pub fn policy(&self, kind: SignalKind) -> SignalPolicy {
        self.policies.get(kind)
    }

    /// End the startup grace period. Returns true on the actual transition.
    pub fn arm(&mut self) -> bool {
        if self.one_time_view && self.phase == GatePhase::Initializing {
            self.phase = GatePhase::Armed;
            true
        } else {
            false
        }
    }

    /// Feed one candidate violation.
    pub fn observe(&mut self, kind: SignalKind, reason: &str, now_ms: u64) -> Outcome {
        if !self.one_time_view {
            return Outcome::Ignored;
        }
        match self.phase {
            GatePhase::Initializing => return Outcome::Ignored,
            GatePhase::Breached => return Outcome::AlreadyBreached,
            GatePhase::Armed => {}
        }

        match self.policies.get(kind) {
            SignalPolicy::Disabled => Outcome::Ignored,
            SignalPolicy::LogOnly => {
                let message = format!("{} ({})", reason, kind);
                self.set_notice(message.clone(), now_ms);
                Outcome::Noticed { message }
            }
            SignalPolicy::Enforce => {
                let count = self.violations.record(kind, reason, now_ms);
                if count >= self.max_violations {
                    let reason = format!("{} ({}/{})", reason, count, self.max_violations);
                    self.enter_breach(reason.clone());
                    Outcome::Breached { reason }
                } else {
                    self.set_notice(
                        format!("violation {}/{}: {}", count, self.max_violations, reason),
                        now_ms,
                    );
                    Outcome::Counted { count }
                }
            }
        }
    }

    /// Breach from an external verdict (camera). Returns true if this call
    /// made the transition.
    pub fn force_breach(&mut self, reason: &str) -> bool {
        if !self.one_time_view || self.is_breached() {
            return false;
        }
        self.enter_breach(reason.to_string());
        true
    }

    fn enter_breach(&mut self, reason: String) {
        self.phase = GatePhase::Breached;
        self.breach_reason = Some(reason);
        self.notice = None;
    }

    fn set_notice(&mut self, message: String, now_ms: u64) {
        self.notice = Some(Notice {
            message,
            expires_at_ms: now_ms.saturating_add(self.notice_ttl_ms),
        });
    }

    /// Media rendered. Yields the consumption report the first time only,
    /// and only for live one-time views.
    pub fn media_loaded(&mut self) -> Option<ConsumeReport> {
        if self.media == MediaState::Pending {
            self.media = MediaState::Loaded;
        }
        if !self.one_time_view || self.consumed_reported || self.is_breached() {
            return None;
        }
        if self.media != MediaState::Loaded {
            return None;
        }
        self.consumed_reported = true;
        Some(ConsumeReport {
            viewer: self.viewer.clone(),
            media_url: self.media_url.clone(),
        })
    }

    /// Media failed to load. Never counts as a violation.
    pub fn media_failed(&mut self) {
        if self.media == MediaState::Pending {
            self.media = MediaState::Unavailable;
        }
    }

    pub fn consumed_reported(&self) -> bool {
        self.consumed_reported
    }

    pub fn view(&self, now: DateTime<Local>, now_ms: u64) -> GateView {
        if let Some(reason) = &self.breach_reason {
            return GateView::Blocked {
                reason: reason.clone(),
            };
        }
        if self.media == MediaState::Unavailable {
            return GateView::Unavailable;
        }
        if !self.one_time_view {
            return GateView::Unprotected;
        }
        let watermark = Watermark::for_viewer(&self.viewer, now);
        let notice = self
            .notice
            .as_ref()
            .filter(|n| now_ms < n.expires_at_ms)
            .map(|n| n.message.clone());
        GateView::Protected {
            diagonal_text: watermark.diagonal_text(),
            corner_text: watermark.corner_text(),
            watermark,
            notice,
        }
    }
}
