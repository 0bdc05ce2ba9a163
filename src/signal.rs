//! Raw browser signals forwarded by the host page, and their classification.

use crate::policy::SignalKind;
use serde::{Deserialize, Serialize};

const KEYCODE_PRINT_SCREEN: u32 = 44;
const KEYCODE_F12: u32 = 123;
const KEYCODE_I: u32 = 73;
const KEYCODE_J: u32 = 74;
const KEYCODE_C: u32 = 67;

/// A keyboard event as the browser reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyInput {
    pub key: String,
    pub key_code: u32,
    pub ctrl: bool,
    pub shift: bool,
}

impl KeyInput {
    pub fn named(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn ctrl_shift(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ctrl: true,
            shift: true,
            ..Default::default()
        }
    }
}

/// Outer and inner window dimensions, sampled by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub outer_width: u32,
    pub inner_width: u32,
    pub outer_height: u32,
    pub inner_height: u32,
}

impl WindowMetrics {
    /// Largest outer/inner gap on either axis.
    pub fn chrome_gap(&self) -> u32 {
        let width_gap = self.outer_width.saturating_sub(self.inner_width);
        let height_gap = self.outer_height.saturating_sub(self.inner_height);
        width_gap.max(height_gap)
    }
}

/// Everything a host page may forward to a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserSignal {
    KeyDown(KeyInput),
    KeyUp(KeyInput),
    ContextMenu,
    Copy,
    Cut,
    WindowBlur,
    WindowFocus,
    VisibilityHidden,
    VisibilityVisible,
    /// Fresh window size sample for the geometry heuristic.
    WindowMetrics(WindowMetrics),
    /// The host's console string-coercion probe was triggered.
    ConsoleProbeHit,
}

/// How the gate should treat an incoming signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Immediate candidate violation.
    Violation { kind: SignalKind, reason: String },
    /// Start of a focus loss that must be sustained to count.
    FocusLost { reason: String },
    /// Focus came back.
    FocusRestored,
    /// Input for the periodic heuristics.
    Metrics(WindowMetrics),
    ConsoleProbe,
    Irrelevant,
}

/// Map a key-down to a violation kind, if it is a watched combination.
pub fn classify_key(input: &KeyInput) -> Option<(SignalKind, &'static str)> {
    let key = input.key.as_str();
    let code = input.key_code;

    if code == KEYCODE_PRINT_SCREEN || key == "PrintScreen" || key == "Snapshot" {
        return Some((SignalKind::ScreenshotKey, "PrintScreen"));
    }
    if code == KEYCODE_F12 || key == "F12" {
        return Some((SignalKind::DevToolsKey, "F12"));
    }
    if input.ctrl && input.shift {
        let upper = key.to_ascii_uppercase();
        let by_key = matches!(upper.as_str(), "I" | "J" | "C");
        let by_code = matches!(code, KEYCODE_I | KEYCODE_J | KEYCODE_C);
        if by_key || by_code {
            return Some((SignalKind::DevToolsKey, "devtools shortcut"));
        }
    }
    None
}

pub fn classify(signal: &BrowserSignal) -> Classified {
    match signal {
        BrowserSignal::KeyDown(input) => match classify_key(input) {
            Some((kind, label)) => Classified::Violation {
                kind,
                reason: label.to_string(),
            },
            None => Classified::Irrelevant,
        },
        // Key-up of the same press would double count.
        BrowserSignal::KeyUp(_) => Classified::Irrelevant,
        BrowserSignal::ContextMenu => Classified::Violation {
            kind: SignalKind::ContextMenu,
            reason: "right-click blocked".to_string(),
        },
        BrowserSignal::Copy => Classified::Violation {
            kind: SignalKind::Clipboard,
            reason: "copy blocked".to_string(),
        },
        BrowserSignal::Cut => Classified::Violation {
            kind: SignalKind::Clipboard,
            reason: "cut blocked".to_string(),
        },
        BrowserSignal::WindowBlur => Classified::FocusLost {
            reason: "window lost focus".to_string(),
        },
        BrowserSignal::VisibilityHidden => Classified::FocusLost {
            reason: "page hidden".to_string(),
        },
        BrowserSignal::WindowFocus | BrowserSignal::VisibilityVisible => Classified::FocusRestored,
        BrowserSignal::WindowMetrics(metrics) => Classified::Metrics(*metrics),
        BrowserSignal::ConsoleProbeHit => Classified::ConsoleProbe,
    }
}
