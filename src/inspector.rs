//! Best-effort heuristics for an open browser inspector.
//!
//! Neither detector is reliable. Undocked inspectors defeat the geometry
//! check and the console probe only fires while a console panel renders the
//! probe object. They are signals, not proof.

use crate::policy::SignalKind;
use crate::signal::WindowMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A periodic inspector check.
pub trait InspectPanelHeuristic: Send + Sync {
    /// Kind recorded when the heuristic fires.
    fn kind(&self) -> SignalKind;

    /// Short label used in logs and breach reasons.
    fn name(&self) -> &str;

    fn inspect_panel_open(&self) -> bool;
}

/// Latest window state reported by the host page for one mount.
#[derive(Debug, Default)]
pub struct HostWindow {
    metrics: Mutex<Option<WindowMetrics>>,
    console_probe_hit: AtomicBool,
}

impl HostWindow {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update_metrics(&self, metrics: WindowMetrics) {
        if let Ok(mut current) = self.metrics.lock() {
            *current = Some(metrics);
        }
    }

    pub fn metrics(&self) -> Option<WindowMetrics> {
        self.metrics.lock().ok().and_then(|m| *m)
    }

    pub fn record_console_probe_hit(&self) {
        self.console_probe_hit.store(true, Ordering::SeqCst);
    }

    /// Read and clear the probe flag.
    pub fn take_console_probe_hit(&self) -> bool {
        self.console_probe_hit.swap(false, Ordering::SeqCst)
    }
}

/// Docked inspectors shrink the inner window relative to the outer one.
pub struct GeometryHeuristic {
    window: Arc<HostWindow>,
    threshold_px: u32,
}

impl GeometryHeuristic {
    pub fn new(window: Arc<HostWindow>, threshold_px: u32) -> Self {
        Self {
            window,
            threshold_px,
        }
    }
}

impl InspectPanelHeuristic for GeometryHeuristic {
    fn kind(&self) -> SignalKind {
        SignalKind::InspectorGeometry
    }

    fn name(&self) -> &str {
        "window size gap"
    }

    fn inspect_panel_open(&self) -> bool {
        self.window
            .metrics()
            .map(|m| m.chrome_gap() > self.threshold_px)
            .unwrap_or(false)
    }
}

/// The host logs an object whose string coercion is only evaluated when a
/// console panel is open, and reports back when that coercion ran.
pub struct ConsoleProbeHeuristic {
    window: Arc<HostWindow>,
}

impl ConsoleProbeHeuristic {
    pub fn new(window: Arc<HostWindow>) -> Self {
        Self { window }
    }
}

impl InspectPanelHeuristic for ConsoleProbeHeuristic {
    fn kind(&self) -> SignalKind {
        SignalKind::InspectorConsoleProbe
    }

    fn name(&self) -> &str {
        "console probe"
    }

    fn inspect_panel_open(&self) -> bool {
        self.window.take_console_probe_hit()
    }
}
