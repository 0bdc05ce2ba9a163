//! Mounting gates around protected content.
//!
//! A [`GateHost`] is created once per page/app with the config and backend.
//! Each [`GateHost::mount`] creates an independent gate that owns its own
//! violation log, timers and camera stream. Nothing is shared between mounts.

use crate::backend::MediaBackend;
use crate::camera::CameraProvider;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::gate::{GatePhase, GateView, SecureViewerGate};
use crate::inspector::{ConsoleProbeHeuristic, GeometryHeuristic, HostWindow, InspectPanelHeuristic};
use crate::monitor::{GateDriver, GateEvent, Shared, SignalEnvelope};
use crate::policy::SignalKind;
use crate::reporter::Reporter;
use crate::signal::BrowserSignal;
use crate::watermark::Viewer;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// What the host page knows about the content it wraps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountRequest {
    pub one_time_view: bool,
    pub media_url: String,
    pub viewer: Viewer,
    /// Page asks for camera monitoring on top of the default detectors.
    pub camera: bool,
}

impl MountRequest {
    pub fn one_time(media_url: impl Into<String>, viewer: Viewer) -> Self {
        Self {
            one_time_view: true,
            media_url: media_url.into(),
            viewer,
            camera: false,
        }
    }

    pub fn plain(media_url: impl Into<String>) -> Self {
        Self {
            one_time_view: false,
            media_url: media_url.into(),
            ..Default::default()
        }
    }
}

pub struct GateHost {
    config: Arc<GateConfig>,
    backend: Arc<dyn MediaBackend>,
    camera: Option<Arc<dyn CameraProvider>>,
}

impl GateHost {
    pub fn new(config: GateConfig, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            camera: None,
        }
    }

    pub fn with_camera_provider(mut self, provider: Arc<dyn CameraProvider>) -> Self {
        self.camera = Some(provider);
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Mount a gate. Must be called inside a tokio runtime.
    pub fn mount(&self, request: MountRequest) -> GateHandle {
        self.mount_with_heuristics(request, Vec::new())
    }

    /// Mount with extra inspector heuristics on top of the built-in ones.
    pub fn mount_with_heuristics(
        &self,
        request: MountRequest,
        extra: Vec<Box<dyn InspectPanelHeuristic>>,
    ) -> GateHandle {
        let id = Uuid::new_v4();
        let gate = SecureViewerGate::new(
            &self.config,
            request.one_time_view,
            request.media_url,
            request.viewer.clone(),
        );
        let listeners = gate.installed_listeners();
        let reporter = Reporter::new(self.backend.clone(), id);
        let shared = Shared::new(id, gate, reporter, self.config.report_breaches);
        let cancel = CancellationToken::new();
        let camera_active = Arc::new(AtomicBool::new(false));

        if !request.one_time_view {
            info!(gate_id = %id, "[Gate] mounted unprotected, no listeners");
            return GateHandle {
                id,
                shared,
                signals: None,
                listeners,
                viewer: request.viewer,
                cancel,
                driver: None,
                camera_active,
                unmounted: false,
            };
        }

        let window = HostWindow::new();
        let mut heuristics: Vec<Box<dyn InspectPanelHeuristic>> = Vec::new();
        if listeners.contains(&SignalKind::InspectorGeometry) {
            heuristics.push(Box::new(GeometryHeuristic::new(
                window.clone(),
                self.config.inspector_threshold_px,
            )));
        }
        if listeners.contains(&SignalKind::InspectorConsoleProbe) {
            heuristics.push(Box::new(ConsoleProbeHeuristic::new(window.clone())));
        }
        heuristics.extend(extra);

        let mut camera_missing = None;
        let camera = if request.camera && self.config.camera.enabled {
            let camera = self.camera.as_ref().map(|provider| provider.open());
            if camera.is_none() {
                warn!(gate_id = %id, "[Camera] requested but no camera provider, falling back to watermark only");
                camera_missing = Some("no camera provider configured".to_string());
            }
            camera
        } else {
            None
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = GateDriver {
            shared: shared.clone(),
            config: self.config.clone(),
            window,
            heuristics,
            signals: rx,
            cancel: cancel.clone(),
            camera,
            camera_missing,
            camera_active: camera_active.clone(),
        };
        let task = tokio::spawn(driver.run());

        info!(gate_id = %id, listeners = listeners.len(), "[Gate] mounted one-time view");
        GateHandle {
            id,
            shared,
            signals: Some(tx),
            listeners,
            viewer: request.viewer,
            cancel,
            driver: Some(task),
            camera_active,
            unmounted: false,
        }
    }
}

/// Host-side handle to one mounted gate. Dropping it tears the gate down;
/// [`GateHandle::unmount`] does the same and waits for it.
pub struct GateHandle {
    id: Uuid,
    shared: Arc<Shared>,
    signals: Option<mpsc::UnboundedSender<SignalEnvelope>>,
    listeners: Vec<SignalKind>,
    viewer: Viewer,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
    camera_active: Arc<AtomicBool>,
    unmounted: bool,
}

impl GateHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Listeners installed for this mount; empty for unprotected content.
    pub fn installed_listeners(&self) -> &[SignalKind] {
        &self.listeners
    }

    pub fn phase(&self) -> GatePhase {
        self.shared.phase()
    }

    pub fn is_breached(&self) -> bool {
        self.shared.is_breached()
    }

    pub fn violation_count(&self) -> usize {
        self.shared.inspect(|gate| gate.violations().len())
    }

    pub fn consumed_reported(&self) -> bool {
        self.shared.inspect(|gate| gate.consumed_reported())
    }

    pub fn view(&self) -> GateView {
        self.shared.current_view()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<GateView> {
        self.shared.subscribe_view()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GateEvent> {
        self.shared.subscribe_events()
    }

    /// Forward a browser signal without waiting for it to be handled.
    /// Unprotected gates drop it, as do gates whose listeners were removed
    /// by a breach.
    pub fn send_signal(&self, signal: BrowserSignal) -> Result<()> {
        self.dispatch(signal, None)
    }

    /// Forward a signal and return the view once the gate has handled it.
    pub async fn process_signal(&self, signal: BrowserSignal) -> Result<GateView> {
        let (ack, done) = oneshot::channel();
        self.dispatch(signal, Some(ack))?;
        // Err means the envelope was dropped unprocessed: no driver, or the
        // gate already stopped listening.
        let _ = done.await;
        Ok(self.view())
    }

    fn dispatch(&self, signal: BrowserSignal, ack: Option<oneshot::Sender<()>>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GateError::Unmounted(self.id));
        }
        if let Some(tx) = &self.signals {
            // closed after breach; the gate is terminal anyway
            let _ = tx.send(SignalEnvelope { signal, ack });
        }
        Ok(())
    }

    /// First successful render of the media.
    pub fn media_loaded(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GateError::Unmounted(self.id));
        }
        if let Some(report) = self.shared.update(|gate| gate.media_loaded()) {
            self.shared.reporter.consumed(report.viewer, report.media_url);
            self.shared.emit(GateEvent::ConsumedReported);
        }
        Ok(())
    }

    /// The wrapped media could not be loaded. Shown as unavailable, never as
    /// a breach.
    pub fn media_failed(&self, reason: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GateError::Unmounted(self.id));
        }
        warn!(gate_id = %self.id, reason, "[Gate] media unavailable");
        self.shared.update(|gate| gate.media_failed());
        self.shared.emit(GateEvent::MediaUnavailable);
        Ok(())
    }

    /// Tear down listeners and timers, then tell the backend the camera
    /// stopped if it was running.
    pub async fn unmount(mut self) {
        if self.unmounted {
            return;
        }
        self.unmounted = true;
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(gate_id = %self.id, error = %e, "[Gate] driver task failed");
            }
        }
        if self.camera_active.load(Ordering::SeqCst) {
            self.shared.reporter.camera_stopped(self.viewer.clone());
        }
        info!(gate_id = %self.id, "[Gate] unmounted");
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.unmounted {
            return;
        }
        if self.camera_active.load(Ordering::SeqCst)
            && tokio::runtime::Handle::try_current().is_ok()
        {
            self.shared.reporter.camera_stopped(self.viewer.clone());
        }
    }
}
