//! Per-mount monitoring task.
//!
//! One task per mounted gate multiplexes the signal channel, the startup
//! timer, the inspector poll and the focus-loss debounce. It exits on
//! unmount or breach, and every timer it owns goes with it.

use crate::camera::{CameraExit, CameraMonitor, FrameSource};
use crate::config::GateConfig;
use crate::gate::{GatePhase, GateView, Outcome, SecureViewerGate};
use crate::inspector::{HostWindow, InspectPanelHeuristic};
use crate::policy::{SignalKind, SignalPolicy};
use crate::reporter::Reporter;
use crate::signal::{classify, BrowserSignal, Classified};
use chrono::{Local, Utc};
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Gate activity pushed to host subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GateEvent {
    Armed,
    /// LogOnly signal; the host shows it briefly.
    Notice { kind: SignalKind, message: String },
    ViolationCounted { kind: SignalKind, count: usize },
    Breached { reason: String },
    ConsumedReported,
    MediaUnavailable,
    CameraUnavailable { reason: String },
}

/// State shared by a gate's handle, its driver and its camera task.
pub(crate) struct Shared {
    pub(crate) id: Uuid,
    gate: Mutex<SecureViewerGate>,
    view_tx: watch::Sender<GateView>,
    events: broadcast::Sender<GateEvent>,
    pub(crate) reporter: Reporter,
    report_breaches: bool,
    breached: CancellationToken,
    started: Instant,
}

impl Shared {
    pub(crate) fn new(
        id: Uuid,
        gate: SecureViewerGate,
        reporter: Reporter,
        report_breaches: bool,
    ) -> Arc<Self> {
        let started = Instant::now();
        let (view_tx, _) = watch::channel(gate.view(Local::now(), 0));
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            id,
            gate: Mutex::new(gate),
            view_tx,
            events,
            reporter,
            report_breaches,
            breached: CancellationToken::new(),
            started,
        })
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Read the gate without publishing.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&SecureViewerGate) -> R) -> R {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        f(&gate)
    }

    /// Mutate the gate and publish the resulting view.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SecureViewerGate) -> R) -> R {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut gate);
        let view = gate.view(Local::now(), self.now_ms());
        drop(gate);
        self.view_tx.send_replace(view);
        result
    }

    /// Republish the current view without changing the gate.
    pub(crate) fn refresh(&self) {
        self.update(|_| ());
    }

    pub(crate) fn current_view(&self) -> GateView {
        let now_ms = self.now_ms();
        self.inspect(|gate| gate.view(Local::now(), now_ms))
    }

    pub(crate) fn subscribe_view(&self) -> watch::Receiver<GateView> {
        self.view_tx.subscribe()
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: GateEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn is_breached(&self) -> bool {
        self.inspect(|gate| gate.is_breached())
    }

    pub(crate) fn phase(&self) -> GatePhase {
        self.inspect(|gate| gate.phase())
    }

    fn arm(&self) -> bool {
        let armed = self.update(|gate| gate.arm());
        if armed {
            info!(gate_id = %self.id, "[Gate] armed");
            self.emit(GateEvent::Armed);
        }
        armed
    }

    pub(crate) fn observe(&self, kind: SignalKind, reason: &str) -> Outcome {
        let now_ms = self.now_ms();
        let outcome = self.update(|gate| gate.observe(kind, reason, now_ms));
        match &outcome {
            Outcome::Noticed { message } => {
                info!(gate_id = %self.id, %kind, %message, "[Gate] signal logged");
                self.emit(GateEvent::Notice {
                    kind,
                    message: message.clone(),
                });
            }
            Outcome::Counted { count } => {
                warn!(gate_id = %self.id, %kind, count, reason, "[Gate] violation");
                self.emit(GateEvent::ViolationCounted { kind, count: *count });
            }
            Outcome::Breached { reason } => self.on_breach(reason.clone()),
            Outcome::Ignored | Outcome::AlreadyBreached => {
                trace!(gate_id = %self.id, %kind, "[Gate] signal ignored");
            }
        }
        outcome
    }

    /// Breach from outside the violation window (camera verdict).
    pub(crate) fn external_breach(&self, reason: &str) -> bool {
        let newly = self.update(|gate| gate.force_breach(reason));
        if newly {
            self.on_breach(reason.to_string());
        }
        newly
    }

    fn on_breach(&self, reason: String) {
        warn!(gate_id = %self.id, %reason, "[Gate] BREACHED - content blocked for this mount");
        self.breached.cancel();
        self.emit(GateEvent::Breached {
            reason: reason.clone(),
        });
        if self.report_breaches {
            self.reporter.breach(reason, Utc::now());
        }
    }
}

/// A browser signal plus an optional "processed" acknowledgement.
pub(crate) struct SignalEnvelope {
    pub(crate) signal: BrowserSignal,
    pub(crate) ack: Option<oneshot::Sender<()>>,
}

impl SignalEnvelope {
    fn done(self) {
        if let Some(ack) = self.ack {
            // caller may have stopped waiting
            let _ = ack.send(());
        }
    }
}

struct PendingFocusLoss {
    timer: Pin<Box<Sleep>>,
    reason: String,
}

async fn focus_loss_elapsed(pending: &mut Option<PendingFocusLoss>) {
    match pending {
        Some(p) => (&mut p.timer).await,
        None => std::future::pending().await,
    }
}

async fn notice_elapsed(expiry: &mut Option<Pin<Box<Sleep>>>) {
    match expiry {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

/// Drives one mounted gate.
pub(crate) struct GateDriver {
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: Arc<GateConfig>,
    pub(crate) window: Arc<HostWindow>,
    pub(crate) heuristics: Vec<Box<dyn InspectPanelHeuristic>>,
    pub(crate) signals: mpsc::UnboundedReceiver<SignalEnvelope>,
    pub(crate) cancel: CancellationToken,
    pub(crate) camera: Option<Box<dyn FrameSource>>,
    /// Camera was asked for but cannot run; reported once armed.
    pub(crate) camera_missing: Option<String>,
    pub(crate) camera_active: Arc<AtomicBool>,
}

impl GateDriver {
    pub(crate) async fn run(mut self) {
        let gate_id = self.shared.id;

        let startup = tokio::time::sleep(Duration::from_millis(self.config.startup_delay_ms));
        tokio::pin!(startup);
        loop {
            // Queued signals predate arming, so drain them before the deadline.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(%gate_id, "[Gate] unmounted during startup");
                    return;
                }
                envelope = self.signals.recv() => match envelope {
                    Some(envelope) => {
                        trace!(%gate_id, signal = ?envelope.signal, "[Gate] dropped during startup grace");
                        envelope.done();
                    }
                    None => return,
                },
                _ = &mut startup => break,
            }
        }

        if !self.shared.arm() {
            return;
        }

        let camera_task = self.spawn_camera();

        let period = Duration::from_millis(self.config.inspector_poll_ms);
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut focus_loss: Option<PendingFocusLoss> = None;
        let mut notice_expiry: Option<Pin<Box<Sleep>>> = None;
        let breached = self.shared.breached.clone();

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = breached.cancelled() => break,
                envelope = self.signals.recv() => match envelope {
                    Some(envelope) => {
                        let outcome = self.handle_signal(&envelope.signal, &mut focus_loss);
                        envelope.done();
                        outcome
                    }
                    None => break,
                },
                _ = poll.tick() => {
                    let outcome = self.poll_heuristics();
                    // keeps the watermark clock current for view subscribers
                    self.shared.refresh();
                    outcome
                }
                _ = focus_loss_elapsed(&mut focus_loss), if focus_loss.is_some() => {
                    focus_loss
                        .take()
                        .map(|pending| self.shared.observe(SignalKind::FocusLoss, &pending.reason))
                }
                _ = notice_elapsed(&mut notice_expiry), if notice_expiry.is_some() => {
                    notice_expiry = None;
                    self.shared.refresh();
                    None
                }
            };

            if let Some(Outcome::Noticed { .. } | Outcome::Counted { .. }) = outcome {
                let ttl = Duration::from_millis(self.config.notice_ttl_ms);
                notice_expiry = Some(Box::pin(tokio::time::sleep(ttl)));
            }
        }

        if let Some((token, task)) = camera_task {
            token.cancel();
            if let Err(e) = task.await {
                warn!(%gate_id, error = %e, "[Camera] monitor task failed");
            }
        }
        debug!(%gate_id, phase = ?self.shared.phase(), "[Gate] listeners removed");
    }

    fn handle_signal(
        &mut self,
        signal: &BrowserSignal,
        focus_loss: &mut Option<PendingFocusLoss>,
    ) -> Option<Outcome> {
        match classify(signal) {
            Classified::Violation { kind, reason } => Some(self.shared.observe(kind, &reason)),
            Classified::FocusLost { reason } => {
                let policy = self.shared.inspect(|g| g.policy(SignalKind::FocusLoss));
                if policy != SignalPolicy::Disabled && focus_loss.is_none() {
                    let debounce = Duration::from_millis(self.config.blur_debounce_ms);
                    *focus_loss = Some(PendingFocusLoss {
                        timer: Box::pin(tokio::time::sleep(debounce)),
                        reason,
                    });
                }
                None
            }
            Classified::FocusRestored => {
                if focus_loss.take().is_some() {
                    debug!(gate_id = %self.shared.id, "[Gate] focus back within debounce");
                }
                None
            }
            Classified::Metrics(metrics) => {
                self.window.update_metrics(metrics);
                None
            }
            Classified::ConsoleProbe => {
                self.window.record_console_probe_hit();
                None
            }
            Classified::Irrelevant => None,
        }
    }

    /// At most one violation per poll.
    fn poll_heuristics(&self) -> Option<Outcome> {
        let heuristic = self
            .heuristics
            .iter()
            .find(|heuristic| heuristic.inspect_panel_open())?;
        Some(
            self.shared
                .observe(heuristic.kind(), &format!("inspector: {}", heuristic.name())),
        )
    }

    fn spawn_camera(&mut self) -> Option<(CancellationToken, JoinHandle<()>)> {
        if let Some(reason) = self.camera_missing.take() {
            self.shared.emit(GateEvent::CameraUnavailable { reason });
        }
        let source = self.camera.take()?;
        let token = self.cancel.child_token();
        let monitor = CameraMonitor::new(
            self.shared.id,
            source,
            self.shared.reporter.backend(),
            self.config.camera.clone(),
            token.clone(),
        )
        .with_active_flag(self.camera_active.clone());

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            match monitor.run().await {
                CameraExit::Breach(reason) => {
                    shared.external_breach(&reason);
                }
                CameraExit::Unavailable(reason) => {
                    shared.emit(GateEvent::CameraUnavailable { reason });
                }
                CameraExit::Cancelled => {}
            }
        });
        Some((token, task))
    }
}
