#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use viewgate::camera::{CameraProvider, FrameSource};
use viewgate::inspector::InspectPanelHeuristic;
use viewgate::policy::SignalKind;
use viewgate::{BackendError, CameraError, FrameVerdict, MediaBackend, Viewer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Consumed { user: Option<String>, url: String },
    Breach { reason: String },
    Frame,
    CameraStop { user: Option<String> },
}

/// In-memory backend that records every call.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
    frames: AtomicUsize,
    breach_on_frame: Option<usize>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Classifier flags the nth analysed frame (1-based).
    pub fn breaching_on_frame(n: usize) -> Arc<Self> {
        Arc::new(Self {
            breach_on_frame: Some(n),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn consumed_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Consumed { .. }))
            .count()
    }

    pub fn breach_reports(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Breach { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn camera_stops(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::CameraStop { .. }))
            .count()
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaBackend for RecordingBackend {
    async fn report_consumed(&self, viewer: &Viewer, media_url: &str) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(Call::Consumed {
            user: viewer.email.clone(),
            url: media_url.to_string(),
        });
        Ok(())
    }

    async fn report_breach(&self, reason: &str, _: DateTime<Utc>) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(Call::Breach {
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn analyze_frame(&self, _frame: Bytes) -> Result<FrameVerdict, BackendError> {
        let n = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(Call::Frame);
        Ok(FrameVerdict {
            security_breach: self.breach_on_frame == Some(n),
            reason: "phone pointed at screen".to_string(),
        })
    }

    async fn stop_camera_monitoring(&self, viewer: &Viewer) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(Call::CameraStop {
            user: viewer.email.clone(),
        });
        Ok(())
    }
}

/// Camera that always produces a frame, or refuses access.
pub struct FakeCamera {
    pub deny: bool,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn new(deny: bool) -> Arc<Self> {
        Arc::new(Self {
            deny,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct FakeStream {
    deny: bool,
    released: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for FakeStream {
    async fn start(&mut self) -> Result<(), CameraError> {
        if self.deny {
            return Err(CameraError::PermissionDenied("blocked by browser".into()));
        }
        Ok(())
    }

    async fn capture(&mut self) -> Result<Bytes, CameraError> {
        Ok(Bytes::from_static(b"\xff\xd8frame"))
    }

    async fn stop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl CameraProvider for FakeCamera {
    fn open(&self) -> Box<dyn FrameSource> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeStream {
            deny: self.deny,
            released: self.released.clone(),
        })
    }
}

/// Heuristic that never fires but counts how often it is polled.
pub struct CountingHeuristic {
    pub polls: Arc<AtomicUsize>,
}

impl InspectPanelHeuristic for CountingHeuristic {
    fn kind(&self) -> SignalKind {
        SignalKind::InspectorGeometry
    }

    fn name(&self) -> &str {
        "counting"
    }

    fn inspect_panel_open(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        false
    }
}

pub fn viewer() -> Viewer {
    Viewer::new("selin", "selin@example.com")
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Heuristic whose check blows up, for driver failure handling.
pub struct PanickingHeuristic;

impl InspectPanelHeuristic for PanickingHeuristic {
    fn kind(&self) -> SignalKind {
        SignalKind::InspectorGeometry
    }

    fn name(&self) -> &str {
        "panicking"
    }

    fn inspect_panel_open(&self) -> bool {
        panic!("heuristic exploded");
    }
}
