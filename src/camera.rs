//! Camera-based monitoring, the optional stronger protection mode.
//!
//! Frames are captured and classified one at a time:
//! capture → analyze → wait `frame_interval_ms` → capture. A slow classifier
//! slows the loop down instead of piling up requests.

use crate::backend::MediaBackend;
use crate::config::CameraConfig;
use crate::error::CameraError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A camera stream owned by one mount.
#[async_trait]
pub trait FrameSource: Send {
    /// Ask for camera access and open the stream.
    async fn start(&mut self) -> Result<(), CameraError>;

    /// Grab one JPEG frame.
    async fn capture(&mut self) -> Result<Bytes, CameraError>;

    /// Release the device.
    async fn stop(&mut self);
}

/// Opens a fresh [`FrameSource`] per mount.
pub trait CameraProvider: Send + Sync {
    fn open(&self) -> Box<dyn FrameSource>;
}

/// Why the monitoring loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraExit {
    /// Unmounted or the gate breached through another path.
    Cancelled,
    /// Classifier reported a breach.
    Breach(String),
    /// Could not monitor; content stays up, protected by watermark only.
    Unavailable(String),
}

pub struct CameraMonitor {
    gate_id: Uuid,
    source: Box<dyn FrameSource>,
    backend: Arc<dyn MediaBackend>,
    config: CameraConfig,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
}

impl CameraMonitor {
    pub fn new(
        gate_id: Uuid,
        source: Box<dyn FrameSource>,
        backend: Arc<dyn MediaBackend>,
        config: CameraConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gate_id,
            source,
            backend,
            config,
            cancel,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned "stream open" flag.
    pub fn with_active_flag(mut self, active: Arc<AtomicBool>) -> Self {
        self.active = active;
        self
    }

    /// Set once the stream is open; used to decide whether unmount must send
    /// a stop signal.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub async fn run(mut self) -> CameraExit {
        let gate_id = self.gate_id;

        if let Err(e) = self.source.start().await {
            warn!(%gate_id, error = %e, "[Camera] cannot monitor, falling back to watermark only");
            return CameraExit::Unavailable(e.to_string());
        }
        self.active.store(true, Ordering::SeqCst);
        info!(%gate_id, "[Camera] monitoring started");

        let interval = Duration::from_millis(self.config.frame_interval_ms);
        let mut consecutive_failures = 0u32;

        let exit = loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break CameraExit::Cancelled,
                frame = self.source.capture() => frame,
            };

            match frame {
                Ok(frame) => {
                    let verdict = tokio::select! {
                        _ = self.cancel.cancelled() => break CameraExit::Cancelled,
                        verdict = self.backend.analyze_frame(frame) => verdict,
                    };
                    match verdict {
                        Ok(v) if v.security_breach => {
                            let reason = if v.reason.is_empty() {
                                "camera breach".to_string()
                            } else {
                                format!("camera: {}", v.reason)
                            };
                            warn!(%gate_id, %reason, "[Camera] breach verdict");
                            break CameraExit::Breach(reason);
                        }
                        Ok(_) => consecutive_failures = 0,
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(%gate_id, error = %e, consecutive_failures, "[Camera] frame analysis failed");
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(%gate_id, error = %e, consecutive_failures, "[Camera] frame capture failed");
                }
            }

            if consecutive_failures >= self.config.max_consecutive_failures {
                break CameraExit::Unavailable(format!(
                    "{} consecutive frame failures",
                    consecutive_failures
                ));
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break CameraExit::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        };

        self.source.stop().await;
        debug!(%gate_id, ?exit, "[Camera] monitoring stopped");
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FrameVerdict;
    use crate::error::BackendError;
    use crate::watermark::Viewer;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct SourceLog {
        captured: AtomicUsize,
        stopped: AtomicBool,
    }

    struct FakeSource {
        log: Arc<SourceLog>,
        deny: bool,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn start(&mut self) -> Result<(), CameraError> {
            if self.deny {
                Err(CameraError::PermissionDenied("user said no".into()))
            } else {
                Ok(())
            }
        }

        async fn capture(&mut self) -> Result<Bytes, CameraError> {
            self.log.captured.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"frame"))
        }

        async fn stop(&mut self) {
            self.log.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Slow classifier that flags the Nth frame and tracks overlap.
    struct SlowClassifier {
        breach_on: Option<usize>,
        fail: bool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        call_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl SlowClassifier {
        fn new(breach_on: Option<usize>, fail: bool) -> Self {
            Self {
                breach_on,
                fail,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                call_times: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaBackend for SlowClassifier {
        async fn report_consumed(&self, _: &Viewer, _: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn report_breach(&self, _: &str, _: DateTime<Utc>) -> Result<(), BackendError> {
            Ok(())
        }

        async fn analyze_frame(&self, _frame: Bytes) -> Result<FrameVerdict, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.call_times.lock().unwrap().push(tokio::time::Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(250)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(BackendError::Unavailable("classifier down".into()));
            }
            Ok(FrameVerdict {
                security_breach: self.breach_on == Some(n),
                reason: "second face".into(),
            })
        }

        async fn stop_camera_monitoring(&self, _: &Viewer) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn monitor(
        deny: bool,
        backend: Arc<SlowClassifier>,
        cancel: CancellationToken,
    ) -> (CameraMonitor, Arc<SourceLog>) {
        let log = Arc::new(SourceLog::default());
        let source = FakeSource {
            log: log.clone(),
            deny,
        };
        let monitor = CameraMonitor::new(
            Uuid::new_v4(),
            Box::new(source),
            backend,
            CameraConfig {
                enabled: true,
                ..Default::default()
            },
            cancel,
        );
        (monitor, log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_breach_verdict_ends_loop() {
        let backend = Arc::new(SlowClassifier::new(Some(3), false));
        let (monitor, log) = monitor(false, backend.clone(), CancellationToken::new());
        let active = monitor.active_flag();

        let exit = monitor.run().await;

        assert_eq!(exit, CameraExit::Breach("camera: second face".into()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(log.captured.load(Ordering::SeqCst), 3);
        assert!(active.load(Ordering::SeqCst));
        assert!(log.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_request_in_flight() {
        let backend = Arc::new(SlowClassifier::new(Some(5), false));
        let (monitor, _) = monitor(false, backend.clone(), CancellationToken::new());
        monitor.run().await;

        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        // each cycle is analysis (250ms) + pacing (100ms)
        let times = backend.call_times.lock().unwrap();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(350));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_is_unavailable() {
        let backend = Arc::new(SlowClassifier::new(None, false));
        let (monitor, log) = monitor(true, backend.clone(), CancellationToken::new());
        let active = monitor.active_flag();

        let exit = monitor.run().await;

        assert!(matches!(exit, CameraExit::Unavailable(_)));
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(log.captured.load(Ordering::SeqCst), 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_consecutive_failures() {
        let backend = Arc::new(SlowClassifier::new(None, true));
        let (monitor, log) = monitor(false, backend.clone(), CancellationToken::new());

        let exit = monitor.run().await;

        assert!(matches!(exit, CameraExit::Unavailable(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
        assert!(log.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let backend = Arc::new(SlowClassifier::new(None, false));
        let cancel = CancellationToken::new();
        let (monitor, log) = monitor(false, backend.clone(), cancel.clone());
        let task = tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        cancel.cancel();
        let exit = task.await.unwrap();
        assert_eq!(exit, CameraExit::Cancelled);
        assert!(log.stopped.load(Ordering::SeqCst));

        let calls = backend.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls);
    }
}
