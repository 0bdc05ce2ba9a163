//! One-time-view content gate.
//!
//! Wraps sensitive media in a monitored session: viewer watermarks, detection
//! of screenshot/devtools/focus-loss signals, a sliding violation window and
//! a terminal block screen once the threshold is crossed. Consumption and
//! breaches are reported to the media backend, fire-and-forget.
//!
//! This is a deterrent, not a security boundary. All signals originate in
//! the viewer's own client and can be suppressed by anyone who controls it.

pub mod backend;
pub mod bridge;
pub mod camera;
pub mod config;
pub mod error;
pub mod gate;
pub mod host;
pub mod inspector;
pub mod logging;
pub mod monitor;
pub mod policy;
pub mod reporter;
pub mod signal;
pub mod violation;
pub mod watermark;

pub use backend::{FrameVerdict, HttpMediaBackend, MediaBackend};
pub use bridge::GateRegistry;
pub use camera::{CameraProvider, FrameSource};
pub use config::GateConfig;
pub use error::{BackendError, CameraError, ConfigError, GateError};
pub use gate::{GatePhase, GateView, SecureViewerGate};
pub use host::{GateHandle, GateHost, MountRequest};
pub use monitor::GateEvent;
pub use policy::{SignalKind, SignalPolicy};
pub use signal::{BrowserSignal, KeyInput, WindowMetrics};
pub use watermark::Viewer;
