//! Gate configuration.
//!
//! Defaults mirror the constants the gate was tuned with; a JSON file can
//! override any subset of fields.

use crate::error::ConfigError;
use crate::policy::SignalPolicies;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Grace period after mount during which no detection runs.
pub const STARTUP_DELAY_MS: u64 = 300;
/// Sliding violation window.
pub const WINDOW_MS: u64 = 5000;
/// Violations inside one window that breach the gate.
pub const MAX_VIOLATIONS: usize = 2;
/// Focus loss must last this long to count.
pub const BLUR_DEBOUNCE_MS: u64 = 400;
/// Inspector heuristics poll period (~1 Hz).
pub const INSPECTOR_POLL_MS: u64 = 1000;
/// Outer/inner size gap that suggests a docked inspector.
pub const INSPECTOR_THRESHOLD_PX: u32 = 160;
/// Camera frame pacing (~10 FPS).
pub const FRAME_INTERVAL_MS: u64 = 100;

/// Top-level configuration for every gate mounted by a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub startup_delay_ms: u64,
    pub window_ms: u64,
    pub max_violations: usize,
    pub blur_debounce_ms: u64,
    pub inspector_poll_ms: u64,
    pub inspector_threshold_px: u32,
    /// Enables the console string-coercion heuristic.
    pub console_probe: bool,
    /// Whether entering `Breached` is reported to the backend.
    pub report_breaches: bool,
    /// How long a LogOnly notice stays on screen.
    pub notice_ttl_ms: u64,
    pub signals: SignalPolicies,
    pub camera: CameraConfig,
    pub backend: BackendConfig,
    pub bridge: BridgeConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: STARTUP_DELAY_MS,
            window_ms: WINDOW_MS,
            max_violations: MAX_VIOLATIONS,
            blur_debounce_ms: BLUR_DEBOUNCE_MS,
            inspector_poll_ms: INSPECTOR_POLL_MS,
            inspector_threshold_px: INSPECTOR_THRESHOLD_PX,
            console_probe: true,
            report_breaches: true,
            notice_ttl_ms: 3000,
            signals: SignalPolicies::default(),
            camera: CameraConfig::default(),
            backend: BackendConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Camera sub-mode, off unless a host asks for stronger protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub frame_interval_ms: u64,
    /// Consecutive analysis failures before monitoring gives up.
    pub max_consecutive_failures: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frame_interval_ms: FRAME_INTERVAL_MS,
            max_consecutive_failures: 5,
        }
    }
}

/// Where reports are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub csrf_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001/".to_string(),
            csrf_token: None,
            timeout_ms: 10_000,
        }
    }
}

/// Local bridge server the webview talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub port: u16,
    /// Gates not touched by any request for this long are unmounted.
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 47153,
            idle_timeout_ms: 300_000,
            sweep_interval_ms: 30_000,
        }
    }
}

impl GateConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_violations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_violations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "window_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.inspector_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "inspector_poll_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.camera.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "camera.frame_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.bridge.idle_timeout_ms == 0 || self.bridge.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "bridge",
                reason: "idle timeout and sweep interval must be positive".to_string(),
            });
        }
        url::Url::parse(&self.backend.base_url).map_err(|e| ConfigError::Invalid {
            field: "backend.base_url",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{SignalKind, SignalPolicy};
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert_eq!(config.startup_delay_ms, 300);
        assert_eq!(config.window_ms, 5000);
        assert_eq!(config.max_violations, 2);
        assert!(!config.camera.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = GateConfig::from_json_str(
            r#"{
                "max_violations": 3,
                "report_breaches": false,
                "signals": { "context_menu": "enforce" },
                "camera": { "enabled": true }
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_violations, 3);
        assert!(!config.report_breaches);
        assert_eq!(config.window_ms, WINDOW_MS);
        assert_eq!(config.signals.get(SignalKind::ContextMenu), SignalPolicy::Enforce);
        assert!(config.camera.enabled);
        assert_eq!(config.camera.frame_interval_ms, FRAME_INTERVAL_MS);
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let err = GateConfig::from_json_str(r#"{"max_violations": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_violations", .. }));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let err = GateConfig::from_json_str(r#"{"backend": {"base_url": "not a url"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "backend.base_url", .. }));
    }

    #[test]
    fn test_rejects_zero_idle_timeout() {
        let err = GateConfig::from_json_str(r#"{"bridge": {"idle_timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bridge", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"blur_debounce_ms": 250}}"#).unwrap();
        let config = GateConfig::load(file.path()).unwrap();
        assert_eq!(config.blur_debounce_ms, 250);
    }
}
