//! Fire-and-forget reporting on top of a [`MediaBackend`].
//!
//! Failures are logged as warnings and dropped: no retries, no effect on the
//! gate, nothing surfaced to the viewer.

use crate::backend::MediaBackend;
use crate::watermark::Viewer;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Reporter {
    backend: Arc<dyn MediaBackend>,
    gate_id: Uuid,
}

impl Reporter {
    pub fn new(backend: Arc<dyn MediaBackend>, gate_id: Uuid) -> Self {
        Self { backend, gate_id }
    }

    pub fn backend(&self) -> Arc<dyn MediaBackend> {
        self.backend.clone()
    }

    pub fn consumed(&self, viewer: Viewer, media_url: String) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let gate_id = self.gate_id;
        tokio::spawn(async move {
            match backend.report_consumed(&viewer, &media_url).await {
                Ok(()) => debug!(%gate_id, "[Reporter] consumption recorded"),
                Err(e) => warn!(%gate_id, error = %e, "[Reporter] consumption report failed"),
            }
        })
    }

    pub fn breach(&self, reason: String, timestamp: DateTime<Utc>) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let gate_id = self.gate_id;
        tokio::spawn(async move {
            match backend.report_breach(&reason, timestamp).await {
                Ok(()) => debug!(%gate_id, "[Reporter] breach recorded"),
                Err(e) => warn!(%gate_id, error = %e, "[Reporter] breach report failed"),
            }
        })
    }

    pub fn camera_stopped(&self, viewer: Viewer) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let gate_id = self.gate_id;
        tokio::spawn(async move {
            match backend.stop_camera_monitoring(&viewer).await {
                Ok(()) => debug!(%gate_id, "[Reporter] camera stop acknowledged"),
                Err(e) => warn!(%gate_id, error = %e, "[Reporter] camera stop failed"),
            }
        })
    }
}
