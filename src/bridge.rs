//! Local bridge server.
//!
//! The webview hosting protected content cannot call into Rust directly, so
//! it forwards its DOM signals here over loopback HTTP and renders whatever
//! view the gate answers with.

use crate::error::GateError;
use crate::gate::GateView;
use crate::host::{GateHandle, GateHost, MountRequest};
use crate::signal::BrowserSignal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Filter;

struct Entry {
    handle: GateHandle,
    last_seen: Mutex<Instant>,
}

impl Entry {
    fn touch(&self) -> &GateHandle {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        &self.handle
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_seen)
    }
}

/// Live gates keyed by id. Each entry is independent of the others.
///
/// Every request for a gate counts as a heartbeat. Gates whose page went
/// away without a `DELETE` are unmounted by [`GateRegistry::spawn_sweeper`].
pub struct GateRegistry {
    host: GateHost,
    gates: RwLock<HashMap<Uuid, Entry>>,
    idle_timeout: Duration,
    sweep_interval: Duration,
}

impl GateRegistry {
    pub fn new(host: GateHost) -> Arc<Self> {
        let bridge = &host.config().bridge;
        let idle_timeout = Duration::from_millis(bridge.idle_timeout_ms);
        let sweep_interval = Duration::from_millis(bridge.sweep_interval_ms);
        Arc::new(Self {
            host,
            gates: RwLock::new(HashMap::new()),
            idle_timeout,
            sweep_interval,
        })
    }

    pub async fn mount(&self, request: MountRequest) -> (Uuid, GateView) {
        let handle = self.host.mount(request);
        let id = handle.id();
        let view = handle.view();
        let entry = Entry {
            handle,
            last_seen: Mutex::new(Instant::now()),
        };
        self.gates.write().await.insert(id, entry);
        (id, view)
    }

    /// Forward a signal and answer with the view after it was handled.
    pub async fn signal(&self, id: Uuid, signal: BrowserSignal) -> Result<GateView, GateError> {
        let gates = self.gates.read().await;
        let handle = gates.get(&id).ok_or(GateError::NotFound(id))?.touch();
        handle.process_signal(signal).await
    }

    pub async fn media(&self, id: Uuid, status: MediaStatus) -> Result<GateView, GateError> {
        let gates = self.gates.read().await;
        let handle = gates.get(&id).ok_or(GateError::NotFound(id))?.touch();
        match status {
            MediaStatus::Loaded => handle.media_loaded()?,
            MediaStatus::Failed { reason } => handle.media_failed(&reason)?,
        }
        Ok(handle.view())
    }

    pub async fn view(&self, id: Uuid) -> Result<GateView, GateError> {
        let gates = self.gates.read().await;
        let handle = gates.get(&id).ok_or(GateError::NotFound(id))?.touch();
        Ok(handle.view())
    }

    pub async fn unmount(&self, id: Uuid) -> Result<(), GateError> {
        let entry = self
            .gates
            .write()
            .await
            .remove(&id)
            .ok_or(GateError::NotFound(id))?;
        entry.handle.unmount().await;
        Ok(())
    }

    /// Unmount every gate idle for longer than the configured timeout.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<Entry> = {
            let mut gates = self.gates.write().await;
            let ids: Vec<Uuid> = gates
                .iter()
                .filter(|(_, entry)| entry.idle_for(now) > self.idle_timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| gates.remove(id)).collect()
        };
        let evicted = stale.len();
        for entry in stale {
            info!(gate_id = %entry.handle.id(), "[Bridge] evicting idle gate");
            entry.handle.unmount().await;
        }
        evicted
    }

    /// Periodic idle sweep. Ends once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                sweep.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle().await;
                if evicted > 0 {
                    debug!(evicted, "[Bridge] idle sweep");
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.gates.read().await.len()
    }
}

/// Media load result reported by the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaStatus {
    Loaded,
    Failed {
        #[serde(default)]
        reason: String,
    },
}

#[derive(Debug, Serialize)]
struct MountReply {
    id: Uuid,
    view: GateView,
}

fn with_registry(
    registry: Arc<GateRegistry>,
) -> impl Filter<Extract = (Arc<GateRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

fn view_reply(result: Result<GateView, GateError>) -> WithStatus<Json> {
    match result {
        Ok(view) => warp::reply::with_status(warp::reply::json(&view), StatusCode::OK),
        Err(e) => error_reply(e),
    }
}

fn error_reply(error: GateError) -> WithStatus<Json> {
    let status = match error {
        GateError::NotFound(_) => StatusCode::NOT_FOUND,
        GateError::Unmounted(_) => StatusCode::GONE,
        GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "success": false,
            "message": error.to_string(),
        })),
        status,
    )
}

async fn handle_mount(
    request: MountRequest,
    registry: Arc<GateRegistry>,
) -> Result<WithStatus<Json>, Infallible> {
    let (id, view) = registry.mount(request).await;
    Ok(warp::reply::with_status(
        warp::reply::json(&MountReply { id, view }),
        StatusCode::CREATED,
    ))
}

async fn handle_signal(
    id: Uuid,
    signal: BrowserSignal,
    registry: Arc<GateRegistry>,
) -> Result<WithStatus<Json>, Infallible> {
    debug!(gate_id = %id, ?signal, "[Bridge] signal");
    Ok(view_reply(registry.signal(id, signal).await))
}

async fn handle_media(
    id: Uuid,
    status: MediaStatus,
    registry: Arc<GateRegistry>,
) -> Result<WithStatus<Json>, Infallible> {
    Ok(view_reply(registry.media(id, status).await))
}

async fn handle_view(id: Uuid, registry: Arc<GateRegistry>) -> Result<WithStatus<Json>, Infallible> {
    Ok(view_reply(registry.view(id).await))
}

async fn handle_unmount(
    id: Uuid,
    registry: Arc<GateRegistry>,
) -> Result<WithStatus<Json>, Infallible> {
    match registry.unmount(id).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "success": true })),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

/// All bridge routes.
pub fn routes(
    registry: Arc<GateRegistry>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "ok",
            "app": "viewgate"
        }))
    });

    let mount = warp::path("gates")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_registry(registry.clone()))
        .and_then(handle_mount);

    let signal = warp::path!("gates" / Uuid / "signal")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_registry(registry.clone()))
        .and_then(handle_signal);

    let media = warp::path!("gates" / Uuid / "media")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_registry(registry.clone()))
        .and_then(handle_media);

    let view = warp::path!("gates" / Uuid / "view")
        .and(warp::get())
        .and(with_registry(registry.clone()))
        .and_then(handle_view);

    let unmount = warp::path!("gates" / Uuid)
        .and(warp::delete())
        .and(with_registry(registry))
        .and_then(handle_unmount);

    // Webview pages are served from a custom scheme, so any origin is allowed
    // on loopback.
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allow_headers(vec!["Content-Type"]);

    health
        .or(mount)
        .or(signal)
        .or(media)
        .or(view)
        .or(unmount)
        .with(cors)
}

/// Serve the bridge on loopback until the process exits.
pub async fn serve(registry: Arc<GateRegistry>, port: u16) {
    info!(port, "[Bridge] starting");
    let sweeper = registry.spawn_sweeper();
    warp::serve(routes(registry)).run(([127, 0, 0, 1], port)).await;
    sweeper.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FrameVerdict, MediaBackend};
    use crate::config::GateConfig;
    use crate::error::BackendError;
    use crate::watermark::Viewer;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    struct NullBackend;

    #[async_trait]
    impl MediaBackend for NullBackend {
        async fn report_consumed(&self, _: &Viewer, _: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn report_breach(&self, _: &str, _: DateTime<Utc>) -> Result<(), BackendError> {
            Ok(())
        }

        async fn analyze_frame(&self, _: Bytes) -> Result<FrameVerdict, BackendError> {
            Ok(FrameVerdict {
                security_breach: false,
                reason: String::new(),
            })
        }

        async fn stop_camera_monitoring(&self, _: &Viewer) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn registry() -> Arc<GateRegistry> {
        GateRegistry::new(GateHost::new(GateConfig::default(), Arc::new(NullBackend)))
    }

    async fn mount_one_time(registry: &Arc<GateRegistry>) -> Uuid {
        let filter = routes(registry.clone());
        let res = warp::test::request()
            .method("POST")
            .path("/gates")
            .json(&serde_json::json!({
                "one_time_view": true,
                "media_url": "https://cdn.example.com/m/7.jpg",
                "viewer": { "username": "deniz", "email": "deniz@example.com" }
            }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["view"]["state"], "protected");
        body["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let filter = routes(registry());
        let res = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_plain_mount_is_unprotected() {
        let registry = registry();
        let filter = routes(registry.clone());
        let res = warp::test::request()
            .method("POST")
            .path("/gates")
            .json(&serde_json::json!({ "media_url": "https://cdn.example.com/a.png" }))
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["view"]["state"], "unprotected");
        assert_eq!(registry.len().await, 1);
    }

    async fn post_key(registry: &Arc<GateRegistry>, id: Uuid, key: &str) -> serde_json::Value {
        let filter = routes(registry.clone());
        let res = warp::test::request()
            .method("POST")
            .path(&format!("/gates/{}/signal", id))
            .json(&serde_json::json!({ "type": "key_down", "key": key }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_reply_reflects_handled_signal() {
        let registry = registry();
        let id = mount_one_time(&registry).await;
        tokio::time::sleep(Duration::from_millis(350)).await;

        let first = post_key(&registry, id, "PrintScreen").await;
        assert_eq!(first["state"], "protected");
        assert_eq!(first["notice"], "violation 1/2: PrintScreen");

        // no sleep: the reply itself must already carry the block screen
        let second = post_key(&registry, id, "F12").await;
        assert_eq!(second["state"], "blocked");
        assert_eq!(second["reason"], "F12 (2/2)");
    }

    #[tokio::test]
    async fn test_signal_during_startup_answers_immediately() {
        let registry = registry();
        let id = mount_one_time(&registry).await;
        let reply = post_key(&registry, id, "F12").await;
        assert_eq!(reply["state"], "protected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gates_are_evicted() {
        let registry = registry();
        let abandoned = mount_one_time(&registry).await;
        let active = mount_one_time(&registry).await;
        let sweeper = registry.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(200)).await;
        registry.view(active).await.unwrap();

        // default idle timeout is 300s, swept every 30s
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(registry.len().await, 1);
        assert!(matches!(
            registry.view(abandoned).await,
            Err(GateError::NotFound(_))
        ));
        assert!(registry.view(active).await.is_ok());

        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(registry.len().await, 0);
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_media_failed_shows_unavailable() {
        let registry = registry();
        let id = mount_one_time(&registry).await;
        let filter = routes(registry.clone());
        let res = warp::test::request()
            .method("POST")
            .path(&format!("/gates/{}/media", id))
            .json(&serde_json::json!({ "status": "failed", "reason": "404" }))
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["state"], "unavailable");
    }

    #[tokio::test]
    async fn test_unmount_then_unknown() {
        let registry = registry();
        let id = mount_one_time(&registry).await;
        let filter = routes(registry.clone());

        let res = warp::test::request()
            .method("DELETE")
            .path(&format!("/gates/{}", id))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(registry.len().await, 0);

        let res = warp::test::request()
            .path(&format!("/gates/{}/view", id))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
