//! Media backend contract and its HTTP implementation.

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::watermark::Viewer;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const CONSUME_PATH: &str = "api/security/consume/";
const REPORT_BREACH_PATH: &str = "api/security/report-breach/";
const ANALYZE_FRAME_PATH: &str = "api/security/analyze-frame/";
const CAMERA_STOP_PATH: &str = "api/security/camera/stop/";

/// Classifier answer for one camera frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameVerdict {
    pub security_breach: bool,
    #[serde(default)]
    pub reason: String,
}

/// Collaborator that records views and classifies frames.
///
/// Every call except `analyze_frame` is best-effort from the gate's point of
/// view: errors are logged by the caller and never change gate state.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn report_consumed(&self, viewer: &Viewer, media_url: &str) -> Result<(), BackendError>;

    async fn report_breach(&self, reason: &str, timestamp: DateTime<Utc>)
        -> Result<(), BackendError>;

    async fn analyze_frame(&self, frame: Bytes) -> Result<FrameVerdict, BackendError>;

    async fn stop_camera_monitoring(&self, viewer: &Viewer) -> Result<(), BackendError>;
}

/// Identity the platform expects in `user` fields.
fn user_field(viewer: &Viewer) -> String {
    viewer
        .email
        .clone()
        .unwrap_or_else(|| viewer.display_name())
}

#[derive(Debug, Serialize)]
struct ConsumeBody<'a> {
    consumed: bool,
    user: String,
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct BreachBody<'a> {
    reason: &'a str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct CameraStopBody {
    user: String,
}

/// Talks to the platform's `api/security/*` endpoints.
pub struct HttpMediaBackend {
    client: reqwest::Client,
    base_url: Url,
    csrf_token: Option<String>,
}

impl HttpMediaBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BackendError::Request {
                endpoint: base_url.to_string(),
                source: e,
            })?;
        Ok(Self {
            client,
            base_url,
            csrf_token: config.csrf_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    fn with_csrf(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.csrf_token {
            Some(token) => request.header("X-CSRFToken", token),
            None => request,
        }
    }

    async fn send(
        &self,
        endpoint: &Url,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await.map_err(|e| BackendError::Request {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), BackendError> {
        let endpoint = self.endpoint(path)?;
        let request = self.with_csrf(self.client.post(endpoint.clone()).json(body));
        self.send(&endpoint, request).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for HttpMediaBackend {
    async fn report_consumed(&self, viewer: &Viewer, media_url: &str) -> Result<(), BackendError> {
        let body = ConsumeBody {
            consumed: true,
            user: user_field(viewer),
            url: media_url,
        };
        self.post_json(CONSUME_PATH, &body).await
    }

    async fn report_breach(
        &self,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let body = BreachBody {
            reason,
            timestamp: timestamp.to_rfc3339(),
        };
        self.post_json(REPORT_BREACH_PATH, &body).await
    }

    async fn analyze_frame(&self, frame: Bytes) -> Result<FrameVerdict, BackendError> {
        let endpoint = self.endpoint(ANALYZE_FRAME_PATH)?;
        let part = Part::bytes(frame.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| BackendError::Request {
                endpoint: endpoint.to_string(),
                source: e,
            })?;
        let form = Form::new().part("frame", part);
        let request = self.with_csrf(
            self.client
                .post(endpoint.clone())
                .header("X-Requested-With", "XMLHttpRequest")
                .multipart(form),
        );
        let response = self.send(&endpoint, request).await?;
        response
            .json::<FrameVerdict>()
            .await
            .map_err(|e| BackendError::Request {
                endpoint: endpoint.to_string(),
                source: e,
            })
    }

    async fn stop_camera_monitoring(&self, viewer: &Viewer) -> Result<(), BackendError> {
        let body = CameraStopBody {
            user: user_field(viewer),
        };
        self.post_json(CAMERA_STOP_PATH, &body).await
    }
}
