//! Viewer attribution overlays.
//!
//! Watermarks are deterrence only: they are non-interactive and carry no
//! security value on their own.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

const FALLBACK_USERNAME: &str = "viewer";

/// Identity supplied by the host page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewer {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl Viewer {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            email: Some(email.into()),
        }
    }

    /// Username, else the email local part, else a generic label.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.username.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or(FALLBACK_USERNAME)
            .to_string()
    }

    pub fn email_or_empty(&self) -> &str {
        self.email.as_deref().unwrap_or("")
    }
}

/// Watermark recomputed on every render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub username: String,
    pub email: String,
    pub rendered_at: DateTime<Local>,
}

impl Watermark {
    pub fn for_viewer(viewer: &Viewer, rendered_at: DateTime<Local>) -> Self {
        Self {
            username: viewer.display_name(),
            email: viewer.email_or_empty().to_string(),
            rendered_at,
        }
    }

    /// Centered, rotated overlay: `username | email | date`.
    pub fn diagonal_text(&self) -> String {
        format!(
            "{} | {} | {}",
            self.username,
            self.email,
            self.rendered_at.format("%d.%m.%Y")
        )
    }

    /// Fixed corner overlay: `username | date time`.
    pub fn corner_text(&self) -> String {
        format!(
            "{} | {}",
            self.username,
            self.rendered_at.format("%d.%m.%Y %H:%M:%S")
        )
    }
}
