use crate::catalog::InMemoryCatalog;
use crate::session::SessionRegistry;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Health status for a component or the whole service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but something needs attention
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
            details: Some(details),
        }
    }

    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Liveness and readiness probes over the catalog, sessions and cart mirror.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    catalog: Arc<InMemoryCatalog>,
    sessions: Arc<SessionRegistry>,
    mirror_dir: Option<PathBuf>,
}

impl HealthChecker {
    pub fn new(
        catalog: Arc<InMemoryCatalog>,
        sessions: Arc<SessionRegistry>,
        mirror_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            sessions,
            mirror_dir,
        }
    }

    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: Utc::now().timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ready once the catalog has products to sell.
    pub fn readiness(&self) -> ReadinessResponse {
        let mut components = BTreeMap::new();
        components.insert("catalog".to_string(), self.check_catalog());
        components.insert("sessions".to_string(), self.check_sessions());
        if let Some(mirror) = self.check_mirror() {
            components.insert("cart_mirror".to_string(), mirror);
        }

        let status = components
            .values()
            .fold(HealthStatus::Healthy, |acc, component| {
                acc.combine(component.status)
            });

        ReadinessResponse {
            ready: status != HealthStatus::Unhealthy,
            status,
            timestamp: Utc::now().timestamp(),
            components,
        }
    }

    fn check_catalog(&self) -> ComponentHealth {
        let products = self.catalog.len();
        if products == 0 {
            ComponentHealth::unhealthy("catalog has no products")
        } else {
            ComponentHealth::healthy(serde_json::json!({ "products": products }))
        }
    }

    fn check_sessions(&self) -> ComponentHealth {
        ComponentHealth::healthy(serde_json::json!({ "open": self.sessions.len() }))
    }

    // mirroring is best-effort, so a broken directory only degrades
    fn check_mirror(&self) -> Option<ComponentHealth> {
        let dir = self.mirror_dir.as_ref()?;
        let health = match std::fs::metadata(dir) {
            Ok(meta) if !meta.is_dir() => {
                ComponentHealth::degraded(format!("{} is not a directory", dir.display()))
            }
            Ok(meta) if meta.permissions().readonly() => {
                ComponentHealth::degraded(format!("{} is read-only", dir.display()))
            }
            Ok(_) => ComponentHealth::healthy(serde_json::json!({ "dir": dir })),
            Err(error) => {
                ComponentHealth::degraded(format!("{}: {}", dir.display(), error))
            }
        };
        Some(health)
    }
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness()
}
