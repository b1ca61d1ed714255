/**
 * API REST HEARTWATCH - Statut de la flotte en lecture seule
 *
 * RÔLE :
 * Expose l'état du registre et la santé du moniteur pour les opérateurs
 * (dashboard, scripts de supervision). Aucune route ne modifie l'état.
 *
 * ROUTES :
 * - GET /health          -> "ok" (toujours accessible)
 * - GET /system/health   -> MonitorHealth
 * - GET /devices         -> liste des devices
 * - GET /devices/{id}    -> détail d'un device (404 si inconnu)
 *
 * SÉCURITÉ :
 * Si HEARTWATCH_API_KEY est défini, header x-api-key obligatoire hors /health.
 */

use crate::dispatcher::AlertDispatcher;
use crate::health::{HealthTracker, MonitorHealth};
use crate::registry::{DeviceHealth, SharedRegistry};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Json, Router};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::time::Instant;

#[derive(Debug, serde::Serialize)]
pub struct DeviceView {
    pub device_id: String,
    pub last_heard_at: String,
    pub silent_for_seconds: u64,
    pub in_alert_state: bool,
    pub last_sequence: u32,
    pub signal_strength: f32,
    pub library_fingerprint: String,
    pub firmware_fingerprint: String,
    /// Silencieux au-delà du timeout (même si le sweeper n'est pas encore passé)
    pub overdue: bool,
}

pub fn to_view(d: &DeviceHealth, now: Instant, timeout: Duration) -> DeviceView {
    let silent = d.silent_for(now);
    DeviceView {
        device_id: d.device_id.clone(),
        last_heard_at: d.last_heard_at.format(&Rfc3339).unwrap_or_default(),
        silent_for_seconds: silent.as_secs(),
        in_alert_state: d.in_alert_state,
        last_sequence: d.last_sequence,
        signal_strength: d.signal_strength,
        library_fingerprint: d.library_fingerprint.to_string(),
        firmware_fingerprint: d.firmware_fingerprint.to_string(),
        overdue: silent >= timeout,
    }
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("HEARTWATCH_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub dispatcher: AlertDispatcher,
    pub health_tracker: HealthTracker,
    pub inactivity_timeout: Duration,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/devices", get(get_devices))
        .route("/devices/{id}", get(get_device))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /devices (liste, ordonnée par id)
async fn get_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    let now = Instant::now();
    let list = app
        .registry
        .snapshot()
        .iter()
        .map(|(_, d)| to_view(d, now, app.inactivity_timeout))
        .collect();
    Json(list)
}

// GET /devices/{id} (détail)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, StatusCode> {
    let Some(d) = app.registry.get(&id) else { return Err(StatusCode::NOT_FOUND); };
    Ok(Json(to_view(&d, Instant::now(), app.inactivity_timeout)))
}

// GET /system/health (état du moniteur)
async fn get_system_health(State(app): State<AppState>) -> Json<MonitorHealth> {
    Json(app.health_tracker.get_health(&app.registry, &app.dispatcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::Fingerprint;
    use crate::registry::DeviceRegistry;

    #[tokio::test(start_paused = true)]
    async fn test_device_view() {
        let registry = DeviceRegistry::new();
        registry.update("dev-1", Instant::now(), |state, _| {
            state.last_sequence = 12;
            state.firmware_fingerprint = Fingerprint(0xbeef);
        });

        tokio::time::advance(Duration::from_secs(31)).await;
        let d = registry.get("dev-1").unwrap();
        let view = to_view(&d, Instant::now(), Duration::from_secs(30));
        assert_eq!(view.silent_for_seconds, 31);
        assert!(view.overdue);
        assert!(!view.in_alert_state);
        assert_eq!(view.last_sequence, 12);
        assert_eq!(view.firmware_fingerprint, "0000beef");
        assert!(view.last_heard_at.contains('T'));
    }
}
