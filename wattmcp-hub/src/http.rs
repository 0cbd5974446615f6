/**
 * API REST WATTMCP - Surface requête/réponse du hub
 *
 * RÔLE :
 * Expose l'état du hub (registre, cache télémétrie, corrélateur) aux
 * appelants HTTP : agents IA, dashboards, scripts.
 *
 * ROUTES :
 * - GET  /health                                (ouverte)
 * - GET  /system/health                         (santé détaillée)
 * - GET  /devices                               (liste des ids)
 * - GET  /devices/{id}                          (fiche statique)
 * - GET  /devices/{id}/live                     (dernière télémétrie)
 * - POST /devices/{id}/command                  (émission de commande)
 * - GET  /devices/{id}/command/{command_id}     (poll du résultat)
 *
 * SÉCURITÉ :
 * Bearer token obligatoire sur toutes les routes sauf /health, vérifié
 * contre le jeu statique de credentials. Les erreurs sortent toujours en
 * JSON structuré avec le statut HTTP adéquat, jamais en stack trace.
 */

use crate::cache::TelemetryCache;
use crate::config::AuthConf;
use crate::correlator::{CommandCorrelator, CommandQuery};
use crate::health::{now_rfc3339, HealthTracker, HubHealth};
use crate::models::{CommandResponse, Device};
use crate::registry::SharedDeviceRegistry;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedDeviceRegistry,
    pub cache: Arc<TelemetryCache>,
    pub correlator: Arc<CommandCorrelator>,
    pub health: HealthTracker,
    pub auth: AuthConf,
}

/// Erreurs visibles par l'appelant, sérialisées en {"error": ...}
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid API key")]
    Unauthorized,
    #[error("Device not found")]
    UnknownDevice,
    #[error("No telemetry data available")]
    NoTelemetry,
    #[error("Command response not found")]
    CommandNotFound,
    #[error("Command publish failed")]
    PublishFailed,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UnknownDevice | ApiError::NoTelemetry | ApiError::CommandNotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::PublishFailed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn require_bearer(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if app.auth.is_authorized(token) => Ok(next.run(req).await),
        _ => Err(ApiError::Unauthorized),
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/system/health", get(system_health))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/live", get(get_device_live))
        .route("/devices/{id}/command", post(send_command))
        .route("/devices/{id}/command/{command_id}", get(get_command_response))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_bearer))
        .with_state(app_state)
}

// GET /health (ouverte, toujours 200 si le processus tourne)
async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "timestamp": now_rfc3339() }))
}

// GET /system/health (état infrastructure)
async fn system_health(State(app): State<AppState>) -> Json<HubHealth> {
    let devices = app.registry.len().await as u32;
    let cached = app.cache.telemetry_count() as u32;
    Json(app.health.get_health(devices, cached))
}

// GET /devices (liste des ids, ordre d'insertion)
async fn list_devices(State(app): State<AppState>) -> Json<Value> {
    Json(json!({ "devices": app.registry.list().await }))
}

// GET /devices/{id} (fiche statique)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    app.registry.lookup(&id).await.map(Json).ok_or(ApiError::UnknownDevice)
}

// GET /devices/{id}/live (dernières données opérationnelles)
async fn get_device_live(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !app.registry.contains(&id).await {
        return Err(ApiError::UnknownDevice);
    }
    let sample = app.cache.get_telemetry(&id).await.ok_or(ApiError::NoTelemetry)?;

    Ok(Json(json!({
        "deviceId": id,
        "timestamp": sample.timestamp,
        "temperature": { "value": sample.temperature_c, "unit": "C" },
        "controlStrategy": { "name": "PID", "targetVoltage": sample.voltage_out },
    })))
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    action: String,
    #[serde(default)]
    payload: HashMap<String, Value>,
}

// POST /devices/{id}/command (émission, retour immédiat avec commandId)
async fn send_command(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Json<Value>, ApiError> {
    if !app.registry.contains(&id).await {
        return Err(ApiError::UnknownDevice);
    }

    let command_id = app
        .correlator
        .issue(&id, &body.action, body.payload)
        .await
        .map_err(|e| {
            eprintln!("[api] command publish to {id} failed: {e}");
            ApiError::PublishFailed
        })?;

    Ok(Json(json!({ "message": "Command sent successfully", "commandId": command_id })))
}

// GET /devices/{id}/command/{command_id} (poll ; 404 tant que non résolu)
async fn get_command_response(
    State(app): State<AppState>,
    Path((_id, command_id)): Path<(String, String)>,
) -> Result<Json<CommandResponse>, ApiError> {
    match app.correlator.query(&command_id) {
        CommandQuery::Completed(response) => Ok(Json(response)),
        CommandQuery::Pending | CommandQuery::Unknown => Err(ApiError::CommandNotFound),
    }
}
