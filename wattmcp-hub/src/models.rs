use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fiche statique d'un appareil (registre, immuable après chargement)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub ip_address: String,
    pub geo_location: String,
    pub model_parameters: HashMap<String, serde_json::Value>,
}

/// Échantillon télémétrie (payload wattagent/device/{id}/telemetry)
/// Le deviceId vient du topic, pas du payload ; power_W est toujours
/// recalculé à l'ingestion (voltage_out * current_in).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default, rename = "deviceId")]
    pub device_id: String,
    pub timestamp: String,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f64,
    pub voltage_out: f64,
    pub current_in: f64,
    #[serde(rename = "power_W")]
    pub power_w: f64,
}

/// État online/offline d'un appareil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

/// Événement de statut (payload wattagent/device/{id}/status)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub timestamp: String,
    pub status: DeviceState,
}

/// Commande publiée vers wattagent/device/{id}/command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command_id: String,
    pub action: String,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

/// Réponse asynchrone d'un appareil (payload .../command/response)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command_id: String,
    pub status: CommandStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}
