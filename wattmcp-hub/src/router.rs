/**
 * TOPIC ROUTER - Démultiplexage des messages MQTT entrants
 *
 * RÔLE :
 * Transforme un couple (topic, payload brut) en message typé, validé à la
 * frontière. Grammaire : wattagent/device/<deviceId>/<kind> avec
 * kind ∈ {telemetry, status, command/response}.
 *
 * Un topic ou un payload invalide produit une RouteError : le message est
 * loggé puis abandonné par l'appelant, jamais fatal au processus.
 */

use crate::models::{CommandResponse, StatusEvent, TelemetrySample};
use serde_json::Value;
use thiserror::Error;

/// Namespace racine de tous les topics du système
pub const NAMESPACE: &str = "wattagent";

/// Message entrant après routage, typé par kind
#[derive(Debug, Clone)]
pub enum RoutedMessage {
    Telemetry { device_id: String, sample: TelemetrySample },
    Status { device_id: String, event: StatusEvent },
    CommandResponse { device_id: String, response: CommandResponse },
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed topic: {0}")]
    MalformedTopic(String),
    #[error("malformed payload on {topic}: {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Route un message brut vers sa variante typée.
pub fn route(topic: &str, payload: &[u8]) -> Result<RoutedMessage, RouteError> {
    let parts: Vec<&str> = topic.split('/').collect();

    // au moins 3 segments après le namespace : device / <id> / <kind>
    if parts.len() < 4 || parts[0] != NAMESPACE || parts[1] != "device" {
        return Err(RouteError::MalformedTopic(topic.to_string()));
    }
    let device_id = parts[2];
    if device_id.is_empty() {
        return Err(RouteError::MalformedTopic(topic.to_string()));
    }

    // le payload doit être un objet JSON, quel que soit le kind
    let malformed = |source| RouteError::MalformedPayload { topic: topic.to_string(), source };

    match &parts[3..] {
        ["telemetry"] => {
            let mut sample: TelemetrySample =
                serde_json::from_slice(payload).map_err(malformed)?;
            sample.device_id = device_id.to_string();
            // invariant : power_W dérivé, jamais pris tel quel du wire
            sample.power_w = sample.voltage_out * sample.current_in;
            Ok(RoutedMessage::Telemetry { device_id: device_id.to_string(), sample })
        }
        ["status"] => {
            let mut event: StatusEvent = serde_json::from_slice(payload).map_err(malformed)?;
            // le topic fait autorité sur l'identité
            event.device_id = device_id.to_string();
            Ok(RoutedMessage::Status { device_id: device_id.to_string(), event })
        }
        ["command", "response"] => {
            let response: CommandResponse =
                serde_json::from_slice(payload).map_err(malformed)?;
            Ok(RoutedMessage::CommandResponse { device_id: device_id.to_string(), response })
        }
        _ => Err(RouteError::MalformedTopic(topic.to_string())),
    }
}

/// Les trois patterns wildcard auxquels le hub s'abonne
pub fn subscription_patterns() -> [String; 3] {
    [
        format!("{NAMESPACE}/device/+/telemetry"),
        format!("{NAMESPACE}/device/+/status"),
        format!("{NAMESPACE}/device/+/command/response"),
    ]
}

/// Topic de commande d'un appareil donné (publication hub → edge)
pub fn command_topic(device_id: &str) -> String {
    format!("{NAMESPACE}/device/{device_id}/command")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandStatus, DeviceState};
    use serde_json::json;

    fn telemetry_payload() -> Vec<u8> {
        json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "temperature_C": 50.0,
            "voltage_out": 12.0,
            "current_in": 2.0,
            "power_W": 999.0
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn routes_telemetry_and_recomputes_power() {
        let routed = route("wattagent/device/mpsoc-01/telemetry", &telemetry_payload()).unwrap();
        match routed {
            RoutedMessage::Telemetry { device_id, sample } => {
                assert_eq!(device_id, "mpsoc-01");
                assert_eq!(sample.device_id, "mpsoc-01");
                assert_eq!(sample.temperature_c, 50.0);
                // power_W du wire (999.0) ignoré
                assert_eq!(sample.power_w, 24.0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn routes_status() {
        let payload = json!({
            "deviceId": "spoofed-id",
            "timestamp": "2025-01-01T00:00:00Z",
            "status": "offline"
        })
        .to_string();
        let routed = route("wattagent/device/mpsoc-01/status", payload.as_bytes()).unwrap();
        match routed {
            RoutedMessage::Status { device_id, event } => {
                assert_eq!(device_id, "mpsoc-01");
                // le topic écrase le deviceId du payload
                assert_eq!(event.device_id, "mpsoc-01");
                assert_eq!(event.status, DeviceState::Offline);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn routes_command_response() {
        let payload = json!({
            "commandId": "cmd-123",
            "status": "SUCCESS",
            "message": "ok"
        })
        .to_string();
        let routed =
            route("wattagent/device/mpsoc-01/command/response", payload.as_bytes()).unwrap();
        match routed {
            RoutedMessage::CommandResponse { response, .. } => {
                assert_eq!(response.command_id, "cmd-123");
                assert_eq!(response.status, CommandStatus::Success);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_topics() {
        for topic in [
            "wattagent/device/telemetry",             // id manquant
            "wattagent/device//telemetry",            // id vide
            "othernamespace/device/mpsoc-01/telemetry",
            "wattagent/host/mpsoc-01/telemetry",
            "wattagent/device/mpsoc-01/unknown",
            "wattagent/device/mpsoc-01/command",      // sens hub → edge, pas routé
            "wattagent",
        ] {
            assert!(
                matches!(route(topic, &telemetry_payload()), Err(RouteError::MalformedTopic(_))),
                "expected MalformedTopic for {topic}"
            );
        }
    }

    #[test]
    fn rejects_malformed_payloads() {
        for payload in [&b"not json"[..], b"[1,2,3]", b"{\"timestamp\": \"x\"}"] {
            assert!(matches!(
                route("wattagent/device/mpsoc-01/telemetry", payload),
                Err(RouteError::MalformedPayload { .. })
            ));
        }
        // statut inconnu rejeté à la frontière
        let payload = json!({
            "deviceId": "mpsoc-01",
            "timestamp": "2025-01-01T00:00:00Z",
            "status": "rebooting"
        })
        .to_string();
        assert!(matches!(
            route("wattagent/device/mpsoc-01/status", payload.as_bytes()),
            Err(RouteError::MalformedPayload { .. })
        ));
    }
}
