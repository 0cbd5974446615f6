use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Instantané santé du hub servi par GET /system/health
#[derive(Debug, Serialize)]
pub struct HubHealth {
    pub status: String,
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub devices_registered: u32,
    pub telemetry_cached: u32,
    pub timestamp: String,
}

/// Suivi de l'état de la connexion MQTT et de l'uptime du processus.
/// Clonable : partagé entre la boucle d'ingestion et l'API.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        let _ = self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, devices_registered: u32, telemetry_cached: u32) -> HubHealth {
        HubHealth {
            status: "healthy".to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            devices_registered,
            telemetry_cached,
            timestamp: now_rfc3339(),
        }
    }
}

/// Timestamp RFC3339 courant (API et logs)
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_reports_connection_lifecycle() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.get_health(1, 0).mqtt_status, "connecting");

        tracker.mark_mqtt_connected();
        assert_eq!(tracker.get_health(1, 0).mqtt_status, "connected");

        tracker.increment_reconnects();
        let health = tracker.get_health(1, 0);
        assert_eq!(health.mqtt_status, "reconnecting");
        assert_eq!(health.mqtt_reconnects, 1);
        assert_eq!(health.status, "healthy");
    }
}
