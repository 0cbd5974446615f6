//! Edge publisher configuration
//!
//! Everything comes from the environment with working defaults, so the
//! binary runs against a local broker with the simulated sensor backend
//! out of the box.

use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub device_id: String,
    pub geo_location: String,
    pub telemetry_interval_secs: f64,
    pub hw_lib_path: String,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            device_id: "mpsoc-01".to_string(),
            geo_location: "West Lafayette, Indiana, USA".to_string(),
            telemetry_interval_secs: 5.0,
            hw_lib_path: "./libpowerdojo.so".to_string(),
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
        }
    }
}

impl EdgeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DEVICE_ID") {
            config.device_id = v;
        }
        if let Ok(v) = std::env::var("GEO_LOCATION") {
            config.geo_location = v;
        }
        if let Ok(v) = std::env::var("TELEMETRY_INTERVAL") {
            config.telemetry_interval_secs =
                parse_interval(&v, config.telemetry_interval_secs);
        }
        if let Ok(v) = std::env::var("HW_LIB_PATH") {
            config.hw_lib_path = v;
        }
        if let Ok(v) = std::env::var("MQTT_BROKER") {
            config.mqtt_broker = v;
        }
        if let Ok(v) = std::env::var("MQTT_PORT") {
            config.mqtt_port = v.parse().unwrap_or(config.mqtt_port);
        }
        config.mqtt_username = std::env::var("MQTT_USERNAME").ok().filter(|v| !v.is_empty());
        config.mqtt_password = std::env::var("MQTT_PASSWORD").ok().filter(|v| !v.is_empty());

        config
    }
}

/// Telemetry interval must be a finite positive number of seconds;
/// anything else (zero, negative, NaN, garbage) keeps the default so the
/// publish timer can always be constructed.
fn parse_interval(raw: &str, default: f64) -> f64 {
    match raw.parse::<f64>() {
        Ok(secs) if secs > 0.0 && secs.is_finite() => secs,
        _ => default,
    }
}

/// First non-loopback IPv4 address, reported in status messages
pub fn primary_ipv4() -> String {
    if let Ok(interfaces) = if_addrs::get_if_addrs() {
        for interface in interfaces {
            if interface.is_loopback() {
                continue;
            }
            if let IpAddr::V4(addr) = interface.ip() {
                return addr.to_string();
            }
        }
    }
    "127.0.0.1".to_string()
}
