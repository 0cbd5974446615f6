//! WattMCP Edge - Telemetry publisher and command executor
//!
//! Runs next to the power hardware and speaks to the hub over MQTT:
//! - Periodic telemetry publishing (temperature, voltage, current, power)
//! - Online/offline status announcements
//! - Remote command execution (control target updates, status snapshots)
//! - Native sensor library via FFI, with a simulated fallback

mod config;
mod hardware;

use anyhow::{Context, Result};
use config::EdgeConfig;
use hardware::Sensors;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Telemetry sample published on wattagent/device/{id}/telemetry
#[derive(Debug, Serialize)]
struct TelemetryMessage {
    timestamp: String,
    #[serde(rename = "temperature_C")]
    temperature_c: f32,
    voltage_out: f32,
    current_in: f32,
    #[serde(rename = "power_W")]
    power_w: f32,
}

/// Lifecycle announcement published on wattagent/device/{id}/status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusMessage {
    device_id: String,
    timestamp: String,
    status: String,
    ip_address: String,
    geo_location: String,
}

/// Command received on wattagent/device/{id}/command
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingCommand {
    command_id: String,
    action: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Reply published on wattagent/device/{id}/command/response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandReply {
    command_id: String,
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

impl CommandReply {
    fn success(command_id: &str, message: String, payload: Option<serde_json::Value>) -> Self {
        Self {
            command_id: command_id.to_string(),
            status: "SUCCESS".to_string(),
            message,
            payload,
        }
    }

    fn error(command_id: &str, message: String) -> Self {
        Self {
            command_id: command_id.to_string(),
            status: "ERROR".to_string(),
            message,
            payload: None,
        }
    }
}

/// Execute one command against the sensor backend. Pure with respect to
/// MQTT: publishing the reply is the caller's job.
fn execute_command(sensors: &dyn Sensors, command: IncomingCommand) -> CommandReply {
    match command.action.as_str() {
        "SET_CONTROL_TARGET" => {
            let Some(target) = command.payload.get("targetVoltage").and_then(|v| v.as_f64())
            else {
                return CommandReply::error(
                    &command.command_id,
                    "Missing targetVoltage in payload".to_string(),
                );
            };
            if sensors.set_voltage_reference(target as f32) {
                CommandReply::success(
                    &command.command_id,
                    format!("Control target updated to {target}V"),
                    None,
                )
            } else {
                CommandReply::error(
                    &command.command_id,
                    format!("Hardware rejected control target {target}V"),
                )
            }
        }
        "GET_DEVICE_STATUS" => {
            let readings = sensors.read();
            CommandReply::success(
                &command.command_id,
                "Device status snapshot".to_string(),
                Some(serde_json::json!({
                    "temperature_C": readings.temperature_c,
                    "voltage_out": readings.voltage_out,
                    "current_in": readings.current_in,
                    "power_W": readings.power_w(),
                    "backend": sensors.backend(),
                })),
            )
        }
        other => CommandReply::error(&command.command_id, format!("Unknown action: {other}")),
    }
}

struct EdgeClient {
    config: EdgeConfig,
    sensors: Box<dyn Sensors>,
    mqtt_client: AsyncClient,
}

impl EdgeClient {
    fn topic(&self, kind: &str) -> String {
        format!("wattagent/device/{}/{}", self.config.device_id, kind)
    }

    async fn publish_telemetry(&self) -> Result<()> {
        let readings = self.sensors.read();
        let message = TelemetryMessage {
            timestamp: chrono::Utc::now().to_rfc3339(),
            temperature_c: readings.temperature_c,
            voltage_out: readings.voltage_out,
            current_in: readings.current_in,
            power_w: readings.power_w(),
        };
        let payload =
            serde_json::to_string(&message).context("Failed to serialize telemetry")?;

        self.mqtt_client
            .publish(self.topic("telemetry"), QoS::AtLeastOnce, false, payload)
            .await
            .context("Failed to publish telemetry")?;
        Ok(())
    }

    async fn publish_status(&self, status: &str) -> Result<()> {
        let message = StatusMessage {
            device_id: self.config.device_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.to_string(),
            ip_address: config::primary_ipv4(),
            geo_location: self.config.geo_location.clone(),
        };
        let payload = serde_json::to_string(&message).context("Failed to serialize status")?;

        self.mqtt_client
            .publish(self.topic("status"), QoS::AtLeastOnce, false, payload)
            .await
            .context("Failed to publish status")?;
        Ok(())
    }

    async fn handle_command(&self, payload: &[u8]) {
        let command: IncomingCommand = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping unparseable command: {e}");
                return;
            }
        };

        info!("Executing {} ({})", command.action, command.command_id);
        let reply = execute_command(self.sensors.as_ref(), command);

        match serde_json::to_string(&reply) {
            Ok(body) => {
                if let Err(e) = self
                    .mqtt_client
                    .publish(self.topic("command/response"), QoS::AtLeastOnce, false, body)
                    .await
                {
                    error!("Failed to publish command response: {e}");
                }
            }
            Err(e) => error!("Failed to serialize command response: {e}"),
        }
    }

    /// Main loop: telemetry on a timer, commands as they arrive, clean
    /// offline announcement on ctrl-c.
    async fn run(&self, mut eventloop: rumqttc::EventLoop) -> Result<()> {
        let mut telemetry_timer =
            interval(Duration::from_secs_f64(self.config.telemetry_interval_secs));

        loop {
            tokio::select! {
                _ = telemetry_timer.tick() => {
                    if let Err(e) = self.publish_telemetry().await {
                        error!("Telemetry publish failed: {e:#}");
                    }
                }

                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to broker, announcing online");
                            self.mqtt_client
                                .subscribe(self.topic("command"), QoS::AtLeastOnce)
                                .await
                                .context("Failed to subscribe to command topic")?;
                            if let Err(e) = self.publish_status("online").await {
                                error!("Status publish failed: {e:#}");
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            self.handle_command(&publish.payload).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {e}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down, announcing offline");
                    if let Err(e) = self.publish_status("offline").await {
                        warn!("Offline announcement failed: {e:#}");
                    }
                    let _ = self.mqtt_client.disconnect().await;
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let config = EdgeConfig::from_env();
    info!("WattMCP edge starting - device: {}", config.device_id);

    let sensors = hardware::load_sensors(&config.hw_lib_path);
    info!("Sensor backend: {}", sensors.backend());

    let client_id = format!("wattmcp-edge-{}", config.device_id);
    let mut mqtt_options = MqttOptions::new(&client_id, &config.mqtt_broker, config.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        mqtt_options.set_credentials(username, password);
    }

    let (mqtt_client, eventloop) = AsyncClient::new(mqtt_options, 10);

    let client = EdgeClient { config, sensors, mqtt_client };
    client.run(eventloop).await.context("Edge client failed")?;

    Ok(())
}
