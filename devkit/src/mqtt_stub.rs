/*!
Mock MQTT Client pour développement sans broker

Permet de développer et tester les composants WattMCP sans démarrer un
broker MQTT réel : enregistre les publications sortantes, et injecte du
trafic entrant comme si un appareil publiait sur son topic wattagent.
*/

use anyhow::Result;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Message capturé (sortant) ou injecté (entrant) par le mock
#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    /// Payload décodé en JSON
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Mock MQTT Client qui tient le rôle du broker dans les tests :
/// côté sortant il capture ce que le composant publie, côté entrant il
/// rejoue du trafic appareil via un channel.
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canal côté consommateur : tout ce qui passe par
    /// `simulate_incoming`/`simulate_device_publish` arrive ici.
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.inbound.lock().unwrap() = Some(sender);
        receiver
    }

    /// Capture une publication (signature compatible AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        log::info!("📤 [MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published.lock().unwrap().push(message);
        Ok(())
    }

    /// Capture un abonnement (signature compatible AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        log::info!("📥 [MOCK] Subscribed to {}", topic);
        self.subscriptions.lock().unwrap().push(topic);
        Ok(())
    }

    /// Injecte un message entrant arbitraire
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        log::info!("📨 [MOCK] Simulated incoming: {}", message.topic);
        if let Some(sender) = self.inbound.lock().unwrap().as_ref() {
            sender.send(message).map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }
        Ok(())
    }

    /// Injecte la publication d'un appareil sur son topic wattagent
    pub fn simulate_device_publish(
        &self,
        device_id: &str,
        kind: &str,
        payload: &Value,
    ) -> Result<()> {
        self.simulate_incoming(
            WattMessageBuilder::topic(device_id, kind),
            payload.to_string().into_bytes(),
        )
    }

    /// Toutes les publications capturées (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Tous les abonnements capturés (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Publications capturées sur le topic wattagent d'un appareil
    pub fn published_on(&self, device_id: &str, kind: &str) -> Vec<MockMessage> {
        let topic = WattMessageBuilder::topic(device_id, kind);
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse la dernière publication d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let published = self.published.lock().unwrap();
        match published.iter().rev().find(|msg| msg.topic == topic) {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Reset des captures
    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

/// Helper pour créer des messages de test conformes au namespace wattagent
pub struct WattMessageBuilder;

impl WattMessageBuilder {
    /// Topic complet wattagent/device/{id}/{kind}
    pub fn topic(device_id: &str, kind: &str) -> String {
        format!("wattagent/device/{device_id}/{kind}")
    }

    /// Échantillon de télémétrie horodaté maintenant (power_W dérivé)
    pub fn telemetry(temperature_c: f64, voltage_out: f64, current_in: f64) -> Value {
        Self::telemetry_at(&chrono::Utc::now().to_rfc3339(), temperature_c, voltage_out, current_in)
    }

    /// Échantillon de télémétrie à horodatage fixé (tests déterministes)
    pub fn telemetry_at(
        timestamp: &str,
        temperature_c: f64,
        voltage_out: f64,
        current_in: f64,
    ) -> Value {
        serde_json::json!({
            "timestamp": timestamp,
            "temperature_C": temperature_c,
            "voltage_out": voltage_out,
            "current_in": current_in,
            "power_W": voltage_out * current_in
        })
    }

    /// Événement de statut ("online" / "offline")
    pub fn status(device_id: &str, status: &str) -> Value {
        serde_json::json!({
            "deviceId": device_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "status": status
        })
    }

    /// Commande sortante (telle qu'émise par le hub)
    pub fn command(command_id: &str, action: &str, payload: Value) -> Value {
        serde_json::json!({
            "commandId": command_id,
            "action": action,
            "payload": payload
        })
    }

    /// Réponse de commande ("SUCCESS" / "ERROR")
    pub fn command_response(command_id: &str, status: &str, message: &str) -> Value {
        serde_json::json!({
            "commandId": command_id,
            "status": status,
            "message": message
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn test_mock_client_publish_subscribe() {
        init_logs();
        let client = MockMqttClient::new();

        client.subscribe("wattagent/device/+/telemetry", QoS::AtLeastOnce).await.unwrap();
        assert_eq!(client.get_subscriptions(), vec!["wattagent/device/+/telemetry"]);

        let payload = b"test message";
        client
            .publish("wattagent/device/mpsoc-01/telemetry", QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .unwrap();

        let messages = client.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "wattagent/device/mpsoc-01/telemetry");
        assert_eq!(messages[0].payload, payload);
        assert_eq!(client.published_on("mpsoc-01", "telemetry").len(), 1);
        assert!(client.published_on("mpsoc-01", "status").is_empty());
    }

    #[tokio::test]
    async fn test_simulated_device_traffic_reaches_receiver() {
        init_logs();
        let client = MockMqttClient::new();
        let mut inbound = client.setup_receiver();

        let telemetry = WattMessageBuilder::telemetry(50.0, 12.0, 2.0);
        client.simulate_device_publish("mpsoc-01", "telemetry", &telemetry).unwrap();

        let message = inbound.try_recv().unwrap();
        assert_eq!(message.topic, "wattagent/device/mpsoc-01/telemetry");
        assert_eq!(message.json().unwrap()["temperature_C"], 50.0);
    }

    #[tokio::test]
    async fn test_json_message_parsing() {
        init_logs();
        let client = MockMqttClient::new();

        let topic = WattMessageBuilder::topic("mpsoc-01", "telemetry");
        for voltage in [12.0, 11.5] {
            let telemetry = WattMessageBuilder::telemetry(50.0, voltage, 2.0);
            let payload = serde_json::to_vec(&telemetry).unwrap();
            client.publish(topic.clone(), QoS::AtLeastOnce, false, payload).await.unwrap();
        }

        // la dernière publication gagne
        let parsed: Option<serde_json::Value> = client.get_last_json_message(&topic).unwrap();
        assert_eq!(parsed.unwrap()["voltage_out"], 11.5);
    }

    #[test]
    fn test_message_builders() {
        let telemetry = WattMessageBuilder::telemetry_at("2025-01-01T00:00:00Z", 45.0, 12.0, 2.5);
        assert_eq!(telemetry["timestamp"], "2025-01-01T00:00:00Z");
        assert_eq!(telemetry["power_W"], 30.0);

        let status = WattMessageBuilder::status("mpsoc-01", "online");
        assert_eq!(status["deviceId"], "mpsoc-01");
        assert_eq!(status["status"], "online");

        let reply = WattMessageBuilder::command_response("cmd-1", "SUCCESS", "ok");
        assert_eq!(reply["commandId"], "cmd-1");
        assert_eq!(reply["status"], "SUCCESS");

        assert_eq!(
            WattMessageBuilder::topic("mpsoc-01", "command/response"),
            "wattagent/device/mpsoc-01/command/response"
        );
    }
}
