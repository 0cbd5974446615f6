/**
 * INGRESS HUB - Connexion MQTT et boucle d'ingestion
 *
 * RÔLE :
 * Possède la connexion au broker. À chaque (re)connexion, réabonne les
 * trois patterns wildcard wattagent/device/+/{telemetry,status,
 * command/response}. Chaque publish entrant passe par le Topic Router ;
 * les échecs de routage sont loggés puis abandonnés, les routes valides
 * sont dispatchées vers le cache ou le corrélateur.
 *
 * Le dispatch ne bloque jamais sur l'I/O aval (le miroir durable est
 * détaché côté cache). Une erreur transport n'est jamais fatale :
 * rumqttc reconnecte, on backoff puis on repart.
 */

use crate::cache::TelemetryCache;
use crate::config::MqttConf;
use crate::correlator::CommandCorrelator;
use crate::health::HealthTracker;
use crate::router::{route, subscription_patterns, RoutedMessage};
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

/// Construit le client MQTT du hub (credentials + TLS optionnels).
/// Une configuration TLS illisible dégrade en connexion claire avec un
/// log d'erreur : le hub démarre quand même, seul le bind de l'API est
/// fatal au processus.
pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new("wattmcp-hub", &cfg.host, cfg.port);
    let _ = opts.set_keep_alive(Duration::from_secs(15));

    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        let _ = opts.set_credentials(username, password);
    }

    if cfg.use_tls {
        match tls_configuration(cfg) {
            Ok(tls) => {
                let _ = opts.set_transport(Transport::Tls(tls));
            }
            Err(e) => eprintln!("[hub] TLS setup failed ({e:#}), connecting without TLS"),
        }
    }

    AsyncClient::new(opts, 64)
}

fn tls_configuration(cfg: &MqttConf) -> Result<TlsConfiguration> {
    let ca_path = cfg
        .ca_certs
        .as_deref()
        .context("MQTT_CA_CERTS is required when MQTT_USE_TLS=true")?;
    let ca = std::fs::read(ca_path).with_context(|| format!("reading {ca_path}"))?;
    let client_auth = match (&cfg.certfile, &cfg.keyfile) {
        (Some(cert), Some(key)) => Some((
            std::fs::read(cert).with_context(|| format!("reading {cert}"))?,
            std::fs::read(key).with_context(|| format!("reading {key}"))?,
        )),
        _ => None,
    };
    Ok(TlsConfiguration::Simple { ca, alpn: None, client_auth })
}

/// Applique un message routé à l'état du hub. Synchrone : les écritures
/// miroir sont détachées par le cache lui-même.
pub fn dispatch(message: RoutedMessage, cache: &TelemetryCache, correlator: &CommandCorrelator) {
    match message {
        RoutedMessage::Telemetry { sample, .. } => cache.put_telemetry(sample),
        RoutedMessage::Status { device_id, event } => {
            println!("[hub] device {device_id} reported {:?}", event.status);
            cache.put_status(event);
        }
        RoutedMessage::CommandResponse { response, .. } => correlator.resolve(response),
    }
}

/// Boucle d'ingestion : une task, tout l'inbound passe par là.
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    cache: Arc<TelemetryCache>,
    correlator: Arc<CommandCorrelator>,
    health: HealthTracker,
) {
    let _ = task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    // réabonnement systématique : rumqttc ne rejoue pas
                    // les subscriptions après reconnexion
                    for pattern in subscription_patterns() {
                        if let Err(e) = client.subscribe(&pattern, QoS::AtLeastOnce).await {
                            eprintln!("[hub] subscribe {pattern} failed: {e:?}");
                        }
                    }
                    println!("[hub] MQTT connected, subscriptions refreshed");
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    match route(&publish.topic, &publish.payload) {
                        Ok(message) => dispatch(message, &cache, &correlator),
                        Err(e) => eprintln!("[hub] dropped inbound message: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("[hub] MQTT error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::models::{CommandStatus, DeviceState};
    use crate::store::MemoryStore;
    use rumqttc::MqttOptions;
    use wattmcp_devkit::{MockMqttClient, WattMessageBuilder};

    fn hub_state() -> (Arc<TelemetryCache>, Arc<CommandCorrelator>, rumqttc::EventLoop) {
        let cache = Arc::new(TelemetryCache::new(Arc::new(MemoryStore::new())));
        let (client, eventloop) =
            AsyncClient::new(MqttOptions::new("test-hub", "localhost", 1883), 10);
        let correlator = Arc::new(CommandCorrelator::new(client));
        (cache, correlator, eventloop)
    }

    #[tokio::test]
    async fn telemetry_publish_lands_in_cache() {
        let (cache, correlator, _eventloop) = hub_state();

        let payload = WattMessageBuilder::telemetry_at("2025-01-01T00:00:00Z", 50.0, 12.0, 2.0);
        let topic = WattMessageBuilder::topic("mpsoc-01", "telemetry");
        let message = route(&topic, payload.to_string().as_bytes()).unwrap();
        dispatch(message, &cache, &correlator);

        let sample = cache.get_telemetry("mpsoc-01").await.unwrap();
        assert_eq!(sample.temperature_c, 50.0);
        assert_eq!(sample.power_w, sample.voltage_out * sample.current_in);
        assert_eq!(sample.power_w, 24.0);
    }

    #[tokio::test]
    async fn malformed_topic_mutates_nothing() {
        let (cache, _correlator, _eventloop) = hub_state();

        let payload = WattMessageBuilder::telemetry(50.0, 12.0, 2.0);
        // segment deviceId manquant
        assert!(route("wattagent/device/telemetry", payload.to_string().as_bytes()).is_err());
        assert!(cache.get_telemetry("telemetry").await.is_none());
        assert_eq!(cache.telemetry_count(), 0);
    }

    #[tokio::test]
    async fn status_and_command_response_are_dispatched() {
        let (cache, correlator, _eventloop) = hub_state();

        let command_id = correlator
            .issue("mpsoc-01", "GET_DEVICE_STATUS", Default::default())
            .await
            .unwrap();

        let status = WattMessageBuilder::status("mpsoc-01", "online");
        let message =
            route(&WattMessageBuilder::topic("mpsoc-01", "status"), status.to_string().as_bytes())
                .unwrap();
        dispatch(message, &cache, &correlator);
        assert_eq!(cache.get_status("mpsoc-01").await.unwrap().status, DeviceState::Online);

        let reply = WattMessageBuilder::command_response(&command_id, "SUCCESS", "done");
        let message = route(
            &WattMessageBuilder::topic("mpsoc-01", "command/response"),
            reply.to_string().as_bytes(),
        )
        .unwrap();
        dispatch(message, &cache, &correlator);

        match correlator.query(&command_id) {
            crate::correlator::CommandQuery::Completed(r) => {
                assert_eq!(r.status, CommandStatus::Success);
                assert_eq!(r.message, "done");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn simulated_device_traffic_flows_to_state() {
        let (cache, correlator, _eventloop) = hub_state();

        // broker simulé : le trafic appareil passe par son channel entrant,
        // exactement ce que la boucle d'ingestion consomme
        let broker = MockMqttClient::new();
        let mut inbound = broker.setup_receiver();

        let command_id = correlator
            .issue("mpsoc-01", "SET_CONTROL_TARGET", Default::default())
            .await
            .unwrap();

        broker
            .simulate_device_publish(
                "mpsoc-01",
                "telemetry",
                &WattMessageBuilder::telemetry_at("2025-01-01T00:00:00Z", 50.0, 12.0, 2.0),
            )
            .unwrap();
        broker
            .simulate_device_publish(
                "mpsoc-01",
                "status",
                &WattMessageBuilder::status("mpsoc-01", "online"),
            )
            .unwrap();
        broker
            .simulate_device_publish(
                "mpsoc-01",
                "command/response",
                &WattMessageBuilder::command_response(&command_id, "SUCCESS", "applied"),
            )
            .unwrap();

        while let Ok(message) = inbound.try_recv() {
            let routed = route(&message.topic, &message.payload).unwrap();
            dispatch(routed, &cache, &correlator);
        }

        assert_eq!(cache.get_telemetry("mpsoc-01").await.unwrap().power_w, 24.0);
        assert_eq!(cache.get_status("mpsoc-01").await.unwrap().status, DeviceState::Online);
        match correlator.query(&command_id) {
            crate::correlator::CommandQuery::Completed(r) => assert_eq!(r.message, "applied"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_tls_config_degrades_to_plain() {
        let mut cfg = HubConfig::default().mqtt;
        cfg.use_tls = true;
        cfg.ca_certs = Some("/nonexistent/ca.pem".to_string());
        // le client est construit malgré la configuration TLS illisible
        let (_client, _eventloop) = create_mqtt_client(&cfg);

        cfg.ca_certs = None;
        let (_client, _eventloop) = create_mqtt_client(&cfg);
    }
}
