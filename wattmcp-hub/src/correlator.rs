/**
 * COMMAND CORRELATOR - Corrélation requête/réponse au-dessus du pub/sub
 *
 * RÔLE :
 * issue() génère un commandId unique, enregistre une entrée Pending et
 * publie la commande sur le topic de l'appareil sans attendre de réponse.
 * resolve() rattache une réponse asynchrone à son entrée ; query() permet
 * à l'émetteur de poller le résultat par commandId.
 *
 * FONCTIONNEMENT :
 * - une réponse pour un id inconnu/expiré est loggée puis jetée (pas une
 *   erreur du hub)
 * - un second resolve() pour un id déjà résolu est un no-op (dédup)
 * - les entrées Pending expirent après COMMAND_TTL ; un balayage
 *   périodique les marque Expired puis les évince — query() répond
 *   Unknown, indistinguable d'un id jamais émis
 */

use crate::models::{CommandRequest, CommandResponse};
use crate::router::command_topic;
use crate::state::{new_state, Shared};
use anyhow::Result;
use rumqttc::{AsyncClient, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Durée de vie d'une entrée (Pending non répondue ou Completed conservée)
pub const COMMAND_TTL: Duration = Duration::from_secs(300);

/// Période du balayage d'expiration
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum CommandState {
    Pending { issued_at: Instant },
    Completed { response: CommandResponse, resolved_at: Instant },
    Expired,
}

/// Résultat d'un poll par commandId
#[derive(Debug)]
pub enum CommandQuery {
    Completed(CommandResponse),
    Pending,
    Unknown,
}

pub struct CommandCorrelator {
    commands: Shared<HashMap<String, CommandState>>,
    mqtt_client: AsyncClient,
    ttl: Duration,
}

impl CommandCorrelator {
    pub fn new(mqtt_client: AsyncClient) -> Self {
        Self::with_ttl(mqtt_client, COMMAND_TTL)
    }

    pub fn with_ttl(mqtt_client: AsyncClient, ttl: Duration) -> Self {
        Self { commands: new_state(HashMap::new()), mqtt_client, ttl }
    }

    /// Émet une commande : id frais, entrée Pending, publication MQTT.
    /// Retourne dès que la publication est acceptée par le transport.
    pub async fn issue(
        &self,
        device_id: &str,
        action: &str,
        payload: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        let command_id = format!("cmd-{}", Uuid::new_v4());
        let request = CommandRequest {
            command_id: command_id.clone(),
            action: action.to_string(),
            payload,
        };
        let body = serde_json::to_string(&request)?;

        let _ = self
            .commands
            .lock()
            .insert(command_id.clone(), CommandState::Pending { issued_at: Instant::now() });

        if let Err(e) = self
            .mqtt_client
            .publish(command_topic(device_id), QoS::AtLeastOnce, false, body)
            .await
        {
            // publication refusée : on retire l'entrée, l'appelant voit l'erreur
            let _ = self.commands.lock().remove(&command_id);
            return Err(e.into());
        }

        println!("[correlator] issued {command_id} to {device_id}: {action}");
        Ok(command_id)
    }

    /// Rattache une réponse entrante à son entrée Pending.
    pub fn resolve(&self, response: CommandResponse) {
        let mut commands = self.commands.lock();
        match commands.get_mut(&response.command_id) {
            Some(state) => match state {
                CommandState::Pending { .. } => {
                    println!("[correlator] resolved {}", response.command_id);
                    *state = CommandState::Completed { response, resolved_at: Instant::now() };
                }
                CommandState::Completed { .. } => {
                    eprintln!(
                        "[correlator] duplicate response for {} ignored",
                        response.command_id
                    );
                }
                CommandState::Expired => {
                    eprintln!(
                        "[correlator] late response for expired command {} discarded",
                        response.command_id
                    );
                }
            },
            None => {
                eprintln!(
                    "[correlator] response for unknown command {} discarded",
                    response.command_id
                );
            }
        }
    }

    /// Poll par l'émetteur. Unknown couvre « jamais émis » et « évincé ».
    pub fn query(&self, command_id: &str) -> CommandQuery {
        let commands = self.commands.lock();
        match commands.get(command_id) {
            Some(CommandState::Pending { issued_at }) if issued_at.elapsed() < self.ttl => {
                CommandQuery::Pending
            }
            Some(CommandState::Completed { response, .. }) => {
                CommandQuery::Completed(response.clone())
            }
            // Pending dépassé (pas encore balayé), Expired, ou absent
            Some(_) | None => CommandQuery::Unknown,
        }
    }

    /// Marque Expired les Pending trop vieux, évince Expired et les
    /// Completed dont le résultat a dépassé le TTL. Retourne le nombre évincé.
    pub fn sweep_expired(&self) -> usize {
        let mut commands = self.commands.lock();
        for (command_id, state) in commands.iter_mut() {
            if let CommandState::Pending { issued_at } = state {
                if issued_at.elapsed() >= self.ttl {
                    println!("[correlator] command {command_id} expired without response");
                    *state = CommandState::Expired;
                }
            }
        }
        let before = commands.len();
        commands.retain(|_, state| match state {
            CommandState::Expired => false,
            CommandState::Completed { resolved_at, .. } => resolved_at.elapsed() < self.ttl,
            CommandState::Pending { .. } => true,
        });
        before - commands.len()
    }
}

/// Balayage périodique des commandes expirées (tâche de fond du hub)
pub fn spawn_expiry_sweep(correlator: Arc<CommandCorrelator>) {
    let _ = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            let _ = interval.tick().await;
            let evicted = correlator.sweep_expired();
            if evicted > 0 {
                println!("[correlator] evicted {evicted} stale command entries");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandStatus;
    use rumqttc::MqttOptions;
    use serde_json::json;

    // client réel non connecté : les publications s'empilent dans le canal
    // de requêtes tant que l'eventloop n'est pas pollée
    fn test_client() -> (AsyncClient, rumqttc::EventLoop) {
        AsyncClient::new(MqttOptions::new("test-correlator", "localhost", 1883), 10)
    }

    fn response(command_id: &str) -> CommandResponse {
        CommandResponse {
            command_id: command_id.to_string(),
            status: CommandStatus::Success,
            message: "ok".to_string(),
            payload: Some(json!({})),
        }
    }

    #[tokio::test]
    async fn issue_returns_fresh_pending_ids() {
        let (client, _eventloop) = test_client();
        let correlator = CommandCorrelator::new(client);

        let mut payload = HashMap::new();
        let _ = payload.insert("targetVoltage".to_string(), json!(11.5));
        let first = correlator.issue("mpsoc-01", "SET_CONTROL_TARGET", payload.clone()).await.unwrap();
        let second = correlator.issue("mpsoc-01", "SET_CONTROL_TARGET", payload).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("cmd-"));
        assert!(matches!(correlator.query(&first), CommandQuery::Pending));
        assert!(matches!(correlator.query(&second), CommandQuery::Pending));
    }

    #[tokio::test]
    async fn resolve_completes_then_dedups() {
        let (client, _eventloop) = test_client();
        let correlator = CommandCorrelator::new(client);
        let command_id = correlator.issue("mpsoc-01", "GET_DEVICE_STATUS", HashMap::new()).await.unwrap();

        correlator.resolve(response(&command_id));
        match correlator.query(&command_id) {
            CommandQuery::Completed(r) => {
                assert_eq!(r.status, CommandStatus::Success);
                assert_eq!(r.message, "ok");
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        // second resolve : no-op, le résultat stocké ne change pas
        let mut duplicate = response(&command_id);
        duplicate.message = "overwritten".to_string();
        correlator.resolve(duplicate);
        match correlator.query(&command_id) {
            CommandQuery::Completed(r) => assert_eq!(r.message, "ok"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_unknown_id_creates_nothing() {
        let (client, _eventloop) = test_client();
        let correlator = CommandCorrelator::new(client);

        correlator.resolve(response("cmd-never-issued"));
        assert!(matches!(correlator.query("cmd-never-issued"), CommandQuery::Unknown));
    }

    #[tokio::test]
    async fn pending_entries_expire_and_are_evicted() {
        let (client, _eventloop) = test_client();
        let correlator = CommandCorrelator::with_ttl(client, Duration::ZERO);
        let command_id = correlator.issue("mpsoc-01", "GET_DEVICE_STATUS", HashMap::new()).await.unwrap();

        // TTL nul : plus Pending même avant balayage
        assert!(matches!(correlator.query(&command_id), CommandQuery::Unknown));

        assert_eq!(correlator.sweep_expired(), 1);
        assert!(matches!(correlator.query(&command_id), CommandQuery::Unknown));

        // une réponse tardive après éviction est jetée sans créer d'entrée
        correlator.resolve(response(&command_id));
        assert!(matches!(correlator.query(&command_id), CommandQuery::Unknown));
    }
}
