/**
 * DURABLE STORE - Couche de repli clé/valeur avec expiration
 *
 * RÔLE :
 * Miroir best-effort du cache télémétrie. Redis en production,
 * store mémoire in-process quand REDIS_HOST n'est pas configuré
 * (dev, tests). L'échec d'une écriture miroir est loggé côté cache,
 * jamais propagé : la copie mémoire reste la référence.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::StoreConf;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Store clé/valeur durable avec TTL par entrée.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Implémentation Redis (SET EX / GET), connexion gérée par ConnectionManager.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(cfg: &StoreConf) -> Result<Self, StoreError> {
        let client = redis::Client::open(cfg.url())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }
}

/// Store mémoire : même contrat (TTL honoré à la lecture), aucune dépendance
/// réseau. Sélectionné au démarrage quand Redis n'est pas configuré.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant, Duration)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let _ = self.entries.lock().insert(key.to_string(), (value, Instant::now(), ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock();
        Ok(entries.get(key).and_then(|(value, inserted_at, ttl)| {
            if inserted_at.elapsed() < *ttl {
                Some(value.clone())
            } else {
                None
            }
        }))
    }
}
