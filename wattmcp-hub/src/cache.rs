/**
 * TELEMETRY CACHE - Dernière valeur connue par appareil, avec TTL
 *
 * RÔLE :
 * Cache latest-wins pour la télémétrie et le statut de chaque appareil.
 * Lecture : mémoire d'abord, repli sur le store durable si absent/expiré.
 * Écriture : la mémoire est mise à jour sous verrou court, puis la valeur
 * est miroitée vers le store durable en tâche détachée (best-effort,
 * bornée par un sémaphore) ; le chemin de dispatch n'attend jamais l'I/O.
 *
 * UTILITÉ :
 * 🎯 Sert GET /devices/{id}/live sans toucher au transport
 * 🎯 Survit au redémarrage du hub via le repli Redis (dans la limite du TTL)
 */

use crate::models::{StatusEvent, TelemetrySample};
use crate::state::{new_state, Shared};
use crate::store::DurableStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// TTL des entrées télémétrie/statut (mémoire et store durable)
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Nombre max d'écritures miroir en vol ; au-delà, le miroir est sauté
const MAX_INFLIGHT_MIRRORS: usize = 32;

struct TimedEntry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T> TimedEntry<T> {
    fn new(value: T) -> Self {
        Self { value, inserted_at: Instant::now() }
    }
}

pub struct TelemetryCache {
    telemetry: Shared<HashMap<String, TimedEntry<TelemetrySample>>>,
    status: Shared<HashMap<String, TimedEntry<StatusEvent>>>,
    store: Arc<dyn DurableStore>,
    mirror_permits: Arc<Semaphore>,
    ttl: Duration,
}

impl TelemetryCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_ttl(store, CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn DurableStore>, ttl: Duration) -> Self {
        Self {
            telemetry: new_state(HashMap::new()),
            status: new_state(HashMap::new()),
            store,
            mirror_permits: Arc::new(Semaphore::new(MAX_INFLIGHT_MIRRORS)),
            ttl,
        }
    }

    /// Écrase l'échantillon précédent de l'appareil, puis miroir durable.
    pub fn put_telemetry(&self, sample: TelemetrySample) {
        let device_id = sample.device_id.clone();
        self.mirror("telemetry", &device_id, &sample);
        let _ = self.telemetry.lock().insert(device_id, TimedEntry::new(sample));
    }

    pub fn put_status(&self, event: StatusEvent) {
        let device_id = event.device_id.clone();
        self.mirror("status", &device_id, &event);
        let _ = self.status.lock().insert(device_id, TimedEntry::new(event));
    }

    /// Dernier échantillon non expiré, mémoire puis store durable.
    pub async fn get_telemetry(&self, device_id: &str) -> Option<TelemetrySample> {
        self.get("telemetry", &self.telemetry, device_id).await
    }

    pub async fn get_status(&self, device_id: &str) -> Option<StatusEvent> {
        self.get("status", &self.status, device_id).await
    }

    /// Nombre d'appareils avec télémétrie non expirée (pour /system/health)
    pub fn telemetry_count(&self) -> usize {
        let map = self.telemetry.lock();
        map.values().filter(|e| e.inserted_at.elapsed() < self.ttl).count()
    }

    async fn get<T: Clone + DeserializeOwned>(
        &self,
        kind: &str,
        map: &Shared<HashMap<String, TimedEntry<T>>>,
        device_id: &str,
    ) -> Option<T> {
        {
            let map = map.lock();
            if let Some(entry) = map.get(device_id) {
                if entry.inserted_at.elapsed() < self.ttl {
                    return Some(entry.value.clone());
                }
            }
        } // verrou relâché avant l'I/O de repli

        match self.store.get(&format!("{kind}:{device_id}")).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    eprintln!("[cache] unreadable fallback entry {kind}:{device_id}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                eprintln!("[cache] fallback read failed for {kind}:{device_id}: {e}");
                None
            }
        }
    }

    /// Écriture miroir détachée ; ne bloque jamais le dispatch.
    fn mirror<T: Serialize>(&self, kind: &str, device_id: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("[cache] mirror serialization failed for {kind}:{device_id}: {e}");
                return;
            }
        };
        let Ok(permit) = self.mirror_permits.clone().try_acquire_owned() else {
            eprintln!("[cache] mirror backlog full, skipping {kind}:{device_id}");
            return;
        };
        let store = self.store.clone();
        let key = format!("{kind}:{device_id}");
        let ttl = self.ttl;
        let _ = tokio::spawn(async move {
            if let Err(e) = store.set_with_ttl(&key, json, ttl).await {
                eprintln!("[cache] mirror write failed for {key}: {e}");
            }
            drop(permit);
        });
    }
}
