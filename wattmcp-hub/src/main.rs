/**
 * WATTMCP HUB - Relais télémétrie/commande edge-to-cloud
 *
 * RÔLE :
 * Point central du système WattMCP. Consomme la télémétrie et les statuts
 * publiés par les edge publishers sur MQTT, maintient la dernière valeur
 * connue par appareil (avec repli durable Redis), corrèle les commandes
 * émises avec leurs réponses asynchrones, et expose le tout via une API
 * REST protégée par bearer token.
 *
 * ARCHITECTURE :
 * - mqtt.rs       : connexion broker + boucle d'ingestion
 * - router.rs     : classification des topics wattagent/device/+/...
 * - cache.rs      : latest-value cache TTL + miroir Redis
 * - correlator.rs : corrélation commandId → réponse
 * - registry.rs   : registre statique des appareils (devices.yaml)
 * - http.rs       : surface REST (axum)
 *
 * UTILITÉ :
 * 🎯 Un seul processus fait le pont entre le parc d'appareils et les
 *    agents IA / dashboards qui les consomment
 * 🎯 Tolère broker et Redis absents : reconnexion pour l'un, repli
 *    mémoire pour l'autre
 */

mod cache;
mod config;
mod correlator;
mod health;
mod http;
mod models;
mod mqtt;
mod registry;
mod router;
mod state;
mod store;

use crate::cache::TelemetryCache;
use crate::config::HubConfig;
use crate::correlator::{spawn_expiry_sweep, CommandCorrelator};
use crate::health::HealthTracker;
use crate::registry::DeviceRegistry;
use crate::store::{DurableStore, MemoryStore, RedisStore};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cfg = HubConfig::from_env();

    println!("[hub] WattMCP hub starting");
    println!("[hub] MQTT broker: {}:{}", cfg.mqtt.host, cfg.mqtt.port);

    let registry = Arc::new(DeviceRegistry::load(&cfg.devices_file).await);
    println!("[hub] {} device(s) registered", registry.len().await);

    // store durable : Redis si configuré, sinon mémoire in-process
    let store: Arc<dyn DurableStore> = match &cfg.store.host {
        Some(_) => match RedisStore::connect(&cfg.store).await {
            Ok(store) => {
                println!("[hub] durable store: redis at {}", cfg.store.addr());
                Arc::new(store)
            }
            Err(e) => {
                eprintln!("[hub] redis unavailable ({e}), falling back to memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            println!("[hub] REDIS_HOST not set, using memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let cache = Arc::new(TelemetryCache::new(store));
    let health = HealthTracker::new();

    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg.mqtt);

    let correlator = Arc::new(CommandCorrelator::new(mqtt_client.clone()));

    mqtt::spawn_mqtt_listener(
        mqtt_client,
        eventloop,
        cache.clone(),
        correlator.clone(),
        health.clone(),
    );
    spawn_expiry_sweep(correlator.clone());

    let app_state = http::AppState {
        registry,
        cache,
        correlator,
        health,
        auth: cfg.auth.clone(),
    };
    let app = http::build_router(app_state);

    let ip: IpAddr = cfg
        .server
        .host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(ip, cfg.server.port);
    println!("[hub] API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind API listener");
    axum::serve(listener, app).await.expect("serve API");
}
