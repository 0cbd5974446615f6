use std::collections::HashMap;
use std::str::FromStr;

/// Configuration complète du hub, chargée depuis l'environnement.
/// Tous les champs ont des valeurs par défaut ; .env est lu par main().
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub mqtt: MqttConf,
    pub server: ServerConf,
    pub store: StoreConf,
    pub auth: AuthConf,
    pub devices_file: String,
}

#[derive(Debug, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub ca_certs: Option<String>,
    pub certfile: Option<String>,
    pub keyfile: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConf {
    pub host: String,
    pub port: u16,
}

/// Store durable (Redis). host absent = store mémoire in-process.
#[derive(Debug, Clone)]
pub struct StoreConf {
    pub host: Option<String>,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    pub max_connections: u32,
}

impl StoreConf {
    pub fn url(&self) -> String {
        let host = self.host.as_deref().unwrap_or("localhost");
        match &self.password {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, host, self.port, self.db),
            None => format!("redis://{}:{}/{}", host, self.port, self.db),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host.as_deref().unwrap_or("localhost"), self.port)
    }
}

/// Jeu statique de credentials pour l'API (bearer tokens)
#[derive(Debug, Clone)]
pub struct AuthConf {
    api_keys: HashMap<String, String>,
}

impl AuthConf {
    pub fn is_authorized(&self, token: &str) -> bool {
        self.api_keys.values().any(|v| v == token)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        // credentials par défaut identiques au déploiement de référence
        let mut api_keys = HashMap::new();
        api_keys.insert("ai-agent-01".to_string(), "agent_secret_password".to_string());
        api_keys.insert("mpsoc-01".to_string(), "supersecretpassword".to_string());

        Self {
            mqtt: MqttConf {
                host: "localhost".into(),
                port: 1883,
                username: None,
                password: None,
                use_tls: false,
                ca_certs: None,
                certfile: None,
                keyfile: None,
            },
            server: ServerConf { host: "0.0.0.0".into(), port: 8000 },
            store: StoreConf {
                host: None,
                port: 6379,
                password: None,
                db: 0,
                max_connections: 10,
            },
            auth: AuthConf { api_keys },
            devices_file: "devices.yaml".into(),
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.mqtt.host = env_or("MQTT_BROKER", &cfg.mqtt.host);
        cfg.mqtt.port = env_parse("MQTT_PORT", cfg.mqtt.port);
        cfg.mqtt.username = env_opt("MQTT_USERNAME");
        cfg.mqtt.password = env_opt("MQTT_PASSWORD");
        cfg.mqtt.use_tls = env_or("MQTT_USE_TLS", "false").to_lowercase() == "true";
        cfg.mqtt.ca_certs = env_opt("MQTT_CA_CERTS");
        cfg.mqtt.certfile = env_opt("MQTT_CERTFILE");
        cfg.mqtt.keyfile = env_opt("MQTT_KEYFILE");

        cfg.server.host = env_or("SERVER_HOST", &cfg.server.host);
        cfg.server.port = env_parse("SERVER_PORT", cfg.server.port);

        cfg.store.host = env_opt("REDIS_HOST");
        cfg.store.port = env_parse("REDIS_PORT", cfg.store.port);
        cfg.store.password = env_opt("REDIS_PASSWORD");
        cfg.store.db = env_parse("REDIS_DB", cfg.store.db);
        cfg.store.max_connections = env_parse("REDIS_MAX_CONNECTIONS", cfg.store.max_connections);

        // API_KEY ajoute un token au jeu statique, sans remplacer les défauts
        if let Some(key) = env_opt("API_KEY") {
            let _ = cfg.auth.api_keys.insert("api".to_string(), key);
        }

        cfg.devices_file = env_or("WATTMCP_DEVICES", &cfg.devices_file);
        cfg
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("[hub] invalid value for {key}: {raw}, keeping default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_credentials_are_authorized() {
        let cfg = HubConfig::default();
        assert!(cfg.auth.is_authorized("supersecretpassword"));
        assert!(cfg.auth.is_authorized("agent_secret_password"));
        assert!(!cfg.auth.is_authorized("not-a-key"));
    }

    #[test]
    fn store_url_includes_password_and_db() {
        let store = StoreConf {
            host: Some("redis.lan".into()),
            port: 6380,
            password: Some("hunter2".into()),
            db: 3,
            max_connections: 10,
        };
        assert_eq!(store.url(), "redis://:hunter2@redis.lan:6380/3");
    }
}
