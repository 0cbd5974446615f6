/**
 * DEVICE REGISTRY - Registre statique des appareils connus
 *
 * RÔLE :
 * Mapping deviceId → métadonnées (IP, localisation, paramètres modèle),
 * chargé au démarrage depuis un fichier YAML (WATTMCP_DEVICES). Lecture
 * majoritaire ; insert() existe pour un futur flux d'enregistrement sans
 * casser lookup()/list(). list() préserve l'ordre d'insertion.
 */

use crate::models::Device;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Deserialize)]
struct DevicesFile {
    devices: Vec<Device>,
}

impl Default for DevicesFile {
    fn default() -> Self {
        // registre du déploiement de référence : un MPSoC buck converter
        let mut model_parameters = HashMap::new();
        let _ = model_parameters.insert("type".to_string(), serde_json::json!("BuckConverter"));
        let _ = model_parameters.insert("L_uH".to_string(), serde_json::json!(22.0));
        let _ = model_parameters.insert("C_uF".to_string(), serde_json::json!(470.0));

        Self {
            devices: vec![Device {
                device_id: "mpsoc-01".to_string(),
                ip_address: "192.168.1.105".to_string(),
                geo_location: "West Lafayette, Indiana, USA".to_string(),
                model_parameters,
            }],
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, Device>,
    order: Vec<String>,
}

pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(RegistryInner::default()) }
    }

    /// Charge le registre depuis un fichier YAML, défauts en cas d'absence
    /// ou de contenu invalide (le hub démarre toujours).
    pub async fn load(path: &str) -> Self {
        let file = if Path::new(path).exists() {
            let txt = tokio::fs::read_to_string(path).await.unwrap_or_default();
            if txt.trim().is_empty() {
                DevicesFile::default()
            } else {
                serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                    eprintln!("[registry] invalid devices file {path}: {e}");
                    DevicesFile::default()
                })
            }
        } else {
            eprintln!("[registry] no {path}, using default registry");
            DevicesFile::default()
        };

        let registry = Self::new();
        for device in file.devices {
            registry.insert(device).await;
        }
        registry
    }

    pub async fn insert(&self, device: Device) {
        let mut inner = self.inner.write().await;
        if !inner.devices.contains_key(&device.device_id) {
            inner.order.push(device.device_id.clone());
        }
        let _ = inner.devices.insert(device.device_id.clone(), device);
    }

    pub async fn lookup(&self, device_id: &str) -> Option<Device> {
        self.inner.read().await.devices.get(device_id).cloned()
    }

    pub async fn contains(&self, device_id: &str) -> bool {
        self.inner.read().await.devices.contains_key(device_id)
    }

    /// Identifiants dans l'ordre d'insertion
    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }
}
