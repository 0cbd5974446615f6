/*!
# WattMCP DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement des composants WattMCP avec:
- Stub MQTT pour tests sans broker
- Builders de messages conformes au namespace wattagent
*/

pub mod mqtt_stub;

pub use mqtt_stub::{MockMqttClient, WattMessageBuilder};
