/*!
# SoilWatch DevKit - Utilitaires de test pour le kernel

Bibliothèque facilitant les tests de l'ingestion et du dashboard avec:
- Builders de payloads télémétrie conformes au contrat `soilwatch/telemetry@v1`
- Payloads volontairement invalides (champ manquant, valeur non numérique)
- Helpers d'attente asynchrone et logging de test
*/

pub mod payloads;
pub mod test_utils;

pub use payloads::TelemetryPayloadBuilder;
pub use test_utils::{init_test_logging, wait_until};
