use serde::{Deserialize, Serialize};

pub type DeviceId = u32;

/// Seuil d'alerte humidité : strictement en dessous = alerte
pub const ALERT_MOISTURE_THRESHOLD: f64 = 30.0;

/// Une ligne de la table devices
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub group: String,
    pub temperature: f64,
    pub moisture: f64,
    /// Epoch secondes du dernier événement (None = jamais reçu)
    pub timestamp: Option<f64>,
}

impl Device {
    pub fn is_alert(&self) -> bool {
        self.moisture < ALERT_MOISTURE_THRESHOLD
    }
}

/// Mise à jour partielle : les champs absents restent inchangés
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub temperature: Option<f64>,
    pub moisture: Option<f64>,
    pub timestamp: Option<f64>,
}

impl DeviceUpdate {
    pub fn moisture(value: f64) -> Self {
        Self { moisture: Some(value), ..Self::default() }
    }
}

// Message entrant (contrat soilwatch/telemetry@v1)
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryIn {
    #[serde(rename = "ID")]
    pub id: DeviceId,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
}

impl TelemetryIn {
    pub fn to_update(&self) -> DeviceUpdate {
        DeviceUpdate {
            temperature: Some(self.temperature),
            moisture: Some(self.humidity),
            timestamp: Some(self.timestamp),
        }
    }
}
