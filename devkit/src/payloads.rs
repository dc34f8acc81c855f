/*!
Builders de messages télémétrie pour les tests

Produit des payloads JSON au format du contrat `soilwatch/telemetry@v1` :
`{"ID": int, "Temperature": num, "Humidity": num, "Timestamp": num}`
*/

use serde_json::{json, Value};

/// Builder d'un message télémétrie valide
#[derive(Debug, Clone)]
pub struct TelemetryPayloadBuilder {
    id: u32,
    temperature: f64,
    humidity: f64,
    timestamp: f64,
}

impl TelemetryPayloadBuilder {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            temperature: 20.0,
            humidity: 50.0,
            timestamp: chrono::Utc::now().timestamp() as f64,
        }
    }

    pub fn temperature(mut self, value: f64) -> Self {
        self.temperature = value;
        self
    }

    pub fn humidity(mut self, value: f64) -> Self {
        self.humidity = value;
        self
    }

    pub fn timestamp(mut self, value: f64) -> Self {
        self.timestamp = value;
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "ID": self.id,
            "Temperature": self.temperature,
            "Humidity": self.humidity,
            "Timestamp": self.timestamp,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

/// Message dont la température n'est pas un nombre
pub fn non_numeric_temperature(id: u32) -> Vec<u8> {
    let mut msg = TelemetryPayloadBuilder::new(id).to_json();
    msg["Temperature"] = json!("warm");
    msg.to_string().into_bytes()
}

/// Message valide auquel on retire un champ obligatoire
pub fn missing_field(id: u32, field: &str) -> Vec<u8> {
    let mut msg = TelemetryPayloadBuilder::new(id).to_json();
    if let Some(obj) = msg.as_object_mut() {
        obj.remove(field);
    }
    msg.to_string().into_bytes()
}
