//! Chargement du parc de capteurs provisionnés (seed).
//!
//! Le seed est lu une seule fois au démarrage : fichier YAML si présent,
//! sinon le jeu intégré de cinq parcelles réparties sur trois exploitants.

use crate::config::ConfigError;
use crate::models::Device;
use crate::view::ALL_GROUPS;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct SeedFile {
    devices: Vec<Device>,
}

pub fn default_seed() -> Vec<Device> {
    let rows = [
        (1, "Location 1", 40.0, -3.5, 40.0, 23.0, "Farmer A"),
        (2, "Location 2", 40.0, -3.55, 30.0, 21.0, "Farmer A"),
        (3, "Location 3", 40.1, -3.6, 20.0, 25.0, "Farmer B"),
        (4, "Location 4", 40.1, -3.5, 45.0, 24.0, "Farmer B"),
        (5, "Location 5", 40.3, -4.2, 25.0, 22.0, "Farmer C"),
    ];
    rows.into_iter()
        .map(|(id, name, latitude, longitude, moisture, temperature, group)| Device {
            id,
            name: name.into(),
            latitude,
            longitude,
            group: group.into(),
            temperature,
            moisture,
            timestamp: None,
        })
        .collect()
}

pub fn parse_seed(txt: &str) -> Result<Vec<Device>, ConfigError> {
    let file: SeedFile = serde_yaml::from_str(txt).map_err(|e| ConfigError::Seed(e.to_string()))?;
    validate_seed(&file.devices)?;
    Ok(file.devices)
}

fn validate_seed(devices: &[Device]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for d in devices {
        if !seen.insert(d.id) {
            return Err(ConfigError::Seed(format!("duplicate device id {}", d.id)));
        }
        if d.group.trim().is_empty() {
            return Err(ConfigError::Seed(format!("device {} has no group", d.id)));
        }
        // le sélecteur réserve "ALL" et ignore les espaces de bord
        if d.group.trim() == ALL_GROUPS || d.group.trim() != d.group {
            return Err(ConfigError::Seed(format!("device {} has unselectable group {:?}", d.id, d.group)));
        }
        if !(-90.0..=90.0).contains(&d.latitude) || !(-180.0..=180.0).contains(&d.longitude) {
            return Err(ConfigError::Seed(format!(
                "device {} has invalid coordinates ({}, {})",
                d.id, d.latitude, d.longitude
            )));
        }
    }
    Ok(())
}

pub async fn load_seed(path: &Path) -> Result<Vec<Device>, ConfigError> {
    if !path.exists() {
        warn!("no seed file at {:?}, using built-in device set", path);
        return Ok(default_seed());
    }
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let devices = parse_seed(&txt)?;
    info!("loaded {} devices from {:?}", devices.len(), path);
    Ok(devices)
}
