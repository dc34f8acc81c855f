use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid YAML in {path:?}: {source}")]
    Yaml { path: PathBuf, source: serde_yaml::Error },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("MQTT username is set but no password was provided")]
    MissingPassword,
    #[error("invalid seed: {0}")]
    Seed(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: MqttConf,
    pub ingest: IngestConf,
    pub seed_file: String,
    /// Au-delà de ce délai sans télémétrie, un device est marqué "stale"
    pub stale_after_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    /// Identité du consommateur auprès du broker
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    #[serde(skip_serializing)] // jamais de mot de passe dans un dump de config
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConf {
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            mqtt: MqttConf::default(),
            ingest: IngestConf::default(),
            seed_file: "devices.yaml".into(),
            stale_after_secs: 900,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "soilwatch-kernel".into(),
            topic: "soilwatch/telemetry@v1".into(),
            keep_alive_secs: 15,
            username: None,
            password: None,
        }
    }
}

impl Default for IngestConf {
    fn default() -> Self {
        Self { backoff_initial_ms: 500, backoff_max_ms: 30_000 }
    }
}

impl IngestConf {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl KernelConfig {
    pub fn from_yaml_str(txt: &str, path: &Path) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
    }

    /// Surcharges depuis l'environnement (identifiants broker, clé API...)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SOILWATCH_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("SOILWATCH_MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SOILWATCH_MQTT_PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(user) = lookup("SOILWATCH_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup("SOILWATCH_MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.username.is_some() && self.mqtt.password.is_none() {
            return Err(ConfigError::MissingPassword);
        }
        if self.ingest.backoff_initial_ms == 0 || self.ingest.backoff_initial_ms > self.ingest.backoff_max_ms {
            return Err(ConfigError::InvalidValue {
                key: "ingest.backoff_initial_ms".into(),
                value: self.ingest.backoff_initial_ms.to_string(),
            });
        }
        Ok(())
    }
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = PathBuf::from(std::env::var("SOILWATCH_CONFIG").unwrap_or_else(|_| "kernel.yaml".into()));
    let mut cfg = if path.exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        info!("config loaded from {:?}", path);
        KernelConfig::from_yaml_str(&txt, &path)?
    } else {
        warn!("no {:?}, using default config", path);
        KernelConfig::default()
    };

    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
