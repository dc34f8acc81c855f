/**
 * TELEMETRY SOURCES - Interface vers le flux de télémétrie externe
 *
 * RÔLE :
 * Abstraction du transport : l'ingestor ne voit que des messages opaques
 * (topic + payload brut) qu'il acquitte un par un.
 *
 * FONCTIONNEMENT :
 * - TelemetrySource trait = next / ack / reconnect / close
 * - MqttSource = broker MQTT, QoS 1 avec ack manuel (checkpoint après traitement)
 * - ChannelSource = source en mémoire pilotée par un canal tokio (tests, rejeu)
 *
 * ERREURS :
 * - Connection : transitoire, l'ingestor attend (backoff) puis reconnect()
 * - Auth : identifiants refusés, fatal tant qu'aucune connexion n'a abouti
 * - Ack : checkpoint impossible, le message est quand même traité
 */

pub mod channel;
pub mod mqtt;

pub use channel::{ChannelSource, ChannelSourceHandle};
pub use mqtt::MqttSource;

use std::future::Future;

/// Message brut tel que livré par le transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Numéro de livraison, utilisé pour l'acquittement
    pub delivery: u64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StreamError {
    #[error("stream connection error: {0}")]
    Connection(String),
    #[error("stream authentication rejected: {0}")]
    Auth(String),
    #[error("failed to acknowledge delivery {delivery}: {reason}")]
    Ack { delivery: u64, reason: String },
}

impl StreamError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Auth(_))
    }
}

pub trait TelemetrySource: Send {
    /// Attend le prochain message. Aucun timeout ici : l'appelant
    /// met cet appel en concurrence avec son signal d'arrêt.
    fn next(&mut self) -> impl Future<Output = Result<RawMessage, StreamError>> + Send;

    /// Checkpoint : le message ne sera pas relivré après redémarrage
    fn ack(&mut self, msg: &RawMessage) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn reconnect(&mut self) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Libère la connexion. Aucun appel ne suit.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
