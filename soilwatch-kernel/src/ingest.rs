/**
 * TELEMETRY INGESTOR - Consommateur du flux télémétrie
 *
 * RÔLE :
 * Tâche de fond unique qui applique chaque mesure reçue sur la DeviceTable.
 *
 * FONCTIONNEMENT (par message, séquentiel) :
 * 1. parse du payload JSON {ID, Temperature, Humidity, Timestamp}
 * 2. apply_update sur la table (id inconnu = rejet, pas d'auto-enregistrement)
 * 3. ack auprès de la source (checkpoint)
 *
 * Un message invalide ou un device inconnu est loggé, compté puis acquitté :
 * le relivrer ne le rendrait pas valide. Seules les erreurs de flux déclenchent
 * backoff + reconnexion. Un refus d'authentification n'arrête l'ingestor
 * qu'avant la première connexion établie ; ensuite il est retenté comme une
 * perte de connexion.
 */

use crate::health::HealthTracker;
use crate::models::{Device, TelemetryIn};
use crate::source::{RawMessage, StreamError, TelemetrySource};
use crate::table::{DeviceTable, TableError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid telemetry JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Table(#[from] TableError),
}

pub fn parse_telemetry(payload: &[u8]) -> Result<TelemetryIn, ParseError> {
    let event: TelemetryIn = serde_json::from_slice(payload)?;
    if !(0.0..=100.0).contains(&event.humidity) {
        return Err(ParseError::OutOfRange { field: "Humidity", value: event.humidity });
    }
    Ok(event)
}

/// Backoff exponentiel borné pour les reconnexions
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct TelemetryIngestor<S> {
    source: S,
    table: DeviceTable,
    health: HealthTracker,
    backoff: Backoff,
}

impl<S: TelemetrySource> TelemetryIngestor<S> {
    pub fn new(source: S, table: DeviceTable, health: HealthTracker, backoff: Backoff) -> Self {
        Self { source, table, health, backoff }
    }

    /// Parse + application d'un payload, sans effet sur la source
    pub fn handle_payload(&self, payload: &[u8]) -> Result<Device, IngestError> {
        let event = parse_telemetry(payload)?;
        let device = self.table.apply_update(event.id, &event.to_update())?;
        Ok(device)
    }

    /// Erreur de flux qui termine l'ingestor : auth refusée avant toute connexion
    fn stops_stream(&self, e: &StreamError) -> bool {
        e.is_fatal() && !self.health.has_connected()
    }

    async fn process(&mut self, msg: RawMessage) {
        match self.handle_payload(&msg.payload) {
            Ok(device) => {
                self.health.record_accepted();
                debug!(device_id = device.id, moisture = device.moisture, "telemetry applied");
            }
            Err(IngestError::Parse(e)) => {
                self.health.record_parse_error();
                warn!(delivery = msg.delivery, "dropping telemetry: {e}");
            }
            Err(IngestError::Table(e)) => {
                self.health.record_unknown_device();
                warn!(delivery = msg.delivery, "dropping telemetry: {e}");
            }
        }

        if let Err(e) = self.source.ack(&msg).await {
            self.health.record_ack_failure();
            warn!("{e}");
        }
    }

    /// Boucle principale. Retourne Ok à l'arrêt demandé, Err si les identifiants
    /// sont refusés avant la première connexion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!("telemetry ingestor started");
        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break Ok(()),
                next = self.source.next() => next,
            };

            match next {
                Ok(msg) => {
                    self.backoff.reset();
                    self.health.mark_stream_connected();
                    self.process(msg).await;
                }
                Err(e) if self.stops_stream(&e) => {
                    error!("telemetry stream stopped: {e}");
                    break Err(e);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    self.health.increment_reconnects();
                    warn!("{e}, reconnecting in {delay:?}");

                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if let Err(e) = self.source.reconnect().await {
                        if self.stops_stream(&e) {
                            error!("telemetry stream stopped: {e}");
                            break Err(e);
                        }
                        warn!("reconnect failed: {e}");
                    }
                }
            }
        };

        self.source.close().await;
        self.health.mark_stream_stopped();
        info!("telemetry ingestor stopped");
        outcome
    }
}

pub fn spawn_ingestor<S>(
    ingestor: TelemetryIngestor<S>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), StreamError>>
where
    S: TelemetrySource + 'static,
{
    tokio::spawn(ingestor.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceUpdate;
    use crate::seed::default_seed;
    use crate::source::channel::SourceItem;
    use crate::source::ChannelSource;
    use soilwatch_devkit::payloads::{self, TelemetryPayloadBuilder};
    use soilwatch_devkit::test_utils::wait_until;

    fn setup() -> (TelemetryIngestor<ChannelSource>, crate::source::ChannelSourceHandle, DeviceTable, HealthTracker) {
        let table = DeviceTable::from_seed(default_seed()).unwrap();
        let health = HealthTracker::new();
        let (source, handle) = ChannelSource::new("soilwatch/telemetry@v1");
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4));
        let ingestor = TelemetryIngestor::new(source, table.clone(), health.clone(), backoff);
        (ingestor, handle, table, health)
    }

    #[test]
    fn test_parse_valid_payload() {
        let payload = TelemetryPayloadBuilder::new(3).temperature(21.5).humidity(28.0).timestamp(1_700_000_000.0).to_bytes();
        let event = parse_telemetry(&payload).unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.temperature, 21.5);
        assert_eq!(event.to_update(), DeviceUpdate {
            temperature: Some(21.5),
            moisture: Some(28.0),
            timestamp: Some(1_700_000_000.0),
        });
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        assert!(matches!(parse_telemetry(&payloads::non_numeric_temperature(1)), Err(ParseError::Json(_))));
        assert!(matches!(parse_telemetry(&payloads::missing_field(1, "Humidity")), Err(ParseError::Json(_))));
        assert!(matches!(parse_telemetry(b"not json"), Err(ParseError::Json(_))));
        assert!(matches!(parse_telemetry(&[0xff, 0xfe]), Err(ParseError::Json(_))));

        let too_wet = TelemetryPayloadBuilder::new(1).humidity(140.0).to_bytes();
        assert!(matches!(parse_telemetry(&too_wet), Err(ParseError::OutOfRange { field: "Humidity", .. })));
    }

    #[test]
    fn test_non_numeric_temperature_leaves_table_unchanged() {
        let (ingestor, _handle, table, _) = setup();
        let before = table.snapshot();

        let err = ingestor.handle_payload(&payloads::non_numeric_temperature(1)).unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert_eq!(table.snapshot(), before);
    }

    #[test]
    fn test_unknown_device_is_table_error() {
        let (ingestor, _handle, table, _) = setup();
        let err = ingestor.handle_payload(&TelemetryPayloadBuilder::new(404).to_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::Table(TableError::UnknownDevice(404))));
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_run_applies_drops_and_acks() {
        let (ingestor, handle, table, health) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_ingestor(ingestor, stop_rx);

        handle.send_payload(TelemetryPayloadBuilder::new(5).humidity(55.0).to_bytes());
        handle.send_payload(payloads::non_numeric_temperature(1));
        handle.send_payload(TelemetryPayloadBuilder::new(99).to_bytes());
        handle.send_payload(TelemetryPayloadBuilder::new(3).humidity(31.0).temperature(19.0).to_bytes());

        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 4).await);
        assert_eq!(handle.acked(), vec![1, 2, 3, 4]);
        assert_eq!(table.get(5).unwrap().moisture, 55.0);
        assert_eq!(table.get(3).unwrap().temperature, 19.0);
        assert_eq!(table.get(1).unwrap().temperature, 23.0);

        let counters = health.counters();
        assert_eq!((counters.accepted, counters.parse_errors, counters.unknown_devices), (2, 1, 1));

        stop_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
        assert!(handle.is_closed());
        assert_eq!(health.stream_status(), "stopped");
    }

    #[tokio::test]
    async fn test_connection_loss_reconnects_and_continues() {
        let (ingestor, handle, table, health) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_ingestor(ingestor, stop_rx);

        handle.send(SourceItem::ConnectionLost("broker restarted".into()));
        handle.send(SourceItem::ConnectionLost("broker restarted".into()));
        handle.send_payload(TelemetryPayloadBuilder::new(2).humidity(12.0).to_bytes());

        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 1).await);
        assert_eq!(handle.reconnects(), 2);
        assert_eq!(health.reconnects(), 2);
        assert!(table.get(2).unwrap().is_alert());

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_auth_rejection_before_first_connect_is_fatal() {
        let (ingestor, handle, _table, health) = setup();
        let (_stop_tx, stop_rx) = watch::channel(false);

        handle.send(SourceItem::AuthRejected("bad credentials".into()));
        let result = spawn_ingestor(ingestor, stop_rx).await.unwrap();

        assert!(matches!(result, Err(StreamError::Auth(_))));
        assert!(handle.is_closed());
        assert_eq!(health.stream_status(), "stopped");
    }

    #[tokio::test]
    async fn test_auth_rejection_after_connect_is_retried() {
        let (ingestor, handle, table, health) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_ingestor(ingestor, stop_rx);

        handle.send_payload(TelemetryPayloadBuilder::new(4).humidity(50.0).to_bytes());
        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 1).await);

        handle.send(SourceItem::AuthRejected("credentials revoked".into()));
        handle.send_payload(TelemetryPayloadBuilder::new(4).humidity(10.0).to_bytes());

        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 2).await);
        assert!(!task.is_finished());
        assert_eq!(table.get(4).unwrap().moisture, 10.0);
        assert_eq!(handle.reconnects(), 1);
        assert_eq!(health.stream_status(), "connected");

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_transient_reconnect_failure_keeps_consuming() {
        let (ingestor, handle, table, health) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_ingestor(ingestor, stop_rx);

        handle.fail_next_reconnect(StreamError::Connection("connection refused".into()));
        handle.send(SourceItem::ConnectionLost("broker restarted".into()));
        handle.send_payload(TelemetryPayloadBuilder::new(1).humidity(22.0).to_bytes());

        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 1).await);
        assert_eq!(handle.reconnects(), 1);
        assert_eq!(health.reconnects(), 1);
        assert!(table.get(1).unwrap().is_alert());
        assert!(!handle.is_closed());

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_auth_rejected_on_reconnect_before_first_connect_closes_source() {
        let (ingestor, handle, _table, health) = setup();
        let (_stop_tx, stop_rx) = watch::channel(false);

        handle.fail_next_reconnect(StreamError::Auth("bad credentials".into()));
        handle.send(SourceItem::ConnectionLost("connection reset".into()));
        let result = tokio::time::timeout(Duration::from_secs(2), spawn_ingestor(ingestor, stop_rx))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result, Err(StreamError::Auth("bad credentials".into())));
        assert!(handle.is_closed());
        assert_eq!(health.stream_status(), "stopped");
    }

    #[tokio::test]
    async fn test_auth_rejected_on_reconnect_after_connect_is_retried() {
        let (ingestor, handle, table, _health) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_ingestor(ingestor, stop_rx);

        handle.send_payload(TelemetryPayloadBuilder::new(2).humidity(60.0).to_bytes());
        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 1).await);

        handle.fail_next_reconnect(StreamError::Auth("credentials revoked".into()));
        handle.send(SourceItem::ConnectionLost("connection reset".into()));
        handle.send_payload(TelemetryPayloadBuilder::new(2).humidity(15.0).to_bytes());

        assert!(wait_until(Duration::from_secs(2), || handle.acked().len() == 2).await);
        assert!(!task.is_finished());
        assert_eq!(table.get(2).unwrap().moisture, 15.0);

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let (ingestor, handle, _table, _health) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_ingestor(ingestor, stop_rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert!(handle.is_closed());
        assert!(handle.acked().is_empty());
    }
}
