use super::{RawMessage, StreamError, TelemetrySource};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Élément injecté dans une ChannelSource
#[derive(Debug, Clone)]
pub enum SourceItem {
    Message(Vec<u8>),
    ConnectionLost(String),
    AuthRejected(String),
}

#[derive(Debug, Default)]
struct SourceLog {
    acked: Vec<u64>,
    reconnects: u32,
    /// Échecs rendus par les prochains reconnect(), dans l'ordre
    reconnect_failures: VecDeque<StreamError>,
    closed: bool,
}

/// Source en mémoire : les messages arrivent par un canal tokio et
/// chaque ack / reconnect / close est enregistré pour inspection.
pub struct ChannelSource {
    topic: String,
    rx: mpsc::UnboundedReceiver<SourceItem>,
    log: Arc<Mutex<SourceLog>>,
    next_delivery: u64,
}

/// Côté producteur d'une ChannelSource
#[derive(Clone)]
pub struct ChannelSourceHandle {
    tx: mpsc::UnboundedSender<SourceItem>,
    log: Arc<Mutex<SourceLog>>,
}

impl ChannelSource {
    pub fn new(topic: &str) -> (Self, ChannelSourceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(SourceLog::default()));
        let source = Self { topic: topic.to_string(), rx, log: log.clone(), next_delivery: 0 };
        (source, ChannelSourceHandle { tx, log })
    }
}

impl ChannelSourceHandle {
    pub fn send_payload<V: Into<Vec<u8>>>(&self, payload: V) {
        // le récepteur vit aussi longtemps que la source
        let _ = self.tx.send(SourceItem::Message(payload.into()));
    }

    pub fn send(&self, item: SourceItem) {
        let _ = self.tx.send(item);
    }

    /// Le prochain reconnect() échouera avec `err`
    pub fn fail_next_reconnect(&self, err: StreamError) {
        self.log.lock().reconnect_failures.push_back(err);
    }

    pub fn acked(&self) -> Vec<u64> {
        self.log.lock().acked.clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.log.lock().reconnects
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().closed
    }
}

impl TelemetrySource for ChannelSource {
    async fn next(&mut self) -> Result<RawMessage, StreamError> {
        match self.rx.recv().await {
            Some(SourceItem::Message(payload)) => {
                self.next_delivery += 1;
                Ok(RawMessage { topic: self.topic.clone(), payload, delivery: self.next_delivery })
            }
            Some(SourceItem::ConnectionLost(reason)) => Err(StreamError::Connection(reason)),
            Some(SourceItem::AuthRejected(reason)) => Err(StreamError::Auth(reason)),
            // plus de producteur : le flux reste muet jusqu'à l'arrêt
            None => std::future::pending().await,
        }
    }

    async fn ack(&mut self, msg: &RawMessage) -> Result<(), StreamError> {
        self.log.lock().acked.push(msg.delivery);
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), StreamError> {
        let mut log = self.log.lock();
        log.reconnects += 1;
        match log.reconnect_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
        self.log.lock().closed = true;
    }
}
