use super::{RawMessage, StreamError, TelemetrySource};
use crate::config::MqttConf;
use crate::health::HealthTracker;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing,
    Publish, QoS,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source MQTT : session propre (reprise "au plus récent"), QoS 1,
/// PUBACK envoyé seulement après traitement du message.
pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    pending: HashMap<u64, Publish>,
    next_delivery: u64,
    health: Option<HealthTracker>,
}

impl MqttSource {
    pub fn new(cfg: &MqttConf) -> Self {
        let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
        opts.set_clean_session(true);
        opts.set_manual_acks(true);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            opts.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(opts, 10);
        Self {
            client,
            eventloop,
            topic: cfg.topic.clone(),
            pending: HashMap::new(),
            next_delivery: 0,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }
}

fn map_connection_error(e: ConnectionError) -> StreamError {
    match e {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => StreamError::Auth(format!("{code:?}")),
        other => StreamError::Connection(other.to_string()),
    }
}

impl TelemetrySource for MqttSource {
    async fn next(&mut self) -> Result<RawMessage, StreamError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // session propre : l'abonnement est perdu à chaque reconnexion
                    self.client
                        .subscribe(self.topic.clone(), QoS::AtLeastOnce)
                        .await
                        .map_err(|e| StreamError::Connection(e.to_string()))?;
                    if let Some(health) = &self.health {
                        health.mark_stream_connected();
                    }
                    info!("connected to broker, subscribed to {}", self.topic);
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    self.next_delivery += 1;
                    let delivery = self.next_delivery;
                    let msg = RawMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.to_vec(),
                        delivery,
                    };
                    self.pending.insert(delivery, p);
                    return Ok(msg);
                }
                Ok(_) => {}
                Err(e) => return Err(map_connection_error(e)),
            }
        }
    }

    async fn ack(&mut self, msg: &RawMessage) -> Result<(), StreamError> {
        let publish = self.pending.remove(&msg.delivery).ok_or_else(|| StreamError::Ack {
            delivery: msg.delivery,
            reason: "delivery not pending".into(),
        })?;
        self.client.ack(&publish).await.map_err(|e| StreamError::Ack {
            delivery: msg.delivery,
            reason: e.to_string(),
        })
    }

    async fn reconnect(&mut self) -> Result<(), StreamError> {
        // L'eventloop rumqttc se reconnecte au prochain poll ; les livraisons
        // en attente appartiennent à l'ancienne session et ne sont plus acquittables.
        if !self.pending.is_empty() {
            debug!("dropping {} unacknowledged deliveries from previous session", self.pending.len());
            self.pending.clear();
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect request failed: {e}");
            return;
        }
        // pousse le DISCONNECT sur le réseau
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), flush).await.is_err() {
            warn!("MQTT disconnect not flushed within 2s");
        }
        info!("MQTT source closed");
    }
}
