/**
 * SOILWATCH KERNEL - Point d'entrée principal du serveur
 *
 * RÔLE : Orchestration des modules : config, seed, table devices, ingestion MQTT, HTTP.
 * Bootstrap complet avec erreurs fatales au démarrage uniquement (config, seed).
 *
 * ARCHITECTURE : ingestor MQTT (écriture) + API/dashboard HTTP (snapshots) autour d'une table partagée.
 */

use anyhow::Context;
use soilwatch_kernel::config::load_config;
use soilwatch_kernel::health::HealthTracker;
use soilwatch_kernel::http::{build_router, AppState};
use soilwatch_kernel::ingest::{spawn_ingestor, Backoff, TelemetryIngestor};
use soilwatch_kernel::seed::load_seed;
use soilwatch_kernel::source::MqttSource;
use soilwatch_kernel::table::DeviceTable;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await.context("invalid kernel configuration")?;

    // table devices depuis le seed
    let seed = load_seed(Path::new(&cfg.seed_file)).await.context("invalid device seed")?;
    let table = DeviceTable::from_seed(seed)?;
    info!("device table initialized with {} devices", table.len());

    let health = HealthTracker::new();

    // ingestion MQTT en tâche de fond
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source = MqttSource::new(&cfg.mqtt).with_health(health.clone());
    let backoff = Backoff::new(cfg.ingest.backoff_initial(), cfg.ingest.backoff_max());
    let ingestor = TelemetryIngestor::new(source, table.clone(), health.clone(), backoff);
    let mut ingest_task = spawn_ingestor(ingestor, shutdown_rx);
    info!("consuming {} on {}:{} as {}", cfg.mqtt.topic, cfg.mqtt.host, cfg.mqtt.port, cfg.mqtt.client_id);

    let app_state = AppState {
        table,
        health,
        stale_after_secs: cfg.stale_after_secs,
        api_key: std::env::var("SOILWATCH_API_KEY").ok().filter(|k| !k.is_empty()),
    };
    let app = build_router(app_state);

    let addr: SocketAddr = cfg.http.bind.parse().with_context(|| format!("invalid http.bind {}", cfg.http.bind))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("cannot bind {addr}"))?;
    info!("listening on http://{addr}");

    // le serveur HTTP et l'ingestor s'arrêtent sur le même signal
    let mut http_stop = shutdown_tx.subscribe();
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_stop.changed().await;
            })
            .into_future(),
    );

    // Ctrl-C, ou fin prématurée de l'ingestor (identifiants refusés avant la première connexion)
    let early_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            None
        }
        res = &mut ingest_task => Some(res),
    };
    let _ = shutdown_tx.send(true);
    let outcome = match early_exit {
        Some(res) => res,
        None => ingest_task.await,
    };

    server.await?.context("http server failed")?;
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("ingestor ended with error: {e}");
            Err(e).context("telemetry stream failed")
        }
        Err(e) => Err(e).context("ingestor task panicked"),
    }
}
