/**
 * API HTTP SOILWATCH - Dashboard et API de lecture du kernel
 *
 * RÔLE :
 * Expose la carte des capteurs et l'état de la table devices.
 *
 * FONCTIONNEMENT :
 * - GET /              : page dashboard, scène "tous les groupes" pré-calculée
 * - GET /scene?group=  : scène recalculée pour le groupe choisi (ALL/inconnu = tous)
 * - GET /health, /system/health : liveness + état ingestion
 * - GET /devices, /devices/{id} : lignes brutes (header x-api-key si SOILWATCH_API_KEY)
 *
 * Chaque requête prend un snapshot frais de la table : aucun état device
 * n'est gardé entre deux requêtes.
 */

use crate::health::{HealthTracker, KernelHealth};
use crate::models::{Device, DeviceId};
use crate::page::render_dashboard;
use crate::table::DeviceTable;
use crate::view::{build, group_names, GroupFilter, ViewScene};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{Html, Response};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub table: DeviceTable,
    pub health: HealthTracker,
    pub stale_after_secs: u64,
    pub api_key: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct DeviceView {
    id: DeviceId,
    name: String,
    group: String,
    latitude: f64,
    longitude: f64,
    temperature: f64,
    moisture: f64,
    alert: bool,
    last_update: Option<String>, // format RFC3339 pour l'API
    stale: bool,                 // true si aucune mesure depuis stale_after_secs
}

fn to_view(d: &Device, now: OffsetDateTime, stale_after_secs: u64) -> DeviceView {
    let last = d
        .timestamp
        .and_then(|ts| OffsetDateTime::from_unix_timestamp_nanos((ts * 1e9) as i128).ok());
    let stale = match last {
        Some(t) => now - t > Duration::seconds(stale_after_secs as i64),
        None => true,
    };
    DeviceView {
        id: d.id,
        name: d.name.clone(),
        group: d.group.clone(),
        latitude: d.latitude,
        longitude: d.longitude,
        temperature: d.temperature,
        moisture: d.moisture,
        alert: d.is_alert(),
        last_update: last.and_then(|t| t.format(&Rfc3339).ok()),
        stale,
    }
}

fn api_key_ok(expected: Option<&str>, provided: Option<&str>) -> bool {
    match expected {
        None | Some("") => true,
        Some(key) => provided == Some(key),
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let provided = req.headers().get("x-api-key").and_then(|v| v.to_str().ok());
    if !api_key_ok(app.api_key.as_deref(), provided) {
        warn!("rejected {} without valid x-api-key", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
pub struct SceneParams {
    group: Option<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    let devices = Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_api_key));

    Router::new()
        .route("/", get(index))
        .route("/scene", get(get_scene))
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .merge(devices)
        .with_state(app_state)
}

/// Scène pour un filtre brut du client ; un groupe inconnu vaut "tous"
fn scene_for(rows: &[Device], raw_group: Option<&str>) -> ViewScene {
    let filter = GroupFilter::from_param(raw_group).resolve(&group_names(rows));
    build(rows, &filter)
}

// GET / (page complète)
async fn index(State(app): State<AppState>) -> Html<String> {
    let rows = app.table.snapshot();
    let scene = scene_for(&rows, None);
    Html(render_dashboard(&scene, &group_names(&rows)))
}

// GET /scene?group=... (changement de filtre)
async fn get_scene(State(app): State<AppState>, Query(params): Query<SceneParams>) -> Json<ViewScene> {
    let rows = app.table.snapshot();
    Json(scene_for(&rows, params.group.as_deref()))
}

// GET /system/health (état ingestion)
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.table))
}

// GET /devices (liste)
async fn list_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    let now = OffsetDateTime::now_utc();
    let list = app
        .table
        .snapshot()
        .iter()
        .map(|d| to_view(d, now, app.stale_after_secs))
        .collect();
    Json(list)
}

// GET /devices/{id} (détail)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<DeviceView>, StatusCode> {
    let Some(d) = app.table.get(id) else { return Err(StatusCode::NOT_FOUND); };
    Ok(Json(to_view(&d, OffsetDateTime::now_utc(), app.stale_after_secs)))
}
