/**
 * VIEW BUILDER - Calcul de la scène carte à partir d'un snapshot
 *
 * RÔLE :
 * Fonction pure (snapshot, filtre) -> scène : clusters de marqueurs par groupe,
 * centre et zoom de la carte. Aucun accès à la table partagée.
 *
 * RÈGLES :
 * - groupes en ordre lexical, couleur = palette[index % 10]
 * - humidité < 30 -> cluster alerte (rouge, taille 18), sinon normal (couleur groupe, taille 15)
 * - centre = moyenne lat/lon des devices filtrés, (0,0) si vide
 * - zoom 12 sur un groupe précis trouvé, 8 sinon
 */

use crate::models::Device;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const GROUP_PALETTE: [&str; 10] = [
    "#636EFA", "#EF553B", "#00CC96", "#AB63FA", "#FFA15A",
    "#19D3F3", "#FF6692", "#B6E880", "#FF97FF", "#FECB52",
];
pub const ALERT_COLOR: &str = "red";
pub const NORMAL_MARKER_SIZE: u32 = 15;
pub const ALERT_MARKER_SIZE: u32 = 18;
pub const GROUP_ZOOM: u8 = 12;
pub const WIDE_ZOOM: u8 = 8;

/// Valeur du sélecteur signifiant "tous les groupes"
pub const ALL_GROUPS: &str = "ALL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupFilter {
    All,
    Group(String),
}

impl GroupFilter {
    /// "ALL", vide ou absent -> tous les groupes
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some(ALL_GROUPS) => GroupFilter::All,
            Some(group) => GroupFilter::Group(group.to_string()),
        }
    }

    /// Un groupe absent de `known` est traité comme "tous"
    pub fn resolve(self, known: &[String]) -> Self {
        match self {
            GroupFilter::Group(g) if known.iter().any(|k| *k == g) => GroupFilter::Group(g),
            _ => GroupFilter::All,
        }
    }

    pub fn as_param(&self) -> &str {
        match self {
            GroupFilter::All => ALL_GROUPS,
            GroupFilter::Group(g) => g.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    Normal,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub id: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub moisture: f64,
    pub timestamp: Option<f64>,
    /// Texte de survol
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerCluster {
    pub group: String,
    pub kind: ClusterKind,
    pub color: String,
    pub size: u32,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapCenter {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewScene {
    pub filter: String,
    pub center: MapCenter,
    pub zoom: u8,
    pub clusters: Vec<MarkerCluster>,
}

impl ViewScene {
    pub fn marker_count(&self) -> usize {
        self.clusters.iter().map(|c| c.markers.len()).sum()
    }

    pub fn cluster(&self, group: &str, kind: ClusterKind) -> Option<&MarkerCluster> {
        self.clusters.iter().find(|c| c.group == group && c.kind == kind)
    }
}

fn to_marker(d: &Device) -> Marker {
    let prefix = if d.is_alert() { "LOW HUMIDITY! " } else { "" };
    Marker {
        id: d.id,
        name: d.name.clone(),
        latitude: d.latitude,
        longitude: d.longitude,
        temperature: d.temperature,
        moisture: d.moisture,
        timestamp: d.timestamp,
        label: format!(
            "{prefix}{} | Group: {} | Temperature: {} °C | Humidity: {}%",
            d.name, d.group, d.temperature, d.moisture
        ),
    }
}

/// Groupes présents dans un snapshot, triés et dédoublonnés
pub fn group_names(rows: &[Device]) -> Vec<String> {
    rows.iter()
        .map(|d| d.group.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build(rows: &[Device], filter: &GroupFilter) -> ViewScene {
    let filtered: Vec<&Device> = match filter {
        GroupFilter::All => rows.iter().collect(),
        GroupFilter::Group(g) => rows.iter().filter(|d| d.group == *g).collect(),
    };

    // BTreeMap = ordre lexical des groupes, ordre du snapshot dans chaque groupe
    let mut groups: BTreeMap<&str, Vec<&Device>> = BTreeMap::new();
    for &d in &filtered {
        groups.entry(d.group.as_str()).or_default().push(d);
    }

    let mut clusters = Vec::new();
    for (i, (group, devices)) in groups.into_iter().enumerate() {
        let color = GROUP_PALETTE[i % GROUP_PALETTE.len()];
        let (alert, normal): (Vec<&Device>, Vec<&Device>) = devices.into_iter().partition(|d| d.is_alert());

        if !normal.is_empty() {
            clusters.push(MarkerCluster {
                group: group.to_string(),
                kind: ClusterKind::Normal,
                color: color.to_string(),
                size: NORMAL_MARKER_SIZE,
                markers: normal.into_iter().map(to_marker).collect(),
            });
        }
        if !alert.is_empty() {
            clusters.push(MarkerCluster {
                group: group.to_string(),
                kind: ClusterKind::Alert,
                color: ALERT_COLOR.to_string(),
                size: ALERT_MARKER_SIZE,
                markers: alert.into_iter().map(to_marker).collect(),
            });
        }
    }

    let center = if filtered.is_empty() {
        MapCenter { lat: 0.0, lon: 0.0 }
    } else {
        let n = filtered.len() as f64;
        MapCenter {
            lat: filtered.iter().map(|d| d.latitude).sum::<f64>() / n,
            lon: filtered.iter().map(|d| d.longitude).sum::<f64>() / n,
        }
    };

    let zoom = match filter {
        GroupFilter::Group(_) if !filtered.is_empty() => GROUP_ZOOM,
        _ => WIDE_ZOOM,
    };

    ViewScene { filter: filter.as_param().to_string(), center, zoom, clusters }
}
