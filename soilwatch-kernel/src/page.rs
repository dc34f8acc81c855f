//! Page dashboard servie sur `/`.
//!
//! La scène initiale (tous les groupes) est embarquée dans la page ; le
//! sélecteur de groupe appelle ensuite `/scene?group=...` et redessine la
//! carte côté navigateur (Leaflet + OpenStreetMap) sans recharger la page.

use crate::view::{ViewScene, ALL_GROUPS};

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn render_dashboard(scene: &ViewScene, groups: &[String]) -> String {
    // valeur vide = sélecteur effacé, résolu en "tous" par /scene
    let mut options = String::from(r#"<option value="" selected>Choose a group...</option>"#);
    options.push_str(&format!(r#"<option value="{ALL_GROUPS}">Show All</option>"#));
    for g in groups {
        let g = escape_html(g);
        options.push_str(&format!(r#"<option value="{g}">{g}</option>"#));
    }

    // "</" fermerait la balise script
    let scene_json = serde_json::to_string(scene)
        .unwrap_or_else(|_| "null".into())
        .replace("</", "<\\/");

    PAGE_TEMPLATE
        .replace("{{OPTIONS}}", &options)
        .replace("{{SCENE}}", &scene_json)
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>IoT Panel</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
  body { font-family: "Segoe UI", Roboto, sans-serif; background: #f5f7fa; margin: 0; padding: 5px; }
  h1 { text-align: center; color: #1a1a1a; margin-bottom: 5px; font-weight: 600; }
  .subtitle { text-align: center; color: #555; margin-bottom: 40px; }
  .panel { width: 90%; max-width: 2000px; margin: 0 auto; background: white; border-radius: 12px;
           padding: 25px 30px; box-shadow: 0 4px 10px rgba(0,0,0,0.1); }
  select { width: 100%; margin: 8px 0 20px; padding: 6px; }
  #map { width: 100%; min-height: 65vh; border-radius: 10px; }
  footer { text-align: center; margin-top: 40px; color: #888; font-size: 0.9em; }
</style>
</head>
<body>
<h1>IoT Device Panel</h1>
<p class="subtitle">Monitor soil moisture and temperature</p>
<div class="panel">
  <label for="group-select"><b>Select Group:</b></label>
  <select id="group-select">{{OPTIONS}}</select>
  <div id="map"></div>
</div>
<footer>ISS - Grupo 1</footer>
<script>
const initialScene = {{SCENE}};
const map = L.map("map");
L.tileLayer("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png", {
  attribution: "&copy; OpenStreetMap contributors"
}).addTo(map);
const layer = L.layerGroup().addTo(map);

// noms et groupes viennent du seed : jamais interprétés comme HTML
function textElement(s) {
  const el = document.createElement("span");
  el.textContent = s;
  return el;
}

function render(scene) {
  layer.clearLayers();
  map.setView([scene.center.lat, scene.center.lon], scene.zoom);
  for (const cluster of scene.clusters) {
    for (const m of cluster.markers) {
      L.circleMarker([m.latitude, m.longitude], {
        radius: cluster.size / 2, color: cluster.color, fillColor: cluster.color, fillOpacity: 0.9
      }).bindTooltip(textElement(m.name), { permanent: true, direction: "top" })
        .bindPopup(textElement(m.label))
        .addTo(layer);
    }
  }
}

document.getElementById("group-select").addEventListener("change", async (ev) => {
  const res = await fetch("/scene?group=" + encodeURIComponent(ev.target.value));
  if (res.ok) { render(await res.json()); }
});

render(initialScene);
</script>
</body>
</html>
"#;
