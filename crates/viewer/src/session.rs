//! Viewer session: load a composed map, hold the live render stack, and
//! expose the mutation/identify/editing surface.
//!
//! The live stack (basemap slot + ordered data layers) is the single source
//! of truth. The declarative layer list hosts persist is derived from it on
//! demand, so the two can never diverge.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use layer_providers::{
    basemap_layer, FeatureQuery, LayerSource, ProviderContext, ProviderRegistry, RenderableLayer,
};
use map_common::crs::{lon_lat_to_web_mercator, looks_like_swapped_lon_lat};
use map_common::feature::features_from_esri_json;
use map_common::{
    BoundingBox, CrsCode, Feature, FeatureCollection, Geometry, LayerConfig, LayerType, MapConfig,
    MapError, MapResult,
};

use crate::editing::{DrawMode, EditSession, TransactionPlan};
use crate::events::{EventBus, ViewerEvent};
use crate::identify::{self, IdentifyResult};

/// What went wrong loading a map, kept for the persistent error panel.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub message: String,
    pub map_id: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
    Error(LoadFailure),
}

/// Sub-state of a `Ready` session: idle, or editing the layer at an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    Idle,
    Editing(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// Lon/lat.
    pub center: [f64; 2],
    pub zoom: f64,
}

/// One row of the host-facing layer listing.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub index: usize,
    pub name: String,
    pub kind: LayerType,
    pub visible: bool,
    pub opacity: f64,
    pub editable: bool,
}

/// Declarative layer state for persistence, derived from the live stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerState {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    pub visible: bool,
    pub opacity: f64,
    pub z_index: usize,
}

/// Aggregated outcome of one identify click.
#[derive(Debug, Clone)]
pub struct IdentifyOutcome {
    pub html: String,
    pub features: FeatureCollection,
}

pub struct MapSession {
    ctx: ProviderContext,
    registry: ProviderRegistry,
    api_key: Option<String>,
    map_id: Option<String>,
    title: Option<String>,
    projection: CrsCode,
    state: SessionState,
    basemap: Option<RenderableLayer>,
    layers: Vec<RenderableLayer>,
    basemaps: Vec<map_common::layer::MapBasemapEntry>,
    view: ViewState,
    selection: Vec<Feature>,
    edit: Option<EditSession>,
    click_generation: u64,
    events: EventBus,
}

impl MapSession {
    pub fn new(api_url: Option<String>, api_key: Option<String>) -> MapResult<Self> {
        Ok(Self {
            ctx: ProviderContext::new(api_url)?,
            registry: ProviderRegistry::with_defaults(),
            api_key,
            map_id: None,
            title: None,
            projection: CrsCode::web_mercator(),
            state: SessionState::Unloaded,
            basemap: None,
            layers: Vec::new(),
            basemaps: Vec::new(),
            view: ViewState {
                center: [0.0, 0.0],
                zoom: 2.0,
            },
            selection: Vec::new(),
            edit: None,
            click_generation: 0,
            events: EventBus::new(),
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready)
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn map_id(&self) -> Option<&str> {
        self.map_id.as_deref()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    /// Drop everything belonging to the previous map. Bumping the click
    /// generation invalidates identify responses still in flight.
    fn teardown(&mut self) {
        self.basemap = None;
        self.layers.clear();
        self.basemaps.clear();
        self.edit = None;
        self.selection.clear();
        self.click_generation += 1;
    }

    async fn fetch_config(&self, map_id: &str) -> MapResult<MapConfig> {
        let api_url = self
            .ctx
            .api_url()
            .ok_or_else(|| MapError::ConfigLoad("no backend URL configured".to_string()))?;
        let url = format!("{api_url}/api/viewer/{map_id}");
        let mut request = self.ctx.http().get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MapError::ConfigLoad(e.to_string()))?;
        match response.status().as_u16() {
            401 | 403 => {
                return Err(MapError::Unauthorized {
                    status: response.status().as_u16(),
                })
            }
            404 => return Err(MapError::MapNotFound(map_id.to_string())),
            s if !(200..300).contains(&s) => {
                return Err(MapError::ConfigLoad(format!("backend returned status {s}")))
            }
            _ => {}
        }
        response
            .json::<MapConfig>()
            .await
            .map_err(|e| MapError::ConfigLoad(format!("invalid viewer config: {e}")))
    }

    /// Load a composed map from the backend. Failure is terminal for this
    /// load: the session moves to `Error` and keeps the failure for the
    /// error panel.
    pub async fn load_map(&mut self, map_id: &str) -> MapResult<()> {
        self.teardown();
        self.state = SessionState::Loading;
        match self.fetch_config(map_id).await {
            Ok(config) => {
                self.apply_config(map_id, config);
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Error(LoadFailure {
                    message: err.to_string(),
                    map_id: map_id.to_string(),
                    api_url: self.ctx.api_url().unwrap_or("(unset)").to_string(),
                });
                Err(err)
            }
        }
    }

    /// Build the live stack from an already-fetched config. Also the load
    /// path for hosts that inject configuration directly.
    pub fn apply_config(&mut self, map_id: &str, config: MapConfig) {
        self.teardown();
        self.map_id = Some(map_id.to_string());
        self.title = Some(config.title.clone());
        self.projection = config.projection();

        if looks_like_swapped_lon_lat(config.view.center) {
            warn!(
                center = ?config.view.center,
                "map center is outside lon/lat range; coordinates may be swapped"
            );
        }
        self.view = ViewState {
            center: config.view.center,
            zoom: config.view.zoom,
        };

        let default = config.default_basemap().cloned();
        self.basemaps = config.basemaps;
        self.basemap = Some(match &default {
            Some(entry) => basemap_layer(&entry.basemap, &self.ctx, &self.registry),
            None => basemap_layer(
                &map_common::BasemapConfig::osm(),
                &self.ctx,
                &self.registry,
            ),
        });

        for entry in &config.layers {
            let Some(mut layer) = self.registry.create_layer(&entry.layer, &self.ctx) else {
                continue;
            };
            layer.visible = entry.visible;
            if let Some(opacity) = entry.opacity {
                layer.set_opacity(opacity);
            }
            self.layers.push(layer);
        }

        info!(
            map = %map_id,
            layers = self.layers.len(),
            "map loaded"
        );
        self.state = SessionState::Ready;
    }

    /// The full render stack, bottom first: basemap, then data layers in
    /// z-order.
    pub fn render_stack(&self) -> Vec<&RenderableLayer> {
        self.basemap.iter().chain(self.layers.iter()).collect()
    }

    pub fn basemap(&self) -> Option<&RenderableLayer> {
        self.basemap.as_ref()
    }

    /// Declarative per-layer state for persistence, derived from the live
    /// stack on demand.
    pub fn layer_states(&self) -> Vec<LayerState> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| LayerState {
                name: layer.name.clone(),
                layer_type: layer.kind.as_str().to_string(),
                visible: layer.visible,
                opacity: layer.opacity,
                z_index: i,
            })
            .collect()
    }

    pub fn layers(&self) -> Vec<LayerSummary> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| LayerSummary {
                index: i,
                name: layer.name.clone(),
                kind: layer.kind,
                visible: layer.visible,
                opacity: layer.opacity,
                editable: layer.is_editable() || layer.kind.supports_editing(),
            })
            .collect()
    }

    pub fn layer(&self, index: usize) -> Option<&RenderableLayer> {
        self.layers.get(index)
    }

    // === Stack mutators ===

    pub fn toggle_visibility(&mut self, index: usize) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) => {
                layer.visible = !layer.visible;
                layer.visible
            }
            None => false,
        }
    }

    pub fn set_opacity(&mut self, index: usize, opacity: f64) {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.set_opacity(opacity);
        }
    }

    /// Reorder a data layer. Indexes outside the stack are ignored.
    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        if from >= self.layers.len() || to >= self.layers.len() {
            return false;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        if let Some(edit) = self.edit.as_mut() {
            if edit.layer_index == from {
                edit.layer_index = to;
            } else if from < edit.layer_index && edit.layer_index <= to {
                edit.layer_index -= 1;
            } else if to <= edit.layer_index && edit.layer_index < from {
                edit.layer_index += 1;
            }
        }
        true
    }

    /// Switch the basemap without reloading the map. `key` matches a
    /// configured basemap by name (case-insensitive); anything else falls
    /// back to OSM.
    pub fn set_basemap(&mut self, key: &str) {
        let entry = self
            .basemaps
            .iter()
            .find(|b| b.basemap.name.eq_ignore_ascii_case(key))
            .map(|b| b.basemap.clone());
        let config = entry.unwrap_or_else(|| {
            if !key.eq_ignore_ascii_case("osm") {
                warn!(basemap = %key, "unknown basemap key, using OpenStreetMap");
            }
            map_common::BasemapConfig::osm()
        });
        self.basemap = Some(basemap_layer(&config, &self.ctx, &self.registry));
    }

    // === View operations ===

    pub fn view_state(&self) -> ViewState {
        self.view
    }

    pub fn zoom_to(&mut self, center: [f64; 2], zoom: f64) {
        self.view.center = center;
        self.view.zoom = zoom;
    }

    pub fn pan_to(&mut self, center: [f64; 2]) {
        self.view.center = center;
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.view.zoom = zoom;
    }

    /// The view centre in projection units. Hosts that drive a Web-Mercator
    /// camera get metres; any other projection passes the centre through.
    pub fn projected_center(&self) -> [f64; 2] {
        if self.projection == CrsCode::web_mercator() {
            let (x, y) = lon_lat_to_web_mercator(self.view.center[0], self.view.center[1]);
            [x, y]
        } else {
            self.view.center
        }
    }

    // === Layer lifecycle operations ===

    /// Add a layer at the top of the stack. Returns its index, or `None`
    /// when the config cannot be resolved.
    pub fn add_vector_layer(&mut self, config: LayerConfig) -> Option<usize> {
        let layer = self.registry.create_layer(&config, &self.ctx)?;
        self.layers.push(layer);
        Some(self.layers.len() - 1)
    }

    pub fn remove_layer(&mut self, index: usize) -> Option<RenderableLayer> {
        if index >= self.layers.len() {
            return None;
        }
        if let Some(edit) = &self.edit {
            if edit.layer_index == index {
                self.exit_edit();
            }
        }
        if let Some(edit) = self.edit.as_mut() {
            if edit.layer_index > index {
                edit.layer_index -= 1;
            }
        }
        Some(self.layers.remove(index))
    }

    /// The features of a vector layer as a portable collection.
    pub fn export_layer(&self, index: usize) -> Option<FeatureCollection> {
        let source = self.layers.get(index)?.vector_source()?;
        Some(FeatureCollection::from_features(source.features.clone()))
    }

    /// Append features to a vector layer. Features added while the layer is
    /// in edit mode are tracked as inserts.
    pub fn add_features(&mut self, index: usize, collection: FeatureCollection) -> bool {
        let editing_here = self
            .edit
            .as_ref()
            .is_some_and(|e| e.layer_index == index);
        let Some(source) = self
            .layers
            .get_mut(index)
            .and_then(RenderableLayer::vector_source_mut)
        else {
            return false;
        };
        for mut feature in collection.features {
            let id = feature
                .id
                .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                .clone();
            source.features.push(feature);
            if editing_here {
                if let Some(edit) = self.edit.as_mut() {
                    edit.note_inserted(id);
                }
            }
        }
        true
    }

    /// Fetch a vector layer's features for the given extent and replace the
    /// in-memory set. ArcGIS query responses are translated from Esri JSON;
    /// everything else is parsed as a GeoJSON feature collection. A layer
    /// with pending edits is never reloaded out from under the editor.
    pub async fn load_layer_features(
        &mut self,
        index: usize,
        extent: &BoundingBox,
    ) -> MapResult<usize> {
        if self.edit.as_ref().is_some_and(|e| e.layer_index == index) {
            let name = self
                .layers
                .get(index)
                .map(|l| l.name.clone())
                .unwrap_or_else(|| index.to_string());
            return Err(MapError::Provider {
                layer: name,
                message: "layer has an active edit session".into(),
            });
        }
        let (name, url, is_esri) = {
            let layer = self.layers.get(index).ok_or_else(|| MapError::Provider {
                layer: index.to_string(),
                message: "no such layer".into(),
            })?;
            let name = layer.name.clone();
            let Some(source) = layer.vector_source() else {
                return Err(MapError::Provider {
                    layer: name,
                    message: "not a vector layer".into(),
                });
            };
            // Inline and not-yet-configured sources have nothing to fetch.
            let Some(url) = source.request_url(extent) else {
                return Ok(0);
            };
            let is_esri = matches!(source.query, FeatureQuery::ArcGis { .. });
            (name, url, is_esri)
        };
        let value: serde_json::Value = self
            .ctx
            .http()
            .get(&url)
            .send()
            .await
            .map_err(|e| MapError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| MapError::Http(e.to_string()))?;
        let features = if is_esri {
            features_from_esri_json(&value)
        } else {
            serde_json::from_value::<FeatureCollection>(value)?.features
        };
        let count = features.len();
        if let Some(source) = self
            .layers
            .get_mut(index)
            .and_then(RenderableLayer::vector_source_mut)
        {
            source.features = features;
            source.loaded = true;
        }
        info!(layer = %name, count, "loaded vector features");
        Ok(count)
    }

    // === Selection ===

    /// Select every feature of a visible vector layer whose bounding box
    /// intersects the given geometry's bounding box.
    pub fn select_features(&mut self, geometry: &Geometry) -> usize {
        let extent = geometry.bbox();
        self.selection = self
            .layers
            .iter()
            .filter(|l| l.visible)
            .filter_map(RenderableLayer::vector_source)
            .flat_map(|s| s.features.iter())
            .filter(|f| f.geometry.bbox().intersects(&extent))
            .cloned()
            .collect();
        self.events.emit(ViewerEvent::FeaturesSelected {
            features: FeatureCollection::from_features(self.selection.clone()),
        });
        self.selection.len()
    }

    pub fn selected_features(&self) -> FeatureCollection {
        FeatureCollection::from_features(self.selection.clone())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // === Identify ===

    /// Take a click token. A token is stale once any newer click (or a
    /// reload) has happened.
    pub fn begin_click(&mut self) -> u64 {
        self.click_generation += 1;
        self.click_generation
    }

    pub fn click_is_current(&self, token: u64) -> bool {
        self.click_generation == token
    }

    /// Identify at a map coordinate. Returns `None` when the session is not
    /// ready, a layer is in edit mode, or the click went stale while
    /// queries were in flight.
    pub async fn identify(
        &mut self,
        coordinate: [f64; 2],
        resolution: f64,
    ) -> Option<IdentifyOutcome> {
        if !self.is_ready() || self.edit.is_some() {
            return None;
        }
        let token = self.begin_click();
        let results: Vec<IdentifyResult> =
            identify::run_identify(self.ctx.http(), &self.layers, coordinate, resolution).await;
        if !self.click_is_current(token) {
            return None;
        }
        let features = identify::collect_features(&results);
        if !features.is_empty() {
            self.events.emit(ViewerEvent::FeaturesSelected {
                features: features.clone(),
            });
        }
        Some(IdentifyOutcome {
            html: identify::popup_html(&results),
            features,
        })
    }

    // === Editing ===

    pub fn edit_session(&self) -> Option<&EditSession> {
        self.edit.as_ref()
    }

    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        match &self.edit {
            Some(edit) => InteractionMode::Editing(edit.layer_index),
            None => InteractionMode::Idle,
        }
    }

    /// Enter edit mode on a layer. Entering while another layer is being
    /// edited exits that session first.
    pub fn enter_edit(&mut self, index: usize) -> MapResult<()> {
        let layer = self
            .layers
            .get(index)
            .ok_or_else(|| MapError::NotEditable(format!("no layer at index {index}")))?;
        if !(layer.is_editable() || layer.kind.supports_editing()) {
            return Err(MapError::NotEditable(layer.name.clone()));
        }
        if !matches!(layer.source, LayerSource::Vector(_)) {
            return Err(MapError::NotEditable(layer.name.clone()));
        }
        if self.edit.is_some() {
            self.exit_edit();
        }
        let source = self.layers[index]
            .vector_source_mut()
            .ok_or_else(|| MapError::NotEditable(format!("no vector source at index {index}")))?;
        self.edit = Some(EditSession::begin(index, source));
        Ok(())
    }

    /// Leave edit mode, detaching all interactions. Unsaved local edits
    /// stay in the layer source.
    pub fn exit_edit(&mut self) {
        self.edit = None;
    }

    pub fn set_draw_mode(&mut self, mode: Option<DrawMode>) -> MapResult<()> {
        let edit = self
            .edit
            .as_mut()
            .ok_or_else(|| MapError::NotEditable("no layer in edit mode".to_string()))?;
        edit.set_draw_mode(mode);
        Ok(())
    }

    pub fn edit_select(&mut self, coordinate: [f64; 2], tolerance: f64) -> Option<String> {
        let edit = self.edit.as_mut()?;
        let source = self.layers.get(edit.layer_index)?.vector_source()?;
        edit.select_at(source, coordinate, tolerance)
            .map(str::to_string)
    }

    pub fn edit_modify(&mut self, geometry: Geometry) -> MapResult<()> {
        let edit = self
            .edit
            .as_mut()
            .ok_or_else(|| MapError::NotEditable("no layer in edit mode".to_string()))?;
        let source = self.layers[edit.layer_index]
            .vector_source_mut()
            .ok_or_else(|| MapError::NotEditable("edited layer vanished".to_string()))?;
        edit.modify_selected(source, geometry)
    }

    pub fn edit_draw(&mut self, geometry: Geometry) -> MapResult<String> {
        let edit = self
            .edit
            .as_mut()
            .ok_or_else(|| MapError::NotEditable("no layer in edit mode".to_string()))?;
        let source = self.layers[edit.layer_index]
            .vector_source_mut()
            .ok_or_else(|| MapError::NotEditable("edited layer vanished".to_string()))?;
        edit.draw_feature(source, geometry)
    }

    pub fn edit_delete(&mut self) -> MapResult<()> {
        let edit = self
            .edit
            .as_mut()
            .ok_or_else(|| MapError::NotEditable("no layer in edit mode".to_string()))?;
        let source = self.layers[edit.layer_index]
            .vector_source_mut()
            .ok_or_else(|| MapError::NotEditable("edited layer vanished".to_string()))?;
        edit.delete_selected(source)
    }

    pub fn edit_snap(&self, coordinate: [f64; 2], tolerance: f64) -> Option<[f64; 2]> {
        let edit = self.edit.as_ref()?;
        let source = self.layers.get(edit.layer_index)?.vector_source()?;
        edit.snap_target(source, coordinate, tolerance)
    }

    /// Persist the edited layer. WFS-T layers send a transaction to the
    /// recorded service; plain vector layers emit a save event with the
    /// full collection. Failure never reverts local edits.
    pub async fn save_edits(&mut self) -> MapResult<()> {
        let edit = self
            .edit
            .as_ref()
            .ok_or_else(|| MapError::NotEditable("no layer in edit mode".to_string()))?;
        let index = edit.layer_index;
        let layer = self
            .layers
            .get(index)
            .ok_or_else(|| MapError::NotEditable("edited layer vanished".to_string()))?;
        let source = layer
            .vector_source()
            .ok_or_else(|| MapError::NotEditable("edited layer vanished".to_string()))?;

        match layer.edit.clone() {
            Some(target) => {
                let plan: TransactionPlan = edit.plan(source);
                if plan.is_empty() {
                    return Ok(());
                }
                let xml = crate::editing::transaction_xml(&target, &plan)?;
                let response = self
                    .ctx
                    .http()
                    .post(target.post_url())
                    .header("Content-Type", "text/xml")
                    .body(xml)
                    .send()
                    .await
                    .map_err(|e| MapError::EditSave(e.to_string()))?;
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !status.is_success() || body.contains("ExceptionReport") {
                    return Err(MapError::EditSave(format!(
                        "service rejected transaction (status {status})"
                    )));
                }
                if let Some(edit) = self.edit.as_mut() {
                    edit.mark_saved();
                }
                Ok(())
            }
            None => {
                let event = ViewerEvent::LayerSaved {
                    layer_name: layer.name.clone(),
                    features: FeatureCollection::from_features(source.features.clone()),
                    saved_at: Utc::now(),
                };
                self.events.emit(event);
                if let Some(edit) = self.edit.as_mut() {
                    edit.mark_saved();
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_common::layer::MapLayerEntry;
    use serde_json::json;

    fn session() -> MapSession {
        MapSession::new(Some("http://backend:3000".to_string()), None).unwrap()
    }

    fn wire_config() -> MapConfig {
        serde_json::from_value(json!({
            "title": "Cadastre",
            "projection": "EPSG:3857",
            "config": { "center": [7.44, 46.95], "zoom": 10.0 },
            "layers": [
                {
                    "name": "parcels",
                    "type": "wfs_t",
                    "url": "https://gis.example.com/wfs",
                    "params": "{\"typeName\":\"cadastre:parcels\"}",
                    "visible": 1,
                    "opacity": 0.8,
                    "is_editable": 1
                },
                {
                    "name": "states",
                    "type": "wms",
                    "url": "https://gis.example.com/wms",
                    "params": { "layers": "topp:states" },
                    "visible": 0
                },
                {
                    "name": "notes",
                    "type": "vector",
                    "params": {}
                }
            ],
            "basemaps": [
                { "name": "plain", "type": "OSM", "is_default": 0 },
                {
                    "name": "ortho",
                    "type": "xyz",
                    "url": "https://tiles.example.com/{z}/{x}/{y}.png",
                    "is_default": 1
                }
            ]
        }))
        .unwrap()
    }

    fn ready_session() -> MapSession {
        let mut s = session();
        s.apply_config("map-1", wire_config());
        s
    }

    #[test]
    fn loading_builds_the_stack_in_order() {
        let s = ready_session();
        assert!(s.is_ready());
        let stack = s.render_stack();
        // Basemap at position 0, then data layers in list order.
        assert_eq!(stack.len(), 4);
        assert_eq!(stack[0].kind, LayerType::Xyz);
        assert_eq!(stack[1].name, "parcels");
        assert_eq!(stack[2].name, "states");
        assert_eq!(stack[3].name, "notes");
    }

    #[test]
    fn marked_default_basemap_wins_over_first() {
        let s = ready_session();
        assert_eq!(s.basemap().unwrap().kind, LayerType::Xyz);
    }

    #[test]
    fn first_basemap_used_when_none_is_marked_default() {
        let mut s = session();
        let mut config = wire_config();
        for entry in &mut config.basemaps {
            entry.is_default = false;
        }
        s.apply_config("map-1", config);
        assert_eq!(s.basemap().unwrap().kind, LayerType::Osm);
    }

    #[test]
    fn sql_flags_and_stringified_params_deserialize() {
        let s = ready_session();
        let parcels = s.layer(0).unwrap();
        assert!(parcels.visible);
        assert!((parcels.opacity - 0.8).abs() < 1e-9);
        assert!(parcels.is_editable());
        let states = s.layer(1).unwrap();
        assert!(!states.visible);
    }

    #[test]
    fn derived_layer_states_track_every_mutation() {
        let mut s = ready_session();
        s.toggle_visibility(1);
        s.set_opacity(0, 0.25);
        s.move_layer(0, 2);

        let states = s.layer_states();
        let names: Vec<_> = states.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["states", "notes", "parcels"]);
        assert!(states[0].visible, "visibility toggle must be reflected");
        assert!((states[2].opacity - 0.25).abs() < 1e-9);
        assert_eq!(states[2].z_index, 2);
    }

    #[test]
    fn opacity_mutator_clamps() {
        let mut s = ready_session();
        s.set_opacity(0, 7.0);
        assert_eq!(s.layer(0).unwrap().opacity, 1.0);
    }

    #[test]
    fn out_of_range_center_warns_but_loads() {
        let mut s = session();
        let mut config = wire_config();
        config.view.center = [200.0, 45.0];
        s.apply_config("map-1", config);
        assert!(s.is_ready());
        assert_eq!(s.view_state().center, [200.0, 45.0]);
    }

    #[test]
    fn reload_tears_down_previous_state() {
        let mut s = ready_session();
        s.enter_edit(0).unwrap();
        s.select_features(&Geometry::point(0.0, 0.0));
        let stale_click = s.begin_click();

        s.apply_config("map-2", wire_config());
        assert!(!s.is_editing());
        assert!(s.selected_features().is_empty());
        assert!(!s.click_is_current(stale_click));
        assert_eq!(s.layers().len(), 3);
    }

    #[test]
    fn basemap_switch_does_not_touch_data_layers() {
        let mut s = ready_session();
        s.set_basemap("plain");
        assert_eq!(s.basemap().unwrap().kind, LayerType::Osm);
        assert_eq!(s.layers().len(), 3);
        s.set_basemap("no-such-basemap");
        assert_eq!(s.basemap().unwrap().kind, LayerType::Osm);
    }

    #[test]
    fn view_operations_update_view_state() {
        let mut s = ready_session();
        s.zoom_to([8.0, 47.0], 14.0);
        assert_eq!(s.view_state(), ViewState { center: [8.0, 47.0], zoom: 14.0 });
        s.pan_to([9.0, 46.0]);
        s.set_zoom(6.0);
        assert_eq!(s.view_state().center, [9.0, 46.0]);
        assert_eq!(s.view_state().zoom, 6.0);
    }

    #[test]
    fn add_export_and_remove_round_trip() {
        let mut s = ready_session();
        let config = LayerConfig::new("sketch", LayerType::Vector);
        let index = s.add_vector_layer(config).unwrap();
        assert_eq!(index, 3);

        let collection = FeatureCollection::from_features(vec![
            Feature::point(1.0, 1.0),
            Feature::point(2.0, 2.0),
        ]);
        assert!(s.add_features(index, collection));
        assert_eq!(s.export_layer(index).unwrap().len(), 2);

        let removed = s.remove_layer(index).unwrap();
        assert_eq!(removed.name, "sketch");
        assert!(s.export_layer(index).is_none());
    }

    #[test]
    fn spatial_selection_collects_visible_vector_hits() {
        let mut s = ready_session();
        s.add_features(
            2,
            FeatureCollection::from_features(vec![
                Feature::point(5.0, 5.0),
                Feature::point(100.0, 100.0),
            ]),
        );
        let count = s.select_features(&Geometry::polygon(vec![vec![
            [0.0, 0.0],
            [10.0, 0.0],
            [10.0, 10.0],
            [0.0, 10.0],
            [0.0, 0.0],
        ]]));
        assert_eq!(count, 1);
        assert_eq!(s.selected_features().len(), 1);
        s.clear_selection();
        assert!(s.selected_features().is_empty());
    }

    #[test]
    fn point_selection_hits_a_coincident_point_feature() {
        let mut s = ready_session();
        s.add_features(
            2,
            FeatureCollection::from_features(vec![Feature::point(7.5, 46.9)]),
        );
        // A point's bbox is degenerate; exact coincidence must still select.
        assert_eq!(s.select_features(&Geometry::point(7.5, 46.9)), 1);
    }

    #[test]
    fn selection_emits_an_event() {
        let mut s = ready_session();
        let mut rx = s.subscribe();
        s.add_features(2, FeatureCollection::from_features(vec![Feature::point(1.0, 1.0)]));
        s.select_features(&Geometry::point(1.0, 1.0));
        match rx.try_recv().unwrap() {
            ViewerEvent::FeaturesSelected { features } => assert_eq!(features.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn newer_click_invalidates_older_token() {
        let mut s = ready_session();
        let first = s.begin_click();
        assert!(s.click_is_current(first));
        let second = s.begin_click();
        assert!(!s.click_is_current(first));
        assert!(s.click_is_current(second));
    }

    #[tokio::test]
    async fn identify_hits_local_vector_features() {
        let mut s = ready_session();
        // Hide the WMS layer so no network fetch is attempted.
        assert!(!s.layer(1).unwrap().visible);
        s.add_features(
            2,
            FeatureCollection::from_features(vec![
                Feature::point(10.0, 10.0).with_property("name", "pin")
            ]),
        );
        let outcome = s.identify([10.0, 10.0], 1.0).await.unwrap();
        assert_eq!(outcome.features.len(), 1);
        assert!(outcome.html.contains("pin"));
    }

    #[tokio::test]
    async fn identify_is_suppressed_while_editing() {
        let mut s = ready_session();
        s.enter_edit(0).unwrap();
        assert!(s.identify([0.0, 0.0], 1.0).await.is_none());
    }

    #[test]
    fn edit_mode_is_exclusive() {
        let mut s = ready_session();
        s.enter_edit(0).unwrap();
        assert_eq!(s.interaction_mode(), InteractionMode::Editing(0));
        // Layer 2 is an editable vector layer; entering it exits layer 0.
        s.enter_edit(2).unwrap();
        assert_eq!(s.interaction_mode(), InteractionMode::Editing(2));
        assert_eq!(s.edit_session().unwrap().interactions().len(), 3);
        s.exit_edit();
        assert_eq!(s.interaction_mode(), InteractionMode::Idle);
    }

    #[test]
    fn raster_layers_refuse_edit_mode() {
        let mut s = ready_session();
        let err = s.enter_edit(1).unwrap_err();
        assert!(matches!(err, MapError::NotEditable(_)));
    }

    #[test]
    fn removing_the_edited_layer_exits_edit_mode() {
        let mut s = ready_session();
        s.enter_edit(2).unwrap();
        s.remove_layer(2);
        assert!(!s.is_editing());
    }

    #[tokio::test]
    async fn vector_save_emits_layer_saved() {
        let mut s = ready_session();
        let mut rx = s.subscribe();
        s.enter_edit(2).unwrap();
        s.set_draw_mode(Some(crate::editing::DrawMode::Point)).unwrap();
        s.edit_draw(Geometry::point(3.0, 3.0)).unwrap();
        s.save_edits().await.unwrap();
        let saved = loop {
            match rx.try_recv().unwrap() {
                ViewerEvent::LayerSaved { layer_name, features, .. } => {
                    break (layer_name, features)
                }
                _ => continue,
            }
        };
        assert_eq!(saved.0, "notes");
        assert_eq!(saved.1.len(), 1);
    }

    #[test]
    fn skipped_layers_do_not_break_the_load() {
        let mut config = wire_config();
        let broken: MapLayerEntry = serde_json::from_value(json!({
            "name": "mystery",
            "type": "quantum_tiles",
            "visible": 1
        }))
        .unwrap();
        config.layers.insert(0, broken);
        let mut s = session();
        s.apply_config("map-1", config);
        assert!(s.is_ready());
        assert_eq!(s.layers().len(), 3);
    }

    #[test]
    fn projected_center_converts_to_mercator_metres() {
        let s = ready_session();
        let [x, y] = s.projected_center();
        // 7.44 degrees east of Greenwich, well north of the equator.
        assert!((x - 828_199.0).abs() < 1_000.0, "x was {x}");
        assert!(y > 5_000_000.0 && y < 6_500_000.0, "y was {y}");
    }

    #[tokio::test]
    async fn loading_features_into_a_raster_layer_fails() {
        let mut s = ready_session();
        let extent = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let err = s.load_layer_features(1, &extent).await.unwrap_err();
        assert!(matches!(err, MapError::Provider { .. }));
    }

    #[tokio::test]
    async fn loading_features_into_the_edited_layer_fails() {
        let mut s = ready_session();
        s.enter_edit(0).unwrap();
        let extent = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let err = s.load_layer_features(0, &extent).await.unwrap_err();
        assert!(matches!(err, MapError::Provider { .. }));
    }

    #[tokio::test]
    async fn inline_layers_have_nothing_to_fetch() {
        let mut s = ready_session();
        let extent = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(s.load_layer_features(2, &extent).await.unwrap(), 0);
    }
}
