//! Layer, basemap and map configuration records.
//!
//! These mirror the persisted records served by the composition backend's
//! viewer-config endpoint. From the viewer's perspective they are
//! read-only; the admin side owns their lifecycle.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::crs::CrsCode;

/// Unique identifier for a layer or basemap record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier, used for clones and ad-hoc vector layers.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of supported source service types.
///
/// Persisted records carry a free-form type string; `parse` normalizes it
/// (case, underscores, hyphens, spaces) so "ArcGIS_Feature_Server",
/// "arcgis feature server" and "ARCGISFEATURESERVER" all resolve to the
/// same variant. Unknown strings resolve to `None`, which the provider
/// registry reports as a warning rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    Osm,
    Xyz,
    Wms,
    Wmts,
    Wfs,
    WfsT,
    ArcGisRest,
    ArcGisFeatureServer,
    OgcApiFeatures,
    GeoServerRest,
    Vector,
}

impl LayerType {
    pub fn parse(s: &str) -> Option<Self> {
        let tag: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_uppercase();

        match tag.as_str() {
            "OSM" => Some(LayerType::Osm),
            "XYZ" | "TMS" => Some(LayerType::Xyz),
            "WMS" => Some(LayerType::Wms),
            "WMTS" => Some(LayerType::Wmts),
            "WFS" => Some(LayerType::Wfs),
            "WFST" => Some(LayerType::WfsT),
            "ARCGIS" | "ARCGISREST" => Some(LayerType::ArcGisRest),
            "ARCGISFEATURESERVER" => Some(LayerType::ArcGisFeatureServer),
            "OGCAPIFEATURES" => Some(LayerType::OgcApiFeatures),
            "GEOSERVERREST" => Some(LayerType::GeoServerRest),
            "VECTOR" | "GEOJSON" => Some(LayerType::Vector),
            _ => None,
        }
    }

    /// Whether layers of this type load discrete features (as opposed to
    /// pre-rendered tiles or images).
    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            LayerType::Wfs
                | LayerType::WfsT
                | LayerType::ArcGisFeatureServer
                | LayerType::OgcApiFeatures
                | LayerType::Vector
        )
    }

    /// Whether the editing subsystem may attach to layers of this type.
    pub fn supports_editing(&self) -> bool {
        matches!(self, LayerType::WfsT | LayerType::Vector)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Osm => "OSM",
            LayerType::Xyz => "XYZ",
            LayerType::Wms => "WMS",
            LayerType::Wmts => "WMTS",
            LayerType::Wfs => "WFS",
            LayerType::WfsT => "WFS-T",
            LayerType::ArcGisRest => "ArcGIS_Rest",
            LayerType::ArcGisFeatureServer => "ArcGIS_Feature_Server",
            LayerType::OgcApiFeatures => "OGC_API_Features",
            LayerType::GeoServerRest => "GeoServer_REST",
            LayerType::Vector => "Vector",
        }
    }
}

/// A data source definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default = "LayerId::generate")]
    pub id: LayerId,

    /// Display label.
    pub name: String,

    /// Raw service type tag as persisted; resolve with [`LayerConfig::kind`].
    #[serde(rename = "type")]
    pub layer_type: String,

    /// Base service endpoint. Absent for OSM and inline vector data.
    #[serde(default)]
    pub url: Option<String>,

    /// Open string-keyed mapping of type-specific settings: sub-layer
    /// names, output format, identify fields, legend URL, proxy flag,
    /// WMTS matrix parameters, style descriptor.
    #[serde(default, deserialize_with = "params_or_json_string")]
    pub params: Map<String, Value>,

    /// Source CRS code; defaults to Web Mercator when absent.
    #[serde(default)]
    pub projection: Option<String>,

    /// Governs whether the editing subsystem may attach.
    #[serde(default, deserialize_with = "flag", rename = "is_editable")]
    pub is_editable: bool,
}

impl LayerConfig {
    pub fn new(name: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            id: LayerId::generate(),
            name: name.into(),
            layer_type: layer_type.as_str().to_string(),
            url: None,
            params: Map::new(),
            projection: None,
            is_editable: false,
        }
    }

    /// Config with an unvalidated type tag, as it would arrive from storage.
    pub fn new_raw(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            id: LayerId::generate(),
            name: name.into(),
            layer_type: layer_type.into(),
            url: None,
            params: Map::new(),
            projection: None,
            is_editable: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_projection(mut self, code: impl Into<String>) -> Self {
        self.projection = Some(code.into());
        self
    }

    pub fn editable(mut self) -> Self {
        self.is_editable = true;
        self
    }

    /// Resolve the type tag against the closed enumeration.
    pub fn kind(&self) -> Option<LayerType> {
        LayerType::parse(&self.layer_type)
    }

    /// Source projection, defaulting to Web Mercator.
    pub fn projection(&self) -> CrsCode {
        self.projection
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(CrsCode::parse)
            .unwrap_or_else(CrsCode::web_mercator)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Truthy param lookup accepting booleans, numbers and "true"/"1".
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
            Value::String(s) => Some(matches!(s.as_str(), "true" | "1")),
            _ => None,
        }
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Whether requests must route through the backend's CORS proxy.
    pub fn use_proxy(&self) -> bool {
        self.param_bool("use_proxy").unwrap_or(false)
    }

    /// Tiled fetch mode; defaults to true for WMS/ArcGIS map services.
    pub fn tiled(&self) -> bool {
        self.param_bool("tiled").unwrap_or(true)
    }

    /// The remote sub-resource this layer addresses: `params.layers` for
    /// WMS/ArcGIS, `params.typeName` for WFS, collection id for OGC API.
    /// An empty selection is the valid "not yet configured" state.
    pub fn sub_resource(&self) -> Option<&str> {
        self.param_str("layers")
            .or_else(|| self.param_str("typeName"))
            .or_else(|| self.param_str("layer"))
            .filter(|s| !s.is_empty())
    }

    /// Attribute allowlist for identify popups, comma-separated.
    pub fn identify_fields(&self) -> Vec<String> {
        self.param_str("identify_fields")
            .map(|s| {
                s.split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The raw style descriptor value, either an embedded object or a
    /// JSON string.
    pub fn style_value(&self) -> Option<&Value> {
        self.params.get("style")
    }

    /// Copy all fields under a freshly generated id.
    pub fn clone_with_new_id(&self) -> Self {
        let mut clone = self.clone();
        clone.id = LayerId::generate();
        clone
    }
}

/// A background layer definition: the same shape as [`LayerConfig`],
/// restricted by convention to tile-only types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasemapConfig {
    #[serde(default = "LayerId::generate")]
    pub id: LayerId,
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "params_or_json_string")]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub projection: Option<String>,
}

impl BasemapConfig {
    pub fn osm() -> Self {
        Self {
            id: LayerId::new("osm"),
            name: "OpenStreetMap".to_string(),
            layer_type: "OSM".to_string(),
            url: None,
            params: Map::new(),
            projection: None,
        }
    }

    /// View the basemap as a plain layer config for provider creation.
    pub fn as_layer_config(&self) -> LayerConfig {
        LayerConfig {
            id: self.id.clone(),
            name: self.name.clone(),
            layer_type: self.layer_type.clone(),
            url: self.url.clone(),
            params: self.params.clone(),
            projection: self.projection.clone(),
            is_editable: false,
        }
    }
}

/// Initial viewport of a composed map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MapView {
    /// [lon, lat] in degrees.
    #[serde(default)]
    pub center: [f64; 2],
    #[serde(default = "default_zoom")]
    pub zoom: f64,
}

fn default_zoom() -> f64 {
    2.0
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0],
            zoom: default_zoom(),
        }
    }
}

/// A layer membership row in a map composition. The backend flattens the
/// layer record together with its per-map z-order/opacity/visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLayerEntry {
    #[serde(flatten)]
    pub layer: LayerConfig,

    #[serde(default)]
    pub z_index: Option<i64>,

    #[serde(default)]
    pub opacity: Option<f64>,

    #[serde(default = "default_true", deserialize_with = "flag")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

/// A basemap membership row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapBasemapEntry {
    #[serde(flatten)]
    pub basemap: BasemapConfig,

    #[serde(default, deserialize_with = "flag")]
    pub is_default: bool,
}

/// Resolved map composition as served by `GET /api/viewer/{mapId}`.
///
/// The list order of `layers` is the z-order: index 0 renders first
/// (bottom), directly above the basemap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// CRS of the composed view.
    #[serde(default)]
    pub projection: Option<String>,

    /// Initial viewport; the backend stores it under `config`.
    #[serde(rename = "config", default)]
    pub view: MapView,

    #[serde(default)]
    pub layers: Vec<MapLayerEntry>,

    #[serde(default)]
    pub basemaps: Vec<MapBasemapEntry>,
}

impl MapConfig {
    pub fn projection(&self) -> CrsCode {
        self.projection
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(CrsCode::parse)
            .unwrap_or_else(CrsCode::web_mercator)
    }

    /// The basemap to activate: the entry marked default, else the first.
    pub fn default_basemap(&self) -> Option<&MapBasemapEntry> {
        self.basemaps
            .iter()
            .find(|b| b.is_default)
            .or_else(|| self.basemaps.first())
    }
}

/// Accepts `params` either as an embedded JSON object or as a JSON string
/// (several persistence backends store the column as text).
fn params_or_json_string<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map,
        Value::String(s) => serde_json::from_str::<Value>(&s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => Map::new(),
    })
}

/// Accepts booleans and the 0/1 integers SQL backends hand back.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "true" | "1"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_normalization() {
        assert_eq!(LayerType::parse("WMS"), Some(LayerType::Wms));
        assert_eq!(LayerType::parse("wfs-t"), Some(LayerType::WfsT));
        assert_eq!(LayerType::parse("WFS_T"), Some(LayerType::WfsT));
        assert_eq!(
            LayerType::parse("ArcGIS_Feature_Server"),
            Some(LayerType::ArcGisFeatureServer)
        );
        assert_eq!(LayerType::parse("arcgis rest"), Some(LayerType::ArcGisRest));
        assert_eq!(LayerType::parse("GeoJSON"), Some(LayerType::Vector));
        assert_eq!(LayerType::parse("HOLOGRAM"), None);
    }

    #[test]
    fn test_params_accept_json_string() {
        let json = r#"{
            "name": "Parcels",
            "type": "WFS",
            "url": "https://example.com/wfs",
            "params": "{\"typeName\": \"app:parcels\", \"use_proxy\": true}",
            "is_editable": 1
        }"#;

        let layer: LayerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(layer.sub_resource(), Some("app:parcels"));
        assert!(layer.use_proxy());
        assert!(layer.is_editable);
        assert_eq!(layer.projection().as_str(), "EPSG:3857");
    }

    #[test]
    fn test_empty_sub_resource_is_unconfigured_not_error() {
        let layer = LayerConfig::new("draft", LayerType::Wms).with_param("layers", "");
        assert_eq!(layer.sub_resource(), None);
        assert!(layer.kind().is_some());
    }

    #[test]
    fn test_identify_fields_parsing() {
        let layer = LayerConfig::new("roads", LayerType::Wfs)
            .with_param("identify_fields", "name, surface ,lanes");
        assert_eq!(layer.identify_fields(), vec!["name", "surface", "lanes"]);

        let bare = LayerConfig::new("roads", LayerType::Wfs);
        assert!(bare.identify_fields().is_empty());
    }

    #[test]
    fn test_clone_gets_new_id() {
        let layer = LayerConfig::new("roads", LayerType::Wfs).with_url("https://example.com");
        let clone = layer.clone_with_new_id();
        assert_ne!(layer.id, clone.id);
        assert_eq!(layer.name, clone.name);
        assert_eq!(layer.url, clone.url);
    }

    #[test]
    fn test_map_config_wire_format() {
        let json = r#"{
            "title": "City Overview",
            "projection": "EPSG:3857",
            "config": { "center": [8.54, 47.37], "zoom": 11 },
            "layers": [
                {
                    "name": "Parcels",
                    "type": "WFS",
                    "url": "https://example.com/wfs",
                    "params": {"typeName": "app:parcels"},
                    "z_index": 0,
                    "opacity": 0.8,
                    "visible": 1
                }
            ],
            "basemaps": [
                { "name": "OSM", "type": "OSM", "is_default": 0 },
                { "name": "Aerial", "type": "XYZ", "url": "https://tiles/{z}/{x}/{y}.png", "is_default": 1 }
            ]
        }"#;

        let map: MapConfig = serde_json::from_str(json).unwrap();
        assert_eq!(map.title, "City Overview");
        assert_eq!(map.view.zoom, 11.0);
        assert_eq!(map.layers.len(), 1);
        assert!(map.layers[0].visible);
        assert_eq!(map.layers[0].opacity, Some(0.8));
        assert_eq!(map.default_basemap().unwrap().basemap.name, "Aerial");
    }

    #[test]
    fn test_default_basemap_falls_back_to_first() {
        let json = r#"{
            "title": "t",
            "basemaps": [
                { "name": "A", "type": "OSM" },
                { "name": "B", "type": "OSM" }
            ]
        }"#;
        let map: MapConfig = serde_json::from_str(json).unwrap();
        assert_eq!(map.default_basemap().unwrap().basemap.name, "A");
    }
}
