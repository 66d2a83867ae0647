//! GeoJSON feature model used by vector sources, identify and editing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BoundingBox;

/// A GeoJSON FeatureCollection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    /// Array of features.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Create a new empty FeatureCollection.
    pub fn new() -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }

    pub fn from_features(features: Vec<Feature>) -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A GeoJSON Feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    /// Optional feature identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The geometry of this feature.
    pub geometry: Geometry,

    /// Attribute properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            type_: "Feature".to_string(),
            id: None,
            geometry,
            properties: Map::new(),
        }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self::new(Geometry::Point {
            coordinates: [x, y],
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// True when the feature's geometry lies within `margin` units of the
    /// given point. Used for click hit-testing, with `margin` derived from
    /// a pixel tolerance times the view resolution.
    pub fn hit_test(&self, x: f64, y: f64, margin: f64) -> bool {
        self.geometry.bbox().expand(margin).contains_point(x, y)
    }
}

/// GeoJSON geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        /// [x, y] in the source projection.
        coordinates: [f64; 2],
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    Polygon {
        /// Linear rings; the first is the exterior.
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point {
            coordinates: [x, y],
        }
    }

    pub fn line_string(coordinates: Vec<[f64; 2]>) -> Self {
        Geometry::LineString { coordinates }
    }

    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon {
            coordinates: rings,
        }
    }

    /// All vertex coordinates, flattened. Snap targets.
    pub fn vertices(&self) -> Vec<[f64; 2]> {
        match self {
            Geometry::Point { coordinates } => vec![*coordinates],
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                coordinates.clone()
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().flatten().copied().collect()
            }
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .flatten()
                .flatten()
                .copied()
                .collect(),
        }
    }

    /// Axis-aligned bounding box of the geometry.
    pub fn bbox(&self) -> BoundingBox {
        let vertices = self.vertices();
        let mut bbox = BoundingBox::new(
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        );
        for [x, y] in vertices {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    /// The vertex nearest to (x, y) within `tolerance`, if any.
    pub fn nearest_vertex(&self, x: f64, y: f64, tolerance: f64) -> Option<[f64; 2]> {
        self.vertices()
            .into_iter()
            .map(|v| {
                let d = ((v[0] - x).powi(2) + (v[1] - y).powi(2)).sqrt();
                (v, d)
            })
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(v, _)| v)
    }
}

/// Convert an Esri JSON feature set (the Feature Server `query` response
/// shape) into GeoJSON features. Geometry keys follow the Esri REST spec:
/// `x`/`y` for points, `paths` for polylines, `rings` for polygons.
pub fn features_from_esri_json(value: &Value) -> Vec<Feature> {
    let Some(features) = value.get("features").and_then(Value::as_array) else {
        return Vec::new();
    };

    features
        .iter()
        .filter_map(|f| {
            let geometry = esri_geometry(f.get("geometry")?)?;
            let mut feature = Feature::new(geometry);
            if let Some(attrs) = f.get("attributes").and_then(Value::as_object) {
                feature.properties = attrs.clone();
                if let Some(oid) = attrs.get("OBJECTID").and_then(Value::as_i64) {
                    feature.id = Some(oid.to_string());
                }
            }
            Some(feature)
        })
        .collect()
}

fn esri_geometry(geom: &Value) -> Option<Geometry> {
    let coord_pair = |v: &Value| -> Option<[f64; 2]> {
        let arr = v.as_array()?;
        Some([arr.first()?.as_f64()?, arr.get(1)?.as_f64()?])
    };

    if let (Some(x), Some(y)) = (
        geom.get("x").and_then(Value::as_f64),
        geom.get("y").and_then(Value::as_f64),
    ) {
        return Some(Geometry::point(x, y));
    }

    if let Some(paths) = geom.get("paths").and_then(Value::as_array) {
        let lines: Vec<Vec<[f64; 2]>> = paths
            .iter()
            .filter_map(|p| p.as_array())
            .map(|p| p.iter().filter_map(coord_pair).collect())
            .collect();
        return match lines.len() {
            0 => None,
            1 => Some(Geometry::line_string(lines.into_iter().next().unwrap())),
            _ => Some(Geometry::MultiLineString { coordinates: lines }),
        };
    }

    if let Some(rings) = geom.get("rings").and_then(Value::as_array) {
        let rings: Vec<Vec<[f64; 2]>> = rings
            .iter()
            .filter_map(|r| r.as_array())
            .map(|r| r.iter().filter_map(coord_pair).collect())
            .collect();
        if rings.is_empty() {
            return None;
        }
        return Some(Geometry::polygon(rings));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geojson_round_trip() {
        let feature = Feature::point(8.54, 47.37)
            .with_id("f1")
            .with_property("name", "Zurich");
        let collection = FeatureCollection::from_features(vec![feature]);

        let json = serde_json::to_string(&collection).unwrap();
        assert!(json.contains("\"type\":\"FeatureCollection\""));
        assert!(json.contains("\"type\":\"Point\""));

        let back: FeatureCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, collection);
    }

    #[test]
    fn test_hit_test_with_margin() {
        let feature = Feature::point(100.0, 50.0);
        assert!(feature.hit_test(100.5, 50.5, 1.0));
        assert!(!feature.hit_test(110.0, 50.0, 1.0));
    }

    #[test]
    fn test_nearest_vertex() {
        let geometry = Geometry::line_string(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]);
        assert_eq!(
            geometry.nearest_vertex(9.5, 0.4, 1.0),
            Some([10.0, 0.0])
        );
        assert_eq!(geometry.nearest_vertex(5.0, 5.0, 1.0), None);
    }

    #[test]
    fn test_esri_json_conversion() {
        let payload = json!({
            "features": [
                {
                    "attributes": { "OBJECTID": 7, "NAME": "Trail A" },
                    "geometry": { "paths": [[[0.0, 0.0], [1.0, 1.0]]] }
                },
                {
                    "attributes": { "OBJECTID": 8 },
                    "geometry": { "x": 3.0, "y": 4.0 }
                }
            ]
        });

        let features = features_from_esri_json(&payload);
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].id.as_deref(), Some("7"));
        assert!(matches!(features[0].geometry, Geometry::LineString { .. }));
        assert!(matches!(
            features[1].geometry,
            Geometry::Point { coordinates: [3.0, 4.0] }
        ));
    }

    #[test]
    fn test_esri_json_without_features_is_empty() {
        let features = features_from_esri_json(&json!({ "error": { "code": 400 } }));
        assert!(features.is_empty());
    }
}
