//! Coordinate Reference System codes and the projection registry.
//!
//! Layer sources and the composed view may each declare their own CRS;
//! whenever coordinates cross that boundary the registry is consulted for
//! the projection definition. The registry is an explicitly constructed
//! object passed into the viewer session rather than a process global.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BoundingBox;

const WEB_MERCATOR_EXTENT: f64 = 20037508.342789244;

/// A normalized CRS code such as "EPSG:3857".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrsCode(String);

impl CrsCode {
    /// Normalize a CRS string. Accepts "epsg:3857", "EPSG:900913",
    /// "CRS:84" and the bare numeric form "3857".
    pub fn parse(s: &str) -> Self {
        let upper = s.trim().to_uppercase();
        let normalized = match upper.as_str() {
            "EPSG:900913" | "900913" => "EPSG:3857".to_string(),
            "CRS:84" => "EPSG:4326".to_string(),
            code if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) => {
                format!("EPSG:{}", code)
            }
            _ => upper,
        };
        Self(normalized)
    }

    pub fn web_mercator() -> Self {
        Self("EPSG:3857".to_string())
    }

    pub fn wgs84() -> Self {
        Self("EPSG:4326".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric EPSG identifier, if this is an EPSG code.
    pub fn epsg_id(&self) -> Option<u32> {
        self.0.strip_prefix("EPSG:").and_then(|n| n.parse().ok())
    }

    /// The well-known id Esri services expect in spatial-reference
    /// parameters. Web Mercator uses the legacy 102100 alias; everything
    /// else passes through its EPSG id.
    pub fn esri_wkid(&self) -> Option<u32> {
        match self.epsg_id() {
            Some(3857) | Some(900913) => Some(102100),
            other => other,
        }
    }

    /// Geographic (degree-based) CRS use lat/lon axis semantics.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg_id(), Some(4326) | Some(4269))
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Definition of a projection the registry knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionDef {
    pub code: CrsCode,
    pub name: String,
    /// Proj4-style definition string.
    pub proj4: String,
    /// Coordinate units ("m" or "degrees").
    pub units: String,
    /// Valid coordinate extent in the projection's own units.
    pub extent: BoundingBox,
}

/// Table of known projections, consulted whenever coordinates cross a
/// layer/map projection boundary. Construct once and share by reference.
#[derive(Debug, Clone)]
pub struct ProjectionRegistry {
    defs: HashMap<CrsCode, ProjectionDef>,
}

impl ProjectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
        }
    }

    /// Registry seeded with the projections the composer supports out of
    /// the box.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for def in default_definitions() {
            registry.register(def);
        }
        registry
    }

    /// Register a projection definition, replacing any existing entry for
    /// the same code.
    pub fn register(&mut self, def: ProjectionDef) {
        self.defs.insert(def.code.clone(), def);
    }

    pub fn get(&self, code: &CrsCode) -> Option<&ProjectionDef> {
        self.defs.get(code)
    }

    pub fn contains(&self, code: &CrsCode) -> bool {
        self.defs.contains_key(code)
    }

    /// Valid extent for a code, defaulting to the Web Mercator square for
    /// unknown projected CRS so tile grids still get a usable origin.
    pub fn extent_of(&self, code: &CrsCode) -> BoundingBox {
        self.defs.get(code).map(|d| d.extent).unwrap_or_else(|| {
            BoundingBox::new(
                -WEB_MERCATOR_EXTENT,
                -WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
            )
        })
    }

    pub fn codes(&self) -> impl Iterator<Item = &CrsCode> {
        self.defs.keys()
    }
}

impl Default for ProjectionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn default_definitions() -> Vec<ProjectionDef> {
    let m = |code: &str, name: &str, proj4: &str, extent: BoundingBox| ProjectionDef {
        code: CrsCode::parse(code),
        name: name.to_string(),
        proj4: proj4.to_string(),
        units: "m".to_string(),
        extent,
    };

    vec![
        ProjectionDef {
            code: CrsCode::wgs84(),
            name: "WGS 84".to_string(),
            proj4: "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            units: "degrees".to_string(),
            extent: BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
        },
        m(
            "EPSG:3857",
            "Web Mercator",
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs",
            BoundingBox::new(
                -WEB_MERCATOR_EXTENT,
                -WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
            ),
        ),
        m(
            "EPSG:2056",
            "CH1903+ / LV95",
            "+proj=somerc +lat_0=46.95240555555556 +lon_0=7.439583333333333 +k_0=1 +x_0=2600000 +y_0=1200000 +ellps=bessel +towgs84=674.374,15.056,405.346,0,0,0,0 +units=m +no_defs",
            BoundingBox::new(2485071.58, 1075346.31, 2828515.82, 1299941.79),
        ),
        m(
            "EPSG:21781",
            "CH1903 / LV03",
            "+proj=somerc +lat_0=46.95240555555556 +lon_0=7.439583333333333 +k_0=1 +x_0=600000 +y_0=200000 +ellps=bessel +towgs84=674.374,15.056,405.346,0,0,0,0 +units=m +no_defs",
            BoundingBox::new(485071.54, 75346.36, 828515.78, 299941.84),
        ),
        m(
            "EPSG:2100",
            "GGRS87 / Greek Grid",
            "+proj=tmerc +lat_0=0 +lon_0=24 +k=0.9996 +x_0=500000 +y_0=0 +ellps=GRS80 +towgs84=-199.87,74.79,246.62,0,0,0,0 +units=m +no_defs",
            BoundingBox::new(94874.69, 3868409.44, 857398.05, 4630676.92),
        ),
        m(
            "EPSG:25832",
            "ETRS89 / UTM zone 32N",
            "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            BoundingBox::new(-1877994.66, 3932281.56, 836715.13, 9440581.95),
        ),
        m(
            "EPSG:3035",
            "ETRS89 / LAEA Europe",
            "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            BoundingBox::new(1896628.62, 1507846.05, 4662111.45, 6829874.45),
        ),
        m(
            "EPSG:27700",
            "OSGB 1936 / British National Grid",
            "+proj=tmerc +lat_0=49 +lon_0=-2 +k=0.9996012717 +x_0=400000 +y_0=-100000 +ellps=airy +towgs84=446.448,-125.157,542.06,124.185,465.111,-854.237,20.4894 +units=m +no_defs",
            BoundingBox::new(-90619.29, 10097.13, 612435.55, 1234954.16),
        ),
    ]
}

/// Forward Web Mercator: lon/lat degrees to EPSG:3857 meters.
pub fn lon_lat_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon / 180.0 * WEB_MERCATOR_EXTENT;
    // Clamp to the Mercator validity band
    let lat = lat.clamp(-89.99, 89.99);
    let y = ((90.0 + lat) * std::f64::consts::PI / 360.0).tan().ln() / std::f64::consts::PI
        * WEB_MERCATOR_EXTENT;
    (x, y)
}

/// Inverse Web Mercator: EPSG:3857 meters to lon/lat degrees.
pub fn web_mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_EXTENT) * 180.0;
    let lat = (y / WEB_MERCATOR_EXTENT) * 180.0;
    let lat = 180.0 / std::f64::consts::PI
        * (2.0 * (lat * std::f64::consts::PI / 180.0).exp().atan() - std::f64::consts::PI / 2.0);
    (lon, lat)
}

/// Detect a probable lon/lat inversion in a `[x, y]` view center.
/// Longitude beyond ±180 or latitude beyond ±90 almost always means the
/// coordinates were entered swapped; the caller logs a warning and carries
/// on rather than failing initialization.
pub fn looks_like_swapped_lon_lat(center: [f64; 2]) -> bool {
    center[0].abs() > 180.0 || center[1].abs() > 90.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalization() {
        assert_eq!(CrsCode::parse("epsg:3857").as_str(), "EPSG:3857");
        assert_eq!(CrsCode::parse("EPSG:900913").as_str(), "EPSG:3857");
        assert_eq!(CrsCode::parse("CRS:84").as_str(), "EPSG:4326");
        assert_eq!(CrsCode::parse("27700").as_str(), "EPSG:27700");
    }

    #[test]
    fn test_esri_wkid_translation() {
        assert_eq!(CrsCode::parse("EPSG:3857").esri_wkid(), Some(102100));
        assert_eq!(CrsCode::parse("900913").esri_wkid(), Some(102100));
        assert_eq!(CrsCode::parse("EPSG:4326").esri_wkid(), Some(4326));
        assert_eq!(CrsCode::parse("EPSG:27700").esri_wkid(), Some(27700));
    }

    #[test]
    fn test_default_registry_covers_required_codes() {
        let registry = ProjectionRegistry::with_defaults();
        for code in [
            "EPSG:3857",
            "EPSG:4326",
            "EPSG:2056",
            "EPSG:21781",
            "EPSG:2100",
            "EPSG:25832",
            "EPSG:3035",
            "EPSG:27700",
        ] {
            assert!(
                registry.contains(&CrsCode::parse(code)),
                "missing {}",
                code
            );
        }
    }

    #[test]
    fn test_web_mercator_round_trip() {
        let (x, y) = lon_lat_to_web_mercator(7.44, 46.95);
        let (lon, lat) = web_mercator_to_lon_lat(x, y);
        assert!((lon - 7.44).abs() < 1e-6);
        assert!((lat - 46.95).abs() < 1e-6);
    }

    #[test]
    fn test_swapped_center_detection() {
        assert!(looks_like_swapped_lon_lat([200.0, 45.0]));
        assert!(looks_like_swapped_lon_lat([45.0, 97.0]));
        assert!(!looks_like_swapped_lon_lat([-73.9, 40.7]));
    }
}
