//! Runtime layer model.
//!
//! A [`RenderableLayer`] is the live counterpart of a stored
//! [`map_common::LayerConfig`]: the config's type string and params have been
//! resolved into a concrete source description that can produce request URLs
//! on demand. URL construction is pure so it can be exercised without a
//! network in tests.

use map_common::style::resolve_style;
use map_common::{
    BoundingBox, CrsCode, Feature, LayerConfig, LayerId, LayerType, ResolvedStyle, TileCoord,
    TileMatrixSet,
};

/// Default pixel box for point feature-info requests.
const INFO_BOX_PX: u32 = 101;

fn join_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().copied())
        .finish();
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}{query}")
}

fn wrap_proxy(proxy: &Option<String>, target: String) -> String {
    match proxy {
        Some(base) => {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("url", &target)
                .finish();
            format!("{base}?{encoded}")
        }
        None => target,
    }
}

/// Parameters shared by WMS GetMap and GetFeatureInfo requests.
#[derive(Debug, Clone, PartialEq)]
pub struct WmsRequest {
    pub base: String,
    pub layers: String,
    pub srs: CrsCode,
    pub format: String,
    pub transparent: bool,
    pub tiled_hint: bool,
}

impl WmsRequest {
    /// WMS 1.1.1 GetMap for an arbitrary extent. Version 1.1.1 keeps the
    /// bbox in x,y order for every CRS, which sidesteps the 1.3.0 axis-order
    /// swap for geographic systems.
    pub fn get_map_url(&self, extent: &BoundingBox, width: u32, height: u32) -> String {
        let bbox = extent.to_csv();
        let width = width.to_string();
        let height = height.to_string();
        let mut pairs = vec![
            ("SERVICE", "WMS"),
            ("VERSION", "1.1.1"),
            ("REQUEST", "GetMap"),
            ("LAYERS", self.layers.as_str()),
            ("STYLES", ""),
            ("SRS", self.srs.as_str()),
            ("BBOX", bbox.as_str()),
            ("WIDTH", width.as_str()),
            ("HEIGHT", height.as_str()),
            ("FORMAT", self.format.as_str()),
            ("TRANSPARENT", if self.transparent { "TRUE" } else { "FALSE" }),
        ];
        if self.tiled_hint {
            pairs.push(("TILED", "true"));
        }
        join_query(&self.base, &pairs)
    }

    /// GetFeatureInfo for a single map coordinate. The request frames the
    /// point in a square query box at the given resolution and asks for the
    /// center pixel.
    pub fn get_feature_info_url(
        &self,
        coordinate: [f64; 2],
        resolution: f64,
        info_format: &str,
    ) -> String {
        let half = resolution * f64::from(INFO_BOX_PX) / 2.0;
        let extent = BoundingBox::new(
            coordinate[0] - half,
            coordinate[1] - half,
            coordinate[0] + half,
            coordinate[1] + half,
        );
        let bbox = extent.to_csv();
        let size = INFO_BOX_PX.to_string();
        let center = (INFO_BOX_PX / 2).to_string();
        let pairs = [
            ("SERVICE", "WMS"),
            ("VERSION", "1.1.1"),
            ("REQUEST", "GetFeatureInfo"),
            ("LAYERS", self.layers.as_str()),
            ("QUERY_LAYERS", self.layers.as_str()),
            ("STYLES", ""),
            ("SRS", self.srs.as_str()),
            ("BBOX", bbox.as_str()),
            ("WIDTH", size.as_str()),
            ("HEIGHT", size.as_str()),
            ("X", center.as_str()),
            ("Y", center.as_str()),
            ("INFO_FORMAT", info_format),
            ("FEATURE_COUNT", "10"),
        ];
        join_query(&self.base, &pairs)
    }
}

/// How to build a tile request URL for a given grid cell.
#[derive(Debug, Clone, PartialEq)]
pub enum TileUrlTemplate {
    Osm,
    /// `{z}`/`{x}`/`{y}` placeholder substitution.
    Xyz { url: String },
    Wms(WmsRequest),
    /// WMTS KVP GetTile.
    Wmts {
        base: String,
        layer: String,
        style: String,
        format: String,
        matrix_set: String,
    },
    /// ArcGIS MapServer export, one request per tile extent.
    ArcGisExport {
        base: String,
        wkid: u32,
        layers_filter: Option<String>,
    },
}

/// Tiled raster source: a URL template plus the grid that positions tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSource {
    pub template: TileUrlTemplate,
    pub grid: TileMatrixSet,
    pub proxy: Option<String>,
}

impl TileSource {
    /// Request URL for one tile, or `None` when the coordinate falls outside
    /// the grid.
    pub fn tile_url(&self, coord: TileCoord) -> Option<String> {
        let matrix = self.grid.matrix_by_zoom(coord.z)?;
        let raw = match &self.template {
            TileUrlTemplate::Osm => format!(
                "https://tile.openstreetmap.org/{}/{}/{}.png",
                coord.z, coord.x, coord.y
            ),
            TileUrlTemplate::Xyz { url } => url
                .replace("{z}", &coord.z.to_string())
                .replace("{x}", &coord.x.to_string())
                .replace("{y}", &coord.y.to_string()),
            TileUrlTemplate::Wms(req) => {
                let extent = matrix.tile_bbox(coord.x, coord.y);
                req.get_map_url(&extent, matrix.tile_size, matrix.tile_size)
            }
            TileUrlTemplate::Wmts {
                base,
                layer,
                style,
                format,
                matrix_set,
            } => {
                let row = coord.y.to_string();
                let col = coord.x.to_string();
                let pairs = [
                    ("SERVICE", "WMTS"),
                    ("VERSION", "1.0.0"),
                    ("REQUEST", "GetTile"),
                    ("LAYER", layer.as_str()),
                    ("STYLE", style.as_str()),
                    ("FORMAT", format.as_str()),
                    ("TILEMATRIXSET", matrix_set.as_str()),
                    ("TILEMATRIX", matrix.identifier.as_str()),
                    ("TILEROW", row.as_str()),
                    ("TILECOL", col.as_str()),
                ];
                join_query(base, &pairs)
            }
            TileUrlTemplate::ArcGisExport {
                base,
                wkid,
                layers_filter,
            } => {
                let extent = matrix.tile_bbox(coord.x, coord.y);
                let bbox = extent.to_csv();
                let sr = wkid.to_string();
                let size = format!("{0},{0}", matrix.tile_size);
                let mut pairs = vec![
                    ("F", "image"),
                    ("FORMAT", "PNG32"),
                    ("TRANSPARENT", "true"),
                    ("BBOX", bbox.as_str()),
                    ("BBOXSR", sr.as_str()),
                    ("IMAGESR", sr.as_str()),
                    ("SIZE", size.as_str()),
                ];
                if let Some(filter) = layers_filter {
                    pairs.push(("LAYERS", filter.as_str()));
                }
                join_query(&format!("{base}/export"), &pairs)
            }
        };
        Some(wrap_proxy(&self.proxy, raw))
    }
}

/// Single-image raster source (untiled WMS or ArcGIS export).
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRequestTemplate {
    Wms(WmsRequest),
    ArcGisExport {
        base: String,
        wkid: u32,
        layers_filter: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSource {
    pub template: ImageRequestTemplate,
    pub proxy: Option<String>,
}

impl ImageSource {
    pub fn request_url(&self, extent: &BoundingBox, width: u32, height: u32) -> String {
        let raw = match &self.template {
            ImageRequestTemplate::Wms(req) => req.get_map_url(extent, width, height),
            ImageRequestTemplate::ArcGisExport {
                base,
                wkid,
                layers_filter,
            } => {
                let bbox = extent.to_csv();
                let sr = wkid.to_string();
                let size = format!("{width},{height}");
                let mut pairs = vec![
                    ("F", "image"),
                    ("FORMAT", "PNG32"),
                    ("TRANSPARENT", "true"),
                    ("BBOX", bbox.as_str()),
                    ("BBOXSR", sr.as_str()),
                    ("IMAGESR", sr.as_str()),
                    ("SIZE", size.as_str()),
                ];
                if let Some(filter) = layers_filter {
                    pairs.push(("LAYERS", filter.as_str()));
                }
                join_query(&format!("{base}/export"), &pairs)
            }
        };
        wrap_proxy(&self.proxy, raw)
    }
}

/// How to fetch the features behind a vector source.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureQuery {
    /// Features were supplied inline with the config.
    Inline,
    /// One-shot GeoJSON document fetch.
    Static { url: String },
    /// WFS GetFeature restricted to the visible extent.
    Wfs {
        base: String,
        type_name: String,
        srs: CrsCode,
    },
    /// ArcGIS Feature Server envelope query against a numbered sub-layer.
    ArcGis { base: String, wkid: u32 },
    /// OGC API Features items listing for a collection.
    OgcApiItems { base: String, collection: String },
}

impl FeatureQuery {
    fn url_for_extent(&self, extent: &BoundingBox) -> Option<String> {
        match self {
            FeatureQuery::Inline => None,
            FeatureQuery::Static { url } => Some(url.clone()),
            FeatureQuery::Wfs {
                base,
                type_name,
                srs,
            } => {
                // No type selected yet, nothing to fetch.
                if type_name.is_empty() {
                    return None;
                }
                let bbox = format!("{},{}", extent.to_csv(), srs.as_str());
                let pairs = [
                    ("service", "WFS"),
                    ("version", "1.1.0"),
                    ("request", "GetFeature"),
                    ("typename", type_name.as_str()),
                    ("outputFormat", "application/json"),
                    ("srsname", srs.as_str()),
                    ("bbox", bbox.as_str()),
                ];
                Some(join_query(base, &pairs))
            }
            FeatureQuery::ArcGis { base, wkid } => {
                let geometry = serde_json::json!({
                    "xmin": extent.min_x,
                    "ymin": extent.min_y,
                    "xmax": extent.max_x,
                    "ymax": extent.max_y,
                    "spatialReference": { "wkid": wkid },
                })
                .to_string();
                let sr = wkid.to_string();
                let pairs = [
                    ("f", "json"),
                    ("returnGeometry", "true"),
                    ("outFields", "*"),
                    ("where", "1=1"),
                    ("spatialRel", "esriSpatialRelIntersects"),
                    ("geometryType", "esriGeometryEnvelope"),
                    ("geometry", geometry.as_str()),
                    ("inSR", sr.as_str()),
                    ("outSR", sr.as_str()),
                ];
                Some(join_query(&format!("{base}/query"), &pairs))
            }
            FeatureQuery::OgcApiItems { base, collection } => {
                if collection.is_empty() {
                    return None;
                }
                let bbox = extent.to_csv();
                let pairs = [("f", "json"), ("limit", "1000"), ("bbox", bbox.as_str())];
                Some(join_query(
                    &format!("{base}/collections/{collection}/items"),
                    &pairs,
                ))
            }
        }
    }
}

/// Vector source: a query template plus the features loaded so far.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSource {
    pub query: FeatureQuery,
    pub proxy: Option<String>,
    pub features: Vec<Feature>,
    pub loaded: bool,
}

impl VectorSource {
    pub fn new(query: FeatureQuery, proxy: Option<String>) -> Self {
        Self {
            query,
            proxy,
            features: Vec::new(),
            loaded: false,
        }
    }

    pub fn inline(features: Vec<Feature>) -> Self {
        Self {
            query: FeatureQuery::Inline,
            proxy: None,
            features,
            loaded: true,
        }
    }

    /// Fetch URL for the given extent, already routed through the proxy if
    /// the layer asked for one. `None` for inline sources.
    pub fn request_url(&self, extent: &BoundingBox) -> Option<String> {
        self.query
            .url_for_extent(extent)
            .map(|raw| wrap_proxy(&self.proxy, raw))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerSource {
    Tile(TileSource),
    Image(ImageSource),
    Vector(VectorSource),
}

/// Where edits to this layer are persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EditTarget {
    pub service_url: String,
    pub type_name: String,
    pub srs: CrsCode,
    pub proxy: Option<String>,
}

impl EditTarget {
    /// POST endpoint for WFS-T Transaction requests.
    pub fn post_url(&self) -> String {
        wrap_proxy(&self.proxy, self.service_url.clone())
    }
}

/// A fully resolved, live map layer.
#[derive(Debug, Clone)]
pub struct RenderableLayer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerType,
    pub projection: CrsCode,
    pub visible: bool,
    pub opacity: f64,
    pub source: LayerSource,
    pub style: ResolvedStyle,
    pub identify_fields: Vec<String>,
    pub edit: Option<EditTarget>,
}

impl RenderableLayer {
    pub fn new(
        id: LayerId,
        name: impl Into<String>,
        kind: LayerType,
        projection: CrsCode,
        source: LayerSource,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            projection,
            visible: true,
            opacity: 1.0,
            source,
            style: ResolvedStyle::default(),
            identify_fields: Vec::new(),
            edit: None,
        }
    }

    /// Layer with the common fields (id, name, projection, style, identify
    /// allowlist) filled from a stored config. Providers attach the source
    /// and, where applicable, an edit target.
    pub fn from_config(config: &LayerConfig, kind: LayerType, source: LayerSource) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            kind,
            projection: config.projection(),
            visible: true,
            opacity: 1.0,
            source,
            style: resolve_style(config.style_value()),
            identify_fields: config.identify_fields(),
            edit: None,
        }
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn is_editable(&self) -> bool {
        self.edit.is_some()
    }

    /// Whether clicking this layer can be answered server-side.
    pub fn supports_feature_info(&self) -> bool {
        self.wms_request().is_some()
    }

    fn wms_request(&self) -> Option<&WmsRequest> {
        match &self.source {
            LayerSource::Tile(TileSource {
                template: TileUrlTemplate::Wms(req),
                ..
            }) => Some(req),
            LayerSource::Image(ImageSource {
                template: ImageRequestTemplate::Wms(req),
                ..
            }) => Some(req),
            _ => None,
        }
    }

    /// GetFeatureInfo URL for a click at `coordinate`, or `None` for layers
    /// that are hit-tested locally instead.
    pub fn feature_info_url(&self, coordinate: [f64; 2], resolution: f64) -> Option<String> {
        let req = self.wms_request()?;
        let raw = req.get_feature_info_url(coordinate, resolution, "application/json");
        let proxy = match &self.source {
            LayerSource::Tile(t) => &t.proxy,
            LayerSource::Image(i) => &i.proxy,
            LayerSource::Vector(_) => return None,
        };
        Some(wrap_proxy(proxy, raw))
    }

    pub fn vector_source(&self) -> Option<&VectorSource> {
        match &self.source {
            LayerSource::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn vector_source_mut(&mut self) -> Option<&mut VectorSource> {
        match &mut self.source {
            LayerSource::Vector(v) => Some(v),
            _ => None,
        }
    }
}
