//! Layer source providers.
//!
//! Each supported layer type (OSM, XYZ, WMS, WMTS, WFS, WFS-T, ArcGIS REST,
//! ArcGIS Feature Server, OGC API Features, GeoServer REST, inline vector) has
//! a provider that turns a stored [`map_common::LayerConfig`] into a
//! [`RenderableLayer`] with a concrete tile, image, or vector source.
//! Providers are looked up through a [`ProviderRegistry`] keyed by the closed
//! [`map_common::LayerType`] enum, so an unknown type degrades to a skipped
//! layer rather than a crash.

pub mod basemap;
pub mod capabilities;
pub mod context;
pub mod layer;
pub mod registry;

pub mod arcgis;
pub mod ogcapi;
pub mod osm;
pub mod vector;
pub mod wfs;
pub mod wms;
pub mod wmts;

pub use basemap::{basemap_layer, normalize_basemap_name};
pub use capabilities::{DiscoveredLayer, ServiceCapabilities, WmtsMatrixData};
pub use context::ProviderContext;
pub use layer::{
    EditTarget, FeatureQuery, ImageSource, LayerSource, RenderableLayer, TileSource,
    TileUrlTemplate, VectorSource,
};
pub use registry::{LayerProvider, ProviderRegistry};
