//! Basemap factory.
//!
//! Basemaps share the layer-config shape and go through the same provider
//! registry, but a map must always end up with a background: any unknown or
//! misconfigured basemap falls back to OpenStreetMap with a warning.

use tracing::warn;

use map_common::tile::web_mercator_matrix_set;
use map_common::{BasemapConfig, LayerType};

use crate::context::ProviderContext;
use crate::layer::{LayerSource, RenderableLayer, TileSource, TileUrlTemplate};
use crate::registry::ProviderRegistry;

/// Normalize the looser type tags basemap records carry in practice.
/// Returns the canonical tag for anything recognized, `None` otherwise.
pub fn normalize_basemap_name(raw: &str) -> Option<LayerType> {
    LayerType::parse(raw)
}

/// Create the live basemap layer. Never fails: a config the registry cannot
/// resolve is replaced by the default OSM basemap.
pub fn basemap_layer(
    config: &BasemapConfig,
    ctx: &ProviderContext,
    registry: &ProviderRegistry,
) -> RenderableLayer {
    if let Some(layer) = registry.create_layer(&config.as_layer_config(), ctx) {
        return layer;
    }
    warn!(
        basemap = %config.name,
        raw_type = %config.layer_type,
        "basemap could not be created, falling back to OpenStreetMap"
    );
    let fallback = BasemapConfig::osm().as_layer_config();
    let source = TileSource {
        template: TileUrlTemplate::Osm,
        grid: web_mercator_matrix_set(),
        proxy: None,
    };
    RenderableLayer::from_config(&fallback, LayerType::Osm, LayerSource::Tile(source))
}
