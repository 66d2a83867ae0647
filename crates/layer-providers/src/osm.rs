//! OpenStreetMap and generic XYZ tile providers.

use async_trait::async_trait;

use map_common::tile::web_mercator_matrix_set;
use map_common::{LayerConfig, LayerType};

use crate::context::ProviderContext;
use crate::layer::{LayerSource, RenderableLayer, TileSource, TileUrlTemplate};
use crate::registry::LayerProvider;

pub struct OsmProvider;

#[async_trait]
impl LayerProvider for OsmProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Osm
    }

    fn display_name(&self) -> &'static str {
        "OpenStreetMap"
    }

    fn create(&self, config: &LayerConfig, _ctx: &ProviderContext) -> Option<RenderableLayer> {
        let source = TileSource {
            template: TileUrlTemplate::Osm,
            grid: web_mercator_matrix_set(),
            proxy: None,
        };
        Some(RenderableLayer::from_config(
            config,
            LayerType::Osm,
            LayerSource::Tile(source),
        ))
    }
}

/// Slippy-map tiles from an arbitrary `{z}/{x}/{y}` URL template.
pub struct XyzProvider;

#[async_trait]
impl LayerProvider for XyzProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Xyz
    }

    fn display_name(&self) -> &'static str {
        "XYZ tiles"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let url = config.url.as_deref()?;
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        let source = TileSource {
            template: TileUrlTemplate::Xyz {
                url: url.to_string(),
            },
            grid: web_mercator_matrix_set(),
            proxy,
        };
        Some(RenderableLayer::from_config(
            config,
            LayerType::Xyz,
            LayerSource::Tile(source),
        ))
    }
}
