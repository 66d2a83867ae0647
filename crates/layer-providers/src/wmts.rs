//! WMTS provider.
//!
//! Tile grid parameters (matrix ids, resolutions, origin) normally come from
//! a prior capabilities probe and are stored in the layer params. When they
//! are missing the provider synthesizes the default Web-Mercator grid so the
//! layer still renders against standard services.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use map_common::tile::{web_mercator_matrix_set, WEB_MERCATOR_EXTENT};
use map_common::{BoundingBox, LayerConfig, LayerType, MapError, MapResult, TileMatrixSet};

use crate::capabilities::{self, ServiceCapabilities};
use crate::context::ProviderContext;
use crate::layer::{LayerSource, RenderableLayer, TileSource, TileUrlTemplate};
use crate::registry::LayerProvider;
use crate::wms::discovery_error;

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    let parsed: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    (!parsed.is_empty()).then_some(parsed)
}

fn f64_array(value: Option<&Value>) -> Option<Vec<f64>> {
    let items = value?.as_array()?;
    let parsed: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
    (parsed.len() == items.len() && !parsed.is_empty()).then_some(parsed)
}

fn grid_from_params(config: &LayerConfig) -> Option<TileMatrixSet> {
    let matrix_ids = string_array(config.params.get("matrixIds"))?;
    let resolutions = f64_array(config.params.get("resolutions"))?;
    if matrix_ids.len() != resolutions.len() {
        warn!(
            layer = %config.name,
            "matrixIds and resolutions length mismatch, using fallback grid"
        );
        return None;
    }
    let origin = config
        .params
        .get("origin")
        .and_then(|v| {
            let arr = v.as_array()?;
            Some((arr.first()?.as_f64()?, arr.get(1)?.as_f64()?))
        })
        .unwrap_or((-WEB_MERCATOR_EXTENT, WEB_MERCATOR_EXTENT));
    // Extent is not part of the stored params; anchor it at the origin and
    // span one tile at the coarsest resolution.
    let span = resolutions[0] * 256.0;
    let extent = BoundingBox::new(origin.0, origin.1 - span, origin.0 + span, origin.1);
    Some(TileMatrixSet::from_parts(
        config
            .param_str("matrixSet")
            .unwrap_or("WebMercatorQuad")
            .to_string(),
        config.projection(),
        origin,
        extent,
        &matrix_ids,
        &resolutions,
    ))
}

pub struct WmtsProvider;

#[async_trait]
impl LayerProvider for WmtsProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Wmts
    }

    fn display_name(&self) -> &'static str {
        "WMTS"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let base = config.url.as_deref()?;
        let layer_name = config.sub_resource().unwrap_or_default().to_string();
        let grid = grid_from_params(config).unwrap_or_else(|| {
            warn!(layer = %config.name, "no matrix set parameters, using fallback grid");
            web_mercator_matrix_set()
        });
        let template = TileUrlTemplate::Wmts {
            base: base.to_string(),
            layer: layer_name,
            style: config.param_str("style").unwrap_or("default").to_string(),
            format: config
                .param_str("format")
                .unwrap_or("image/png")
                .to_string(),
            matrix_set: grid.identifier.clone(),
        };
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        let source = TileSource {
            template,
            grid,
            proxy,
        };
        Some(RenderableLayer::from_config(
            config,
            LayerType::Wmts,
            LayerSource::Tile(source),
        ))
    }

    async fn capabilities(
        &self,
        url: &str,
        ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        let sep = if url.contains('?') { '&' } else { '?' };
        let caps_url = format!("{url}{sep}SERVICE=WMTS&REQUEST=GetCapabilities");
        let body = ctx
            .http()
            .get(&caps_url)
            .send()
            .await
            .map_err(|e| MapError::Discovery {
                message: discovery_error("WMTS", &e),
            })?
            .text()
            .await
            .map_err(|e| MapError::Discovery {
                message: discovery_error("WMTS", &e),
            })?;
        capabilities::parse_wmts_capabilities(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_common::tile::FALLBACK_LEVELS;
    use map_common::TileCoord;
    use serde_json::json;

    fn ctx() -> ProviderContext {
        ProviderContext::new(None).unwrap()
    }

    #[test]
    fn missing_matrix_params_fall_back_to_default_grid() {
        let config = LayerConfig::new("ortho", LayerType::Wmts)
            .with_url("https://wmts.example.com/service")
            .with_param("layer", "ortho_2024");
        let layer = WmtsProvider.create(&config, &ctx()).unwrap();
        let LayerSource::Tile(source) = &layer.source else {
            panic!("expected tile source");
        };
        assert_eq!(source.grid.matrices.len(), FALLBACK_LEVELS as usize);
        for pair in source.grid.resolutions().windows(2) {
            assert!((pair[0] / pair[1] - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn explicit_matrix_params_build_the_grid() {
        let config = LayerConfig::new("ortho", LayerType::Wmts)
            .with_url("https://wmts.example.com/service")
            .with_param("layer", "ortho_2024")
            .with_param("matrixSet", "EPSG2056")
            .with_param("matrixIds", json!(["0", "1", "2"]))
            .with_param("resolutions", json!([4000.0, 2000.0, 1000.0]))
            .with_param("origin", json!([2420000.0, 1350000.0]));
        let layer = WmtsProvider.create(&config, &ctx()).unwrap();
        let LayerSource::Tile(source) = &layer.source else {
            panic!("expected tile source");
        };
        assert_eq!(source.grid.matrix_ids(), vec!["0", "1", "2"]);
        let url = source.tile_url(TileCoord { z: 1, x: 2, y: 3 }).unwrap();
        assert!(url.contains("TILEMATRIXSET=EPSG2056"));
        assert!(url.contains("TILEMATRIX=1"));
        assert!(url.contains("TILEROW=3"));
        assert!(url.contains("TILECOL=2"));
    }

    #[test]
    fn mismatched_matrix_lists_fall_back() {
        let config = LayerConfig::new("bad", LayerType::Wmts)
            .with_url("https://wmts.example.com/service")
            .with_param("matrixIds", json!(["0", "1"]))
            .with_param("resolutions", json!([4000.0]));
        let layer = WmtsProvider.create(&config, &ctx()).unwrap();
        let LayerSource::Tile(source) = &layer.source else {
            panic!("expected tile source");
        };
        assert_eq!(source.grid.matrices.len(), FALLBACK_LEVELS as usize);
    }
}
