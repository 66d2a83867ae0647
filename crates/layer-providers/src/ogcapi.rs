//! OGC API Features and GeoServer REST providers.
//!
//! Both are thin conveniences over primitives other providers already use:
//! OGC API collections load through paged GeoJSON item listings, and
//! GeoServer REST layers render through the instance's WMS endpoint while
//! discovery walks the REST catalog.

use async_trait::async_trait;
use serde_json::Value;

use map_common::tile::web_mercator_matrix_set;
use map_common::{LayerConfig, LayerType, MapError, MapResult};

use crate::capabilities::{DiscoveredLayer, ServiceCapabilities};
use crate::context::ProviderContext;
use crate::layer::{
    FeatureQuery, LayerSource, RenderableLayer, TileSource, TileUrlTemplate, VectorSource,
    WmsRequest,
};
use crate::registry::LayerProvider;
use crate::wms::discovery_error;

async fn fetch_json(url: &str, ctx: &ProviderContext, protocol: &str) -> MapResult<Value> {
    let response = ctx
        .http()
        .get(url)
        .send()
        .await
        .map_err(|e| MapError::Discovery {
            message: discovery_error(protocol, &e),
        })?;
    response
        .json::<Value>()
        .await
        .map_err(|e| MapError::Discovery {
            message: discovery_error(protocol, &e),
        })
}

pub struct OgcApiFeaturesProvider;

#[async_trait]
impl LayerProvider for OgcApiFeaturesProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::OgcApiFeatures
    }

    fn display_name(&self) -> &'static str {
        "OGC API Features"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let base = config.url.as_deref()?.trim_end_matches('/').to_string();
        let collection = config
            .param_str("collection")
            .or_else(|| config.sub_resource())
            .unwrap_or_default()
            .to_string();
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        let query = FeatureQuery::OgcApiItems { base, collection };
        Some(RenderableLayer::from_config(
            config,
            LayerType::OgcApiFeatures,
            LayerSource::Vector(VectorSource::new(query, proxy)),
        ))
    }

    async fn capabilities(
        &self,
        url: &str,
        ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        let base = url.trim_end_matches('/');
        let doc = fetch_json(&format!("{base}/collections?f=json"), ctx, "OGC API").await?;
        let layers = doc
            .get("collections")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let id = item.get("id")?.as_str()?.to_string();
                        Some(DiscoveredLayer {
                            title: item
                                .get("title")
                                .and_then(Value::as_str)
                                .unwrap_or(&id)
                                .to_string(),
                            name: id,
                            crs: Vec::new(),
                            legend_url: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ServiceCapabilities {
            service_title: doc
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            layers,
            formats: vec!["application/geo+json".to_string()],
            matrix_sets: Vec::new(),
        })
    }
}

pub struct GeoServerRestProvider;

#[async_trait]
impl LayerProvider for GeoServerRestProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::GeoServerRest
    }

    fn display_name(&self) -> &'static str {
        "GeoServer REST"
    }

    /// Renders through the instance's WMS endpoint; the REST catalog is only
    /// used for discovery.
    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let root = config.url.as_deref()?.trim_end_matches('/');
        let base = if root.ends_with("/wms") {
            root.to_string()
        } else {
            format!("{root}/wms")
        };
        let request = WmsRequest {
            base,
            layers: config.sub_resource().unwrap_or_default().to_string(),
            srs: config.projection(),
            format: "image/png".to_string(),
            transparent: true,
            tiled_hint: true,
        };
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        Some(RenderableLayer::from_config(
            config,
            LayerType::GeoServerRest,
            LayerSource::Tile(TileSource {
                template: TileUrlTemplate::Wms(request),
                grid: web_mercator_matrix_set(),
                proxy,
            }),
        ))
    }

    async fn capabilities(
        &self,
        url: &str,
        ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        let root = url.trim_end_matches('/');
        let doc = fetch_json(&format!("{root}/rest/layers.json"), ctx, "GeoServer").await?;
        let layers = doc
            .pointer("/layers/layer")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let name = item.get("name")?.as_str()?.to_string();
                        Some(DiscoveredLayer {
                            title: name.clone(),
                            name,
                            crs: Vec::new(),
                            legend_url: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ServiceCapabilities {
            service_title: None,
            layers,
            formats: Vec::new(),
            matrix_sets: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_common::BoundingBox;

    fn ctx() -> ProviderContext {
        ProviderContext::new(None).unwrap()
    }

    #[test]
    fn collection_items_query() {
        let config = LayerConfig::new("buildings", LayerType::OgcApiFeatures)
            .with_url("https://api.example.com/ogc/")
            .with_param("collection", "buildings");
        let layer = OgcApiFeaturesProvider.create(&config, &ctx()).unwrap();
        let url = layer
            .vector_source()
            .unwrap()
            .request_url(&BoundingBox::new(5.0, 45.0, 6.0, 46.0))
            .unwrap();
        assert!(url.starts_with("https://api.example.com/ogc/collections/buildings/items?"));
    }

    #[test]
    fn unconfigured_collection_never_fetches() {
        let config = LayerConfig::new("buildings", LayerType::OgcApiFeatures)
            .with_url("https://api.example.com/ogc");
        let layer = OgcApiFeaturesProvider.create(&config, &ctx()).unwrap();
        assert!(layer
            .vector_source()
            .unwrap()
            .request_url(&BoundingBox::new(0.0, 0.0, 1.0, 1.0))
            .is_none());
    }

    #[test]
    fn geoserver_layers_render_through_wms() {
        let config = LayerConfig::new("parcels", LayerType::GeoServerRest)
            .with_url("https://geo.example.com/geoserver")
            .with_param("layers", "cadastre:parcels");
        let layer = GeoServerRestProvider.create(&config, &ctx()).unwrap();
        let LayerSource::Tile(source) = &layer.source else {
            panic!("expected tile source");
        };
        let url = source
            .tile_url(map_common::TileCoord { z: 0, x: 0, y: 0 })
            .unwrap();
        assert!(url.starts_with("https://geo.example.com/geoserver/wms?"));
        assert!(url.contains("LAYERS=cadastre%3Aparcels"));
    }
}
