//! ArcGIS REST providers: MapServer export layers and Feature Server
//! vector queries.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use map_common::tile::web_mercator_matrix_set;
use map_common::{CrsCode, LayerConfig, LayerType, MapError, MapResult};

use crate::capabilities::{DiscoveredLayer, ServiceCapabilities};
use crate::context::ProviderContext;
use crate::layer::{
    FeatureQuery, ImageRequestTemplate, ImageSource, LayerSource, RenderableLayer, TileSource,
    TileUrlTemplate, VectorSource,
};
use crate::registry::LayerProvider;
use crate::wms::discovery_error;

/// ArcGIS services speak Esri WKIDs, not EPSG URNs. Web Mercator in
/// particular must be sent as 102100 or older servers reject the request.
fn wkid_for(crs: &CrsCode) -> u32 {
    crs.esri_wkid().unwrap_or(102100)
}

async fn service_json(url: &str, ctx: &ProviderContext) -> MapResult<Value> {
    let sep = if url.contains('?') { '&' } else { '?' };
    let probe = format!("{url}{sep}f=json");
    let response = ctx
        .http()
        .get(&probe)
        .send()
        .await
        .map_err(|e| MapError::Discovery {
            message: discovery_error("ArcGIS", &e),
        })?;
    response
        .json::<Value>()
        .await
        .map_err(|e| MapError::Discovery {
            message: discovery_error("ArcGIS", &e),
        })
}

/// Sub-layer listing shared by MapServer and FeatureServer service roots.
fn layers_from_service_json(doc: &Value) -> ServiceCapabilities {
    let layers = doc
        .get("layers")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?.to_string();
                    let id = item.get("id").and_then(Value::as_u64);
                    Some(DiscoveredLayer {
                        name: id.map(|i| i.to_string()).unwrap_or_else(|| name.clone()),
                        title: name,
                        crs: Vec::new(),
                        legend_url: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    ServiceCapabilities {
        service_title: doc
            .get("mapName")
            .or_else(|| doc.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        layers,
        formats: Vec::new(),
        matrix_sets: Vec::new(),
    }
}

pub struct ArcGisRestProvider;

#[async_trait]
impl LayerProvider for ArcGisRestProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::ArcGisRest
    }

    fn display_name(&self) -> &'static str {
        "ArcGIS REST"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let base = config.url.as_deref()?.trim_end_matches('/').to_string();
        let wkid = wkid_for(&config.projection());
        // MapServer expects a "show:0,1" visibility filter in LAYERS.
        let layers_filter = config.sub_resource().map(|sel| {
            if sel.starts_with("show:") || sel.starts_with("hide:") {
                sel.to_string()
            } else {
                format!("show:{sel}")
            }
        });
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        let source = if config.tiled() {
            LayerSource::Tile(TileSource {
                template: TileUrlTemplate::ArcGisExport {
                    base,
                    wkid,
                    layers_filter,
                },
                grid: web_mercator_matrix_set(),
                proxy,
            })
        } else {
            LayerSource::Image(ImageSource {
                template: ImageRequestTemplate::ArcGisExport {
                    base,
                    wkid,
                    layers_filter,
                },
                proxy,
            })
        };
        Some(RenderableLayer::from_config(
            config,
            LayerType::ArcGisRest,
            source,
        ))
    }

    async fn capabilities(
        &self,
        url: &str,
        ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        let doc = service_json(url, ctx).await?;
        Ok(layers_from_service_json(&doc))
    }
}

/// Whether the URL already addresses a numbered sub-layer
/// (`.../FeatureServer/2`).
fn has_layer_index(url: &str) -> bool {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .is_some_and(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
}

pub struct ArcGisFeatureServerProvider;

#[async_trait]
impl LayerProvider for ArcGisFeatureServerProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::ArcGisFeatureServer
    }

    fn display_name(&self) -> &'static str {
        "ArcGIS Feature Server"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let raw = config.url.as_deref()?.trim_end_matches('/');
        let base = if has_layer_index(raw) {
            raw.to_string()
        } else {
            warn!(
                layer = %config.name,
                "feature server URL has no layer index, defaulting to /0"
            );
            format!("{raw}/0")
        };
        let wkid = wkid_for(&config.projection());
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        let query = FeatureQuery::ArcGis { base, wkid };
        Some(RenderableLayer::from_config(
            config,
            LayerType::ArcGisFeatureServer,
            LayerSource::Vector(VectorSource::new(query, proxy)),
        ))
    }

    async fn capabilities(
        &self,
        url: &str,
        ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        let doc = service_json(url, ctx).await?;
        Ok(layers_from_service_json(&doc))
    }
}
