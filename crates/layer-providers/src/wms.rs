//! WMS provider: tiled or single-image GetMap, with GetCapabilities
//! discovery.

use async_trait::async_trait;

use map_common::tile::web_mercator_matrix_set;
use map_common::{LayerConfig, LayerType, MapError, MapResult};

use crate::capabilities::{self, ServiceCapabilities};
use crate::context::ProviderContext;
use crate::layer::{
    ImageRequestTemplate, ImageSource, LayerSource, RenderableLayer, TileSource, TileUrlTemplate,
    WmsRequest,
};
use crate::registry::LayerProvider;

fn capabilities_url(base: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}SERVICE=WMS&REQUEST=GetCapabilities")
}

pub struct WmsProvider;

impl WmsProvider {
    fn request_for(config: &LayerConfig) -> Option<WmsRequest> {
        let base = config.url.as_deref()?;
        // An empty LAYERS selection is valid: the service decides what to
        // render until the layer is configured.
        let layers = config.sub_resource().unwrap_or_default().to_string();
        Some(WmsRequest {
            base: base.to_string(),
            layers,
            srs: config.projection(),
            format: config
                .param_str("format")
                .unwrap_or("image/png")
                .to_string(),
            transparent: config.param_bool("transparent").unwrap_or(true),
            tiled_hint: config.tiled(),
        })
    }
}

#[async_trait]
impl LayerProvider for WmsProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Wms
    }

    fn display_name(&self) -> &'static str {
        "WMS"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let request = Self::request_for(config)?;
        let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
        let source = if config.tiled() {
            LayerSource::Tile(TileSource {
                template: TileUrlTemplate::Wms(request),
                grid: web_mercator_matrix_set(),
                proxy,
            })
        } else {
            LayerSource::Image(ImageSource {
                template: ImageRequestTemplate::Wms(request),
                proxy,
            })
        };
        Some(RenderableLayer::from_config(config, LayerType::Wms, source))
    }

    async fn capabilities(
        &self,
        url: &str,
        ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        let caps_url = capabilities_url(url);
        let response = ctx
            .http()
            .get(&caps_url)
            .send()
            .await
            .map_err(|e| MapError::Discovery {
                message: discovery_error("WMS", &e),
            })?;
        let body = response.text().await.map_err(|e| MapError::Discovery {
            message: discovery_error("WMS", &e),
        })?;
        capabilities::parse_wms_capabilities(&body)
    }
}

/// Shape a fetch failure into the message shown in the discovery dialog.
/// Timeouts and opaque connection failures usually mean the service blocks
/// cross-origin requests, so the hint names the proxy.
pub(crate) fn discovery_error(protocol: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("{protocol} capabilities request timed out; the service may require the backend proxy")
    } else if err.is_connect() {
        format!("could not reach the {protocol} service; check the URL or enable the backend proxy")
    } else {
        format!("{protocol} capabilities request failed: {err}")
    }
}
