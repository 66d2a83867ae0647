//! WFS and WFS-T providers.
//!
//! Both load features through extent-restricted GetFeature queries; the
//! transactional variant additionally carries an [`EditTarget`] so the
//! editing subsystem can persist changes back with WFS-T Transactions.

use async_trait::async_trait;

use map_common::{LayerConfig, LayerType};

use crate::context::ProviderContext;
use crate::layer::{EditTarget, FeatureQuery, LayerSource, RenderableLayer, VectorSource};
use crate::registry::LayerProvider;

fn build(config: &LayerConfig, ctx: &ProviderContext, kind: LayerType) -> Option<RenderableLayer> {
    let base = config.url.as_deref()?;
    // An unset type name is the "not yet configured" state: the layer is
    // created but never issues GetFeature requests.
    let type_name = config.sub_resource().unwrap_or_default().to_string();
    let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
    let query = FeatureQuery::Wfs {
        base: base.to_string(),
        type_name: type_name.clone(),
        srs: config.projection(),
    };
    let mut layer = RenderableLayer::from_config(
        config,
        kind,
        LayerSource::Vector(VectorSource::new(query, proxy.clone())),
    );
    if !type_name.is_empty() && (kind == LayerType::WfsT || config.is_editable) {
        layer.edit = Some(EditTarget {
            service_url: base.to_string(),
            type_name,
            srs: config.projection(),
            proxy,
        });
    }
    Some(layer)
}

pub struct WfsProvider;

#[async_trait]
impl LayerProvider for WfsProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Wfs
    }

    fn display_name(&self) -> &'static str {
        "WFS"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        build(config, ctx, LayerType::Wfs)
    }
}

pub struct WfsTransactionalProvider;

#[async_trait]
impl LayerProvider for WfsTransactionalProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::WfsT
    }

    fn display_name(&self) -> &'static str {
        "WFS-T"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        build(config, ctx, LayerType::WfsT)
    }
}
