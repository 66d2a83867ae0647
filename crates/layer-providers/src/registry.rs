//! Provider registry.
//!
//! Layer creation dispatches over the closed [`LayerType`] enum to a set of
//! trait objects registered at startup. A config whose type string does not
//! normalize to a known variant, or whose provider declines it, produces a
//! warning and `None` so the rest of the map still loads.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use map_common::{LayerConfig, LayerType, MapError, MapResult};

use crate::capabilities::ServiceCapabilities;
use crate::context::ProviderContext;
use crate::layer::RenderableLayer;
use crate::{arcgis, ogcapi, osm, vector, wfs, wms, wmts};

#[async_trait]
pub trait LayerProvider: Send + Sync {
    fn layer_type(&self) -> LayerType;

    fn display_name(&self) -> &'static str;

    /// Build the live layer for a stored config. `None` means the config is
    /// unusable for this provider (the caller logs and skips it).
    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer>;

    /// Probe the remote service and list what it offers. Providers without a
    /// discovery protocol keep the default.
    async fn capabilities(
        &self,
        _url: &str,
        _ctx: &ProviderContext,
    ) -> MapResult<ServiceCapabilities> {
        Err(MapError::Discovery {
            message: format!("{} sources do not support discovery", self.display_name()),
        })
    }
}

pub struct ProviderRegistry {
    providers: HashMap<LayerType, Box<dyn LayerProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with every built-in provider installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(osm::OsmProvider));
        registry.register(Box::new(osm::XyzProvider));
        registry.register(Box::new(wms::WmsProvider));
        registry.register(Box::new(wmts::WmtsProvider));
        registry.register(Box::new(wfs::WfsProvider));
        registry.register(Box::new(wfs::WfsTransactionalProvider));
        registry.register(Box::new(arcgis::ArcGisRestProvider));
        registry.register(Box::new(arcgis::ArcGisFeatureServerProvider));
        registry.register(Box::new(ogcapi::OgcApiFeaturesProvider));
        registry.register(Box::new(ogcapi::GeoServerRestProvider));
        registry.register(Box::new(vector::VectorProvider));
        registry
    }

    pub fn register(&mut self, provider: Box<dyn LayerProvider>) {
        self.providers.insert(provider.layer_type(), provider);
    }

    pub fn get(&self, kind: LayerType) -> Option<&dyn LayerProvider> {
        self.providers.get(&kind).map(|p| p.as_ref())
    }

    pub fn supported_types(&self) -> Vec<LayerType> {
        let mut types: Vec<_> = self.providers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Resolve a config to a live layer. Unknown types and provider refusals
    /// are logged and skipped, never fatal.
    pub fn create_layer(
        &self,
        config: &LayerConfig,
        ctx: &ProviderContext,
    ) -> Option<RenderableLayer> {
        let Some(kind) = config.kind() else {
            warn!(layer = %config.name, raw_type = %config.layer_type, "unknown layer type, skipping");
            return None;
        };
        let Some(provider) = self.get(kind) else {
            warn!(layer = %config.name, kind = %kind.as_str(), "no provider registered, skipping");
            return None;
        };
        let layer = provider.create(config, ctx);
        if layer.is_none() {
            warn!(
                layer = %config.name,
                kind = %kind.as_str(),
                "provider rejected layer config, skipping"
            );
        }
        layer
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProviderContext {
        ProviderContext::new(None).unwrap()
    }

    #[test]
    fn defaults_cover_every_layer_type() {
        let registry = ProviderRegistry::with_defaults();
        for kind in [
            LayerType::Osm,
            LayerType::Xyz,
            LayerType::Wms,
            LayerType::Wmts,
            LayerType::Wfs,
            LayerType::WfsT,
            LayerType::ArcGisRest,
            LayerType::ArcGisFeatureServer,
            LayerType::OgcApiFeatures,
            LayerType::GeoServerRest,
            LayerType::Vector,
        ] {
            assert!(registry.get(kind).is_some(), "missing provider for {kind:?}");
        }
    }

    #[test]
    fn unknown_type_is_skipped_not_fatal() {
        let registry = ProviderRegistry::with_defaults();
        let config = LayerConfig::new_raw("mystery", "quantum_tiles");
        assert!(registry.create_layer(&config, &ctx()).is_none());
    }

    #[test]
    fn config_without_required_url_is_skipped() {
        let registry = ProviderRegistry::with_defaults();
        let config = LayerConfig::new_raw("no-url-wms", "wms");
        assert!(registry.create_layer(&config, &ctx()).is_none());
    }

    #[test]
    fn type_aliases_reach_the_same_provider() {
        let registry = ProviderRegistry::with_defaults();
        for raw in ["arcgis", "arcgis_rest", "ArcGIS-REST"] {
            let config = LayerConfig::new_raw("roads", raw)
                .with_url("https://arcgis.example.com/rest/services/Roads/MapServer");
            let layer = registry.create_layer(&config, &ctx());
            assert!(layer.is_some(), "alias {raw} not accepted");
            assert_eq!(layer.unwrap().kind, LayerType::ArcGisRest);
        }
    }
}
