//! Plain vector layers: inline GeoJSON carried in the config, or a one-shot
//! GeoJSON document fetch.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use map_common::{Feature, FeatureCollection, LayerConfig, LayerType};

use crate::context::ProviderContext;
use crate::layer::{FeatureQuery, LayerSource, RenderableLayer, VectorSource};
use crate::registry::LayerProvider;

/// Parse `params.data`, which is either an embedded GeoJSON object or a
/// JSON string holding one. Malformed data degrades to an empty layer.
fn inline_features(layer_name: &str, data: &Value) -> Vec<Feature> {
    let parsed: Result<FeatureCollection, _> = match data {
        Value::String(s) => serde_json::from_str(s),
        other => serde_json::from_value(other.clone()),
    };
    match parsed {
        Ok(collection) => collection.features,
        Err(err) => {
            warn!(layer = %layer_name, %err, "inline GeoJSON is malformed, layer will be empty");
            Vec::new()
        }
    }
}

pub struct VectorProvider;

#[async_trait]
impl LayerProvider for VectorProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Vector
    }

    fn display_name(&self) -> &'static str {
        "Vector"
    }

    fn create(&self, config: &LayerConfig, ctx: &ProviderContext) -> Option<RenderableLayer> {
        let source = if let Some(data) = config.params.get("data") {
            VectorSource::inline(inline_features(&config.name, data))
        } else if let Some(url) = config.url.as_deref() {
            let proxy = config.use_proxy().then(|| ctx.proxy_base()).flatten();
            VectorSource::new(
                FeatureQuery::Static {
                    url: url.to_string(),
                },
                proxy,
            )
        } else {
            // A drawing layer: starts empty, gains features through editing.
            VectorSource::inline(Vec::new())
        };
        Some(RenderableLayer::from_config(
            config,
            LayerType::Vector,
            LayerSource::Vector(source),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ProviderContext {
        ProviderContext::new(None).unwrap()
    }

    fn collection() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [10.0, 20.0] },
                "properties": { "name": "depot" },
            }],
        })
    }

    #[test]
    fn inline_object_data_is_parsed() {
        let config =
            LayerConfig::new("points", LayerType::Vector).with_param("data", collection());
        let layer = VectorProvider.create(&config, &ctx()).unwrap();
        let source = layer.vector_source().unwrap();
        assert!(source.loaded);
        assert_eq!(source.features.len(), 1);
    }

    #[test]
    fn inline_string_data_is_parsed() {
        let config = LayerConfig::new("points", LayerType::Vector)
            .with_param("data", collection().to_string());
        let layer = VectorProvider.create(&config, &ctx()).unwrap();
        assert_eq!(layer.vector_source().unwrap().features.len(), 1);
    }

    #[test]
    fn malformed_inline_data_degrades_to_empty_layer() {
        let config =
            LayerConfig::new("points", LayerType::Vector).with_param("data", "{not geojson");
        let layer = VectorProvider.create(&config, &ctx()).unwrap();
        let source = layer.vector_source().unwrap();
        assert!(source.loaded);
        assert!(source.features.is_empty());
    }

    #[test]
    fn bare_config_is_a_drawing_layer() {
        let config = LayerConfig::new("sketch", LayerType::Vector);
        let layer = VectorProvider.create(&config, &ctx()).unwrap();
        assert!(layer.vector_source().unwrap().loaded);
    }
}
