//! Click identify: concurrent fan-out over every interrogable layer,
//! aggregation after all queries settle, popup HTML rendering.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use layer_providers::RenderableLayer;
use map_common::{Feature, FeatureCollection};

/// Pixel tolerance for vector hit-testing, scaled by map resolution.
const HIT_TOLERANCE_PX: f64 = 5.0;

/// Property keys that carry geometry payloads rather than attributes.
const GEOMETRY_KEYS: [&str; 5] = ["geometry", "geom", "the_geom", "shape", "boundedby"];

#[derive(Debug, Clone)]
pub struct IdentifyResult {
    pub layer_name: String,
    pub identify_fields: Vec<String>,
    pub features: Vec<Feature>,
}

async fn query_feature_info(
    http: reqwest::Client,
    layer_name: String,
    identify_fields: Vec<String>,
    url: String,
) -> Option<IdentifyResult> {
    let response = match http.get(&url).send().await {
        Ok(r) => r,
        Err(err) => {
            debug!(layer = %layer_name, %err, "feature info request failed, excluding layer");
            return None;
        }
    };
    let collection = match response.json::<FeatureCollection>().await {
        Ok(c) => c,
        Err(err) => {
            debug!(layer = %layer_name, %err, "feature info response unreadable, excluding layer");
            return None;
        }
    };
    Some(IdentifyResult {
        layer_name,
        identify_fields,
        features: collection.features,
    })
}

fn hit_test_vector(
    layer: &RenderableLayer,
    coordinate: [f64; 2],
    tolerance: f64,
) -> Option<IdentifyResult> {
    let source = layer.vector_source()?;
    let features: Vec<Feature> = source
        .features
        .iter()
        .filter(|f| f.hit_test(coordinate[0], coordinate[1], tolerance))
        .cloned()
        .collect();
    Some(IdentifyResult {
        layer_name: layer.name.clone(),
        identify_fields: layer.identify_fields.clone(),
        features,
    })
}

/// Run all per-layer futures to completion and keep the layers that
/// answered with at least one feature. Failures have already been mapped
/// to `None` and are dropped silently.
pub async fn settle(
    tasks: Vec<BoxFuture<'static, Option<IdentifyResult>>>,
) -> Vec<IdentifyResult> {
    join_all(tasks)
        .await
        .into_iter()
        .flatten()
        .filter(|r| !r.features.is_empty())
        .collect()
}

/// Fan out an identify click over every visible layer. Tile/image layers
/// with a feature-info endpoint are queried remotely; vector layers are
/// hit-tested locally. The result arrives only after the slowest layer
/// answers.
pub async fn run_identify(
    http: &reqwest::Client,
    layers: &[RenderableLayer],
    coordinate: [f64; 2],
    resolution: f64,
) -> Vec<IdentifyResult> {
    let tolerance = resolution * HIT_TOLERANCE_PX;
    let mut tasks: Vec<BoxFuture<'static, Option<IdentifyResult>>> = Vec::new();
    for layer in layers.iter().filter(|l| l.visible) {
        if let Some(url) = layer.feature_info_url(coordinate, resolution) {
            tasks.push(
                query_feature_info(
                    http.clone(),
                    layer.name.clone(),
                    layer.identify_fields.clone(),
                    url,
                )
                .boxed(),
            );
        } else if layer.vector_source().is_some() {
            let hit = hit_test_vector(layer, coordinate, tolerance);
            tasks.push(async move { hit }.boxed());
        }
    }
    settle(tasks).await
}

pub(crate) fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn is_geometry_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    GEOMETRY_KEYS.contains(&lower.as_str())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rows to show for one feature: the layer's allowlist when configured,
/// otherwise the first three non-geometry properties.
fn feature_rows<'a>(feature: &'a Feature, allowlist: &'a [String]) -> Vec<(&'a str, String)> {
    if !allowlist.is_empty() {
        return allowlist
            .iter()
            .filter_map(|key| {
                feature
                    .properties
                    .get(key)
                    .map(|v| (key.as_str(), display_value(v)))
            })
            .collect();
    }
    feature
        .properties
        .iter()
        .filter(|(key, _)| !is_geometry_key(key))
        .take(3)
        .map(|(key, value)| (key.as_str(), display_value(value)))
        .collect()
}

/// Render the aggregated identify results as the popup body.
pub fn popup_html(results: &[IdentifyResult]) -> String {
    if results.is_empty() {
        return r#"<div class="identify-popup identify-empty">No features found</div>"#.to_string();
    }
    let mut html = String::from(r#"<div class="identify-popup">"#);
    for result in results {
        html.push_str(&format!(
            r#"<div class="identify-layer"><h4>{}</h4>"#,
            escape_html(&result.layer_name)
        ));
        for feature in &result.features {
            html.push_str(r#"<table class="identify-feature">"#);
            for (key, value) in feature_rows(feature, &result.identify_fields) {
                html.push_str(&format!(
                    "<tr><th>{}</th><td>{}</td></tr>",
                    escape_html(key),
                    escape_html(&value)
                ));
            }
            html.push_str("</table>");
        }
        html.push_str("</div>");
    }
    html.push_str("</div>");
    html
}

/// Flatten the per-layer results into one portable collection for the
/// "features selected" event.
pub fn collect_features(results: &[IdentifyResult]) -> FeatureCollection {
    FeatureCollection::from_features(
        results
            .iter()
            .flat_map(|r| r.features.iter().cloned())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_common::Geometry;
    use std::time::Duration;

    fn result(layer: &str, count: usize) -> IdentifyResult {
        IdentifyResult {
            layer_name: layer.to_string(),
            identify_fields: Vec::new(),
            features: (0..count).map(|i| Feature::point(i as f64, 0.0)).collect(),
        }
    }

    #[tokio::test]
    async fn aggregation_waits_for_the_slowest_layer() {
        let fast = async { Some(result("fast", 1)) }.boxed();
        let slow = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(result("slow", 2))
        }
        .boxed();
        let results = settle(vec![fast, slow]).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.layer_name == "slow"));
    }

    #[tokio::test]
    async fn failed_and_empty_layers_are_dropped() {
        let failed = async { None }.boxed();
        let empty = async { Some(result("empty", 0)) }.boxed();
        let hit = async { Some(result("hit", 1)) }.boxed();
        let results = settle(vec![failed, empty, hit]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].layer_name, "hit");
    }

    #[test]
    fn allowlist_controls_popup_rows() {
        let feature = Feature::new(Geometry::point(0.0, 0.0))
            .with_property("name", "Depot")
            .with_property("secret", "classified")
            .with_property("the_geom", "POINT(0 0)");
        let allowed = IdentifyResult {
            layer_name: "assets".to_string(),
            identify_fields: vec!["name".to_string()],
            features: vec![feature.clone()],
        };
        let html = popup_html(&[allowed]);
        assert!(html.contains("Depot"));
        assert!(!html.contains("classified"));
    }

    #[test]
    fn fallback_rows_skip_geometry_and_cap_at_three() {
        let feature = Feature::new(Geometry::point(0.0, 0.0))
            .with_property("the_geom", "POINT(0 0)")
            .with_property("a", "1")
            .with_property("b", "2")
            .with_property("c", "3")
            .with_property("d", "4");
        let rows = feature_rows(&feature, &[]);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(k, _)| *k != "the_geom"));
    }

    #[test]
    fn popup_escapes_html() {
        let feature =
            Feature::new(Geometry::point(0.0, 0.0)).with_property("name", "<script>x</script>");
        let html = popup_html(&[IdentifyResult {
            layer_name: "layer".to_string(),
            identify_fields: Vec::new(),
            features: vec![feature],
        }]);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn empty_results_render_a_notice() {
        assert!(popup_html(&[]).contains("No features found"));
    }
}
