//! Declarative style descriptors and their resolution into paint state.
//!
//! Layer records may carry a small JSON style grammar under
//! `params.style`: fill, stroke, point-circle and text-label blocks, each
//! independently optional. The descriptor is resolved once per layer into
//! a [`ResolvedStyle`]; when a label binds to a feature attribute the
//! label text is re-evaluated per feature, otherwise resolution is fully
//! static.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::feature::Feature;

pub const DEFAULT_STROKE_COLOR: &str = "#3399CC";
pub const DEFAULT_FILL_COLOR: &str = "rgba(255, 255, 255, 0.4)";
const DEFAULT_STROKE_WIDTH: f64 = 1.25;
const DEFAULT_CIRCLE_RADIUS: f64 = 5.0;
const DEFAULT_LABEL_FONT: &str = "13px Calibri,sans-serif";
const DEFAULT_LABEL_COLOR: &str = "#000";
const DEFAULT_HALO_COLOR: &str = "#fff";
const DEFAULT_HALO_WIDTH: f64 = 3.0;

/// The declarative style grammar.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StyleDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillStyle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<StrokeStyle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circle: Option<CircleStyle>,

    /// Legacy shorthand for `circle.radius`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelStyle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillStyle {
    pub color: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrokeStyle {
    #[serde(default)]
    pub color: Option<String>,

    #[serde(default)]
    pub width: Option<f64>,

    #[serde(default, alias = "lineDash")]
    pub dash: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CircleStyle {
    #[serde(default)]
    pub radius: Option<f64>,

    #[serde(default)]
    pub fill: Option<FillStyle>,

    #[serde(default)]
    pub stroke: Option<StrokeStyle>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelStyle {
    /// Feature attribute to bind the label text to (dynamic).
    #[serde(default)]
    pub field: Option<String>,

    /// Static label text; rarely used, `field` takes precedence.
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub font: Option<String>,

    #[serde(default)]
    pub color: Option<String>,

    #[serde(default, alias = "haloColor")]
    pub halo_color: Option<String>,

    #[serde(default, alias = "haloWidth")]
    pub halo_width: Option<f64>,
}

/// Renderer-ready paint state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paint {
    pub fill: Option<FillPaint>,
    pub stroke: Option<StrokePaint>,
    pub circle: Option<CirclePaint>,
    pub text: Option<TextPaint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillPaint {
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrokePaint {
    pub color: String,
    pub width: f64,
    pub dash: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CirclePaint {
    pub radius: f64,
    pub fill: FillPaint,
    pub stroke: StrokePaint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPaint {
    pub text: String,
    pub font: String,
    pub color: String,
    pub halo_color: String,
    pub halo_width: f64,
}

/// A resolved style: either fully static, or re-evaluated per feature for
/// attribute-bound labels.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedStyle {
    Static(Paint),
    PerFeatureLabel {
        base: Paint,
        field: String,
        font: String,
        color: String,
        halo_color: String,
        halo_width: f64,
    },
}

impl Default for ResolvedStyle {
    fn default() -> Self {
        ResolvedStyle::Static(default_paint())
    }
}

impl ResolvedStyle {
    /// The paint for a concrete feature. Static styles ignore the feature;
    /// dynamic styles bind the label text from the configured attribute.
    pub fn paint_for(&self, feature: &Feature) -> Paint {
        match self {
            ResolvedStyle::Static(paint) => paint.clone(),
            ResolvedStyle::PerFeatureLabel {
                base,
                field,
                font,
                color,
                halo_color,
                halo_width,
            } => {
                let mut paint = base.clone();
                if let Some(value) = feature.properties.get(field) {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if !text.is_empty() && text != "null" {
                        paint.text = Some(TextPaint {
                            text,
                            font: font.clone(),
                            color: color.clone(),
                            halo_color: halo_color.clone(),
                            halo_width: *halo_width,
                        });
                    }
                }
                paint
            }
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ResolvedStyle::PerFeatureLabel { .. })
    }
}

/// The paint used when no descriptor is configured or parsing fails.
pub fn default_paint() -> Paint {
    Paint {
        fill: Some(FillPaint {
            color: DEFAULT_FILL_COLOR.to_string(),
        }),
        stroke: Some(StrokePaint {
            color: DEFAULT_STROKE_COLOR.to_string(),
            width: DEFAULT_STROKE_WIDTH,
            dash: None,
        }),
        circle: Some(CirclePaint {
            radius: DEFAULT_CIRCLE_RADIUS,
            fill: FillPaint {
                color: DEFAULT_STROKE_COLOR.to_string(),
            },
            stroke: StrokePaint {
                color: "#fff".to_string(),
                width: 1.0,
                dash: None,
            },
        }),
        text: None,
    }
}

/// Resolve a raw `params.style` value (embedded object or JSON string)
/// into a [`ResolvedStyle`]. Malformed input never fails layer creation:
/// it falls back to the default paint with a logged warning.
pub fn resolve_style(raw: Option<&Value>) -> ResolvedStyle {
    let descriptor = match raw {
        None | Some(Value::Null) => return ResolvedStyle::Static(default_paint()),
        Some(Value::String(s)) => match serde_json::from_str::<StyleDescriptor>(s) {
            Ok(d) => d,
            Err(err) => {
                warn!(error = %err, "invalid style JSON, using default styling");
                return ResolvedStyle::Static(default_paint());
            }
        },
        Some(value) => match serde_json::from_value::<StyleDescriptor>(value.clone()) {
            Ok(d) => d,
            Err(err) => {
                warn!(error = %err, "invalid style descriptor, using default styling");
                return ResolvedStyle::Static(default_paint());
            }
        },
    };

    resolve_descriptor(&descriptor)
}

/// Resolve an already-parsed descriptor.
pub fn resolve_descriptor(descriptor: &StyleDescriptor) -> ResolvedStyle {
    let fill = descriptor.fill.as_ref().map(|f| FillPaint {
        color: f.color.clone(),
    });

    let stroke = descriptor.stroke.as_ref().map(|s| StrokePaint {
        color: s
            .color
            .clone()
            .unwrap_or_else(|| DEFAULT_STROKE_COLOR.to_string()),
        width: s.width.unwrap_or(DEFAULT_STROKE_WIDTH),
        dash: s.dash.clone(),
    });

    // Point symbolizer: explicit circle block, or the legacy top-level
    // radius shorthand. Circle fill/stroke fall back to the polygon-level
    // fill/stroke, then to the hardcoded defaults.
    let circle = if descriptor.circle.is_some() || descriptor.radius.is_some() {
        let block = descriptor.circle.clone().unwrap_or_default();
        Some(CirclePaint {
            radius: block
                .radius
                .or(descriptor.radius)
                .unwrap_or(DEFAULT_CIRCLE_RADIUS),
            fill: block
                .fill
                .map(|f| FillPaint { color: f.color })
                .or_else(|| fill.clone())
                .unwrap_or(FillPaint {
                    color: DEFAULT_STROKE_COLOR.to_string(),
                }),
            stroke: block
                .stroke
                .map(|s| StrokePaint {
                    color: s
                        .color
                        .unwrap_or_else(|| DEFAULT_STROKE_COLOR.to_string()),
                    width: s.width.unwrap_or(1.0),
                    dash: s.dash,
                })
                .or_else(|| stroke.clone())
                .unwrap_or(StrokePaint {
                    color: "#fff".to_string(),
                    width: 1.0,
                    dash: None,
                }),
        })
    } else {
        None
    };

    let label = descriptor.label.clone().unwrap_or_default();
    let font = label
        .font
        .clone()
        .unwrap_or_else(|| DEFAULT_LABEL_FONT.to_string());
    let color = label
        .color
        .clone()
        .unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string());
    let halo_color = label
        .halo_color
        .clone()
        .unwrap_or_else(|| DEFAULT_HALO_COLOR.to_string());
    let halo_width = label.halo_width.unwrap_or(DEFAULT_HALO_WIDTH);

    // Static text is baked into the paint; a field binding defers label
    // evaluation to paint time.
    let text = label.text.as_ref().filter(|_| label.field.is_none()).map(|t| TextPaint {
        text: t.clone(),
        font: font.clone(),
        color: color.clone(),
        halo_color: halo_color.clone(),
        halo_width,
    });

    let base = Paint {
        fill,
        stroke,
        circle,
        text,
    };

    match label.field {
        Some(field) if !field.is_empty() => ResolvedStyle::PerFeatureLabel {
            base,
            field,
            font,
            color,
            halo_color,
            halo_width,
        },
        _ => ResolvedStyle::Static(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_resolution() {
        let raw = json!({
            "fill": { "color": "rgba(0, 128, 255, 0.3)" },
            "stroke": { "color": "#004488", "width": 2.0 }
        });

        let style = resolve_style(Some(&raw));
        assert!(!style.is_dynamic());

        let paint = style.paint_for(&Feature::point(0.0, 0.0));
        assert_eq!(paint.fill.unwrap().color, "rgba(0, 128, 255, 0.3)");
        assert_eq!(paint.stroke.unwrap().width, 2.0);
        assert!(paint.circle.is_none());
    }

    #[test]
    fn test_circle_falls_back_to_polygon_colors() {
        let raw = json!({
            "fill": { "color": "#ff0000" },
            "circle": { "radius": 8 }
        });

        let style = resolve_style(Some(&raw));
        let paint = style.paint_for(&Feature::point(0.0, 0.0));
        let circle = paint.circle.unwrap();
        assert_eq!(circle.radius, 8.0);
        assert_eq!(circle.fill.color, "#ff0000");
        // No stroke block anywhere: default white outline
        assert_eq!(circle.stroke.color, "#fff");
    }

    #[test]
    fn test_circle_defaults_without_any_colors() {
        let raw = json!({ "radius": 4 });
        let style = resolve_style(Some(&raw));
        let circle = style.paint_for(&Feature::point(0.0, 0.0)).circle.unwrap();
        assert_eq!(circle.radius, 4.0);
        assert_eq!(circle.fill.color, DEFAULT_STROKE_COLOR);
    }

    #[test]
    fn test_dynamic_label_binding() {
        let raw = json!({
            "stroke": { "color": "#333" },
            "label": { "field": "name", "haloWidth": 2 }
        });

        let style = resolve_style(Some(&raw));
        assert!(style.is_dynamic());

        let named = Feature::point(0.0, 0.0).with_property("name", "Main St");
        let paint = style.paint_for(&named);
        let text = paint.text.unwrap();
        assert_eq!(text.text, "Main St");
        assert_eq!(text.halo_width, 2.0);

        let anonymous = Feature::point(0.0, 0.0);
        assert!(style.paint_for(&anonymous).text.is_none());
    }

    #[test]
    fn test_numeric_label_values_are_formatted() {
        let raw = json!({ "label": { "field": "count" } });
        let style = resolve_style(Some(&raw));
        let feature = Feature::point(0.0, 0.0).with_property("count", 42);
        assert_eq!(style.paint_for(&feature).text.unwrap().text, "42");
    }

    #[test]
    fn test_invalid_json_falls_back_to_default() {
        let raw = Value::String("{invalid json".to_string());
        let style = resolve_style(Some(&raw));
        assert_eq!(style, ResolvedStyle::Static(default_paint()));
    }

    #[test]
    fn test_json_string_form_is_accepted() {
        let raw = Value::String(r##"{"stroke":{"color":"#123456","width":3}}"##.to_string());
        let style = resolve_style(Some(&raw));
        let paint = style.paint_for(&Feature::point(0.0, 0.0));
        assert_eq!(paint.stroke.unwrap().color, "#123456");
    }
}
