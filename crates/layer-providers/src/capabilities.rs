//! Service discovery: parsed capability documents.
//!
//! WMS and WMTS capabilities are XML, walked with a streaming event loop;
//! ArcGIS and OGC API listings are JSON and parsed in their providers. The
//! results feed the layer-configuration UI, never the render path, so a
//! parse failure here is an operator-facing error and nothing more.

use quick_xml::events::Event;
use quick_xml::Reader;

use map_common::{MapError, MapResult};

/// Meters per pixel per unit of WMTS scale denominator (OGC standardized
/// 0.28mm pixel).
const METERS_PER_SCALE_UNIT: f64 = 0.00028;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLayer {
    /// Machine name to put in the layer config's sub-resource.
    pub name: String,
    pub title: String,
    pub crs: Vec<String>,
    pub legend_url: Option<String>,
}

/// A WMTS tile matrix set as advertised by capabilities, in the shape the
/// WMTS provider stores into layer params.
#[derive(Debug, Clone, PartialEq)]
pub struct WmtsMatrixData {
    pub identifier: String,
    pub crs: String,
    pub matrix_ids: Vec<String>,
    pub resolutions: Vec<f64>,
    pub origin: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceCapabilities {
    pub service_title: Option<String>,
    pub layers: Vec<DiscoveredLayer>,
    pub formats: Vec<String>,
    /// Populated only by WMTS discovery.
    pub matrix_sets: Vec<WmtsMatrixData>,
}

#[derive(Default)]
struct LayerBuilder {
    name: Option<String>,
    title: Option<String>,
    crs: Vec<String>,
    legend_url: Option<String>,
}

impl LayerBuilder {
    fn finish(self) -> Option<DiscoveredLayer> {
        let name = self.name?;
        Some(DiscoveredLayer {
            title: self.title.unwrap_or_else(|| name.clone()),
            name,
            crs: self.crs,
            legend_url: self.legend_url,
        })
    }
}

fn parse_error(err: quick_xml::Error, position: usize) -> MapError {
    MapError::CapabilitiesParse(format!("XML error at byte {position}: {err}"))
}

/// Parse a WMS 1.1.x/1.3.0 GetCapabilities document. Layers may nest; every
/// `<Layer>` that carries a `<Name>` is reported.
pub fn parse_wms_capabilities(xml: &str) -> MapResult<ServiceCapabilities> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut caps = ServiceCapabilities::default();
    let mut layer_stack: Vec<LayerBuilder> = Vec::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if tag == "Layer" {
                    layer_stack.push(LayerBuilder::default());
                }
                path.push(tag);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"OnlineResource"
                    && path.iter().any(|p| p == "LegendURL")
                {
                    if let Some(layer) = layer_stack.last_mut() {
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref() == b"href" {
                                layer.legend_url =
                                    Some(String::from_utf8_lossy(&attr.value).to_string());
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| parse_error(e, reader.buffer_position()))?
                    .to_string();
                let tag = path.last().map(String::as_str).unwrap_or("");
                let parent = if path.len() >= 2 {
                    path[path.len() - 2].as_str()
                } else {
                    ""
                };
                match (parent, tag) {
                    ("Service", "Title") => caps.service_title = Some(text),
                    ("Layer", "Name") => {
                        if let Some(layer) = layer_stack.last_mut() {
                            layer.name = Some(text);
                        }
                    }
                    ("Layer", "Title") => {
                        if let Some(layer) = layer_stack.last_mut() {
                            layer.title = Some(text);
                        }
                    }
                    ("Layer", "SRS") | ("Layer", "CRS") => {
                        if let Some(layer) = layer_stack.last_mut() {
                            layer.crs.push(text);
                        }
                    }
                    ("GetMap", "Format") => caps.formats.push(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Layer" {
                    if let Some(done) = layer_stack.pop().and_then(LayerBuilder::finish) {
                        caps.layers.push(done);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e, reader.buffer_position())),
            _ => {}
        }
    }

    if caps.layers.is_empty() && caps.service_title.is_none() {
        return Err(MapError::CapabilitiesParse(
            "document contains no WMS capability content".to_string(),
        ));
    }
    Ok(caps)
}

#[derive(Default)]
struct MatrixSetBuilder {
    identifier: Option<String>,
    crs: Option<String>,
    matrix_ids: Vec<String>,
    resolutions: Vec<f64>,
    origin: Option<(f64, f64)>,
}

/// Parse a WMTS GetCapabilities document: the layer listing plus every tile
/// matrix set with its resolutions (derived from scale denominators) and
/// origin.
pub fn parse_wmts_capabilities(xml: &str) -> MapResult<ServiceCapabilities> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut caps = ServiceCapabilities::default();
    let mut path: Vec<String> = Vec::new();
    let mut layer: Option<LayerBuilder> = None;
    let mut set: Option<MatrixSetBuilder> = None;
    let mut in_matrix = false;
    let mut matrix_id: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "Layer" => layer = Some(LayerBuilder::default()),
                    "TileMatrixSet" if !path.iter().any(|p| p == "Layer") => {
                        set = Some(MatrixSetBuilder::default());
                    }
                    "TileMatrix" => {
                        in_matrix = true;
                        matrix_id = None;
                    }
                    _ => {}
                }
                path.push(tag);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| parse_error(e, reader.buffer_position()))?
                    .to_string();
                let tag = path.last().map(String::as_str).unwrap_or("");
                match tag {
                    "Identifier" => {
                        if in_matrix {
                            matrix_id = Some(text);
                        } else if path.iter().any(|p| p == "TileMatrixSet") {
                            if let Some(s) = set.as_mut() {
                                s.identifier = Some(text);
                            }
                        } else if let Some(l) = layer.as_mut() {
                            l.name = Some(text);
                        }
                    }
                    "Title" => {
                        if path.iter().any(|p| p == "Layer") {
                            if let Some(l) = layer.as_mut() {
                                l.title = Some(text);
                            }
                        } else if path.iter().any(|p| p == "ServiceIdentification") {
                            caps.service_title = Some(text);
                        }
                    }
                    "SupportedCRS" => {
                        if let Some(s) = set.as_mut() {
                            s.crs = Some(text);
                        }
                    }
                    "ScaleDenominator" => {
                        if in_matrix {
                            if let (Some(s), Ok(scale)) = (set.as_mut(), text.parse::<f64>()) {
                                s.resolutions.push(scale * METERS_PER_SCALE_UNIT);
                            }
                        }
                    }
                    "TopLeftCorner" => {
                        if let Some(s) = set.as_mut() {
                            if s.origin.is_none() {
                                let mut parts = text.split_whitespace();
                                if let (Some(x), Some(y)) = (
                                    parts.next().and_then(|v| v.parse().ok()),
                                    parts.next().and_then(|v| v.parse().ok()),
                                ) {
                                    s.origin = Some((x, y));
                                }
                            }
                        }
                    }
                    "Format" => {
                        if path.iter().any(|p| p == "Layer") {
                            caps.formats.push(text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Layer" => {
                        if let Some(done) = layer.take().and_then(LayerBuilder::finish) {
                            caps.layers.push(done);
                        }
                    }
                    b"TileMatrix" => {
                        in_matrix = false;
                        if let (Some(s), Some(id)) = (set.as_mut(), matrix_id.take()) {
                            s.matrix_ids.push(id);
                        }
                    }
                    b"TileMatrixSet" => {
                        if let Some(s) = set.take() {
                            if let Some(identifier) = s.identifier {
                                caps.matrix_sets.push(WmtsMatrixData {
                                    identifier,
                                    crs: s.crs.unwrap_or_default(),
                                    matrix_ids: s.matrix_ids,
                                    resolutions: s.resolutions,
                                    origin: s.origin,
                                });
                            }
                        }
                    }
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e, reader.buffer_position())),
            _ => {}
        }
    }

    if caps.layers.is_empty() && caps.matrix_sets.is_empty() {
        return Err(MapError::CapabilitiesParse(
            "document contains no WMTS capability content".to_string(),
        ));
    }
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WMS_DOC: &str = r#"<?xml version="1.0"?>
<WMT_MS_Capabilities version="1.1.1" xmlns:xlink="http://www.w3.org/1999/xlink">
  <Service>
    <Name>OGC:WMS</Name>
    <Title>Cadastre WMS</Title>
  </Service>
  <Capability>
    <Request>
      <GetMap>
        <Format>image/png</Format>
        <Format>image/jpeg</Format>
      </GetMap>
    </Request>
    <Layer>
      <Title>Root</Title>
      <SRS>EPSG:3857</SRS>
      <Layer>
        <Name>cadastre:parcels</Name>
        <Title>Parcels</Title>
        <SRS>EPSG:2056</SRS>
        <Style>
          <Name>default</Name>
          <LegendURL width="20" height="20">
            <Format>image/png</Format>
            <OnlineResource xlink:href="https://gis.example.com/legend/parcels.png"/>
          </LegendURL>
        </Style>
      </Layer>
      <Layer>
        <Name>cadastre:buildings</Name>
        <Title>Buildings</Title>
      </Layer>
    </Layer>
  </Capability>
</WMT_MS_Capabilities>"#;

    #[test]
    fn wms_nested_layers_are_flattened() {
        let caps = parse_wms_capabilities(WMS_DOC).unwrap();
        assert_eq!(caps.service_title.as_deref(), Some("Cadastre WMS"));
        let names: Vec<_> = caps.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["cadastre:parcels", "cadastre:buildings"]);
        assert_eq!(caps.formats, vec!["image/png", "image/jpeg"]);
    }

    #[test]
    fn wms_layer_details_are_captured() {
        let caps = parse_wms_capabilities(WMS_DOC).unwrap();
        let parcels = &caps.layers[0];
        assert_eq!(parcels.title, "Parcels");
        assert_eq!(parcels.crs, vec!["EPSG:2056"]);
        assert_eq!(
            parcels.legend_url.as_deref(),
            Some("https://gis.example.com/legend/parcels.png")
        );
    }

    #[test]
    fn unnamed_group_layers_are_skipped() {
        let caps = parse_wms_capabilities(WMS_DOC).unwrap();
        assert!(caps.layers.iter().all(|l| l.title != "Root"));
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(parse_wms_capabilities("<html>not capabilities</html>").is_err());
    }

    const WMTS_DOC: &str = r#"<?xml version="1.0"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
              xmlns:ows="http://www.opengis.net/ows/1.1">
  <ows:ServiceIdentification>
    <ows:Title>Ortho WMTS</ows:Title>
  </ows:ServiceIdentification>
  <Contents>
    <Layer>
      <ows:Title>Orthophoto 2024</ows:Title>
      <ows:Identifier>ortho_2024</ows:Identifier>
      <Format>image/jpeg</Format>
      <TileMatrixSetLink>
        <TileMatrixSet>mercator</TileMatrixSet>
      </TileMatrixSetLink>
    </Layer>
    <TileMatrixSet>
      <ows:Identifier>mercator</ows:Identifier>
      <ows:SupportedCRS>urn:ogc:def:crs:EPSG::3857</ows:SupportedCRS>
      <TileMatrix>
        <ows:Identifier>0</ows:Identifier>
        <ScaleDenominator>559082264.028717</ScaleDenominator>
        <TopLeftCorner>-20037508.342789244 20037508.342789244</TopLeftCorner>
        <TileWidth>256</TileWidth>
        <TileHeight>256</TileHeight>
      </TileMatrix>
      <TileMatrix>
        <ows:Identifier>1</ows:Identifier>
        <ScaleDenominator>279541132.014358</ScaleDenominator>
        <TopLeftCorner>-20037508.342789244 20037508.342789244</TopLeftCorner>
        <TileWidth>256</TileWidth>
        <TileHeight>256</TileHeight>
      </TileMatrix>
    </TileMatrixSet>
  </Contents>
</Capabilities>"#;

    #[test]
    fn wmts_layers_and_matrix_sets_parse() {
        let caps = parse_wmts_capabilities(WMTS_DOC).unwrap();
        assert_eq!(caps.service_title.as_deref(), Some("Ortho WMTS"));
        assert_eq!(caps.layers.len(), 1);
        assert_eq!(caps.layers[0].name, "ortho_2024");
        assert_eq!(caps.layers[0].title, "Orthophoto 2024");

        assert_eq!(caps.matrix_sets.len(), 1);
        let set = &caps.matrix_sets[0];
        assert_eq!(set.identifier, "mercator");
        assert_eq!(set.matrix_ids, vec!["0", "1"]);
        assert_eq!(set.resolutions.len(), 2);
        // 559082264.028717 * 0.00028 is the level-0 Web Mercator resolution.
        assert!((set.resolutions[0] - 156543.033928).abs() < 1e-3);
        assert_eq!(set.origin, Some((-20037508.342789244, 20037508.342789244)));
    }

    #[test]
    fn wmts_garbage_is_an_error() {
        assert!(parse_wmts_capabilities("<x/>").is_err());
    }
}
