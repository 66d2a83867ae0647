//! Feature editing.
//!
//! One layer at a time may be in edit mode. Entering attaches exactly three
//! interactions (select, modify, snap); an optional draw sub-mode adds new
//! features. Every feature is tracked as pristine, inserted, modified or
//! deleted from the moment editing starts, so a WFS-T save sends Insert,
//! Update and Delete blocks for exactly what changed instead of re-inserting
//! the whole source. Local edits survive a failed save.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Writer;
use uuid::Uuid;

use layer_providers::{EditTarget, VectorSource};
use map_common::{Feature, Geometry, MapError, MapResult};

/// The interaction set attached while a layer is in edit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Select,
    Modify,
    Snap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    Point,
    LineString,
    Polygon,
}

impl DrawMode {
    fn accepts(&self, geometry: &Geometry) -> bool {
        matches!(
            (self, geometry),
            (DrawMode::Point, Geometry::Point { .. })
                | (DrawMode::LineString, Geometry::LineString { .. })
                | (DrawMode::Polygon, Geometry::Polygon { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dirtiness {
    Pristine,
    Inserted,
    Modified,
}

/// What a save must send.
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    pub inserts: Vec<Feature>,
    pub updates: Vec<Feature>,
    pub deletes: Vec<String>,
}

impl TransactionPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Editing state for one layer. The feature data itself stays in the
/// layer's vector source; this tracks selection and per-feature dirtiness
/// keyed by feature id.
#[derive(Debug)]
pub struct EditSession {
    pub layer_index: usize,
    interactions: Vec<Interaction>,
    draw: Option<DrawMode>,
    selected: Option<String>,
    dirty: HashMap<String, Dirtiness>,
    deleted: Vec<String>,
}

impl EditSession {
    /// Start editing. Features without an id get a working id so edits can
    /// be tracked and filtered in transactions.
    pub fn begin(layer_index: usize, source: &mut VectorSource) -> Self {
        let mut dirty = HashMap::new();
        for feature in &mut source.features {
            let id = feature
                .id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            dirty.insert(id, Dirtiness::Pristine);
        }
        Self {
            layer_index,
            interactions: vec![Interaction::Select, Interaction::Modify, Interaction::Snap],
            draw: None,
            selected: None,
            dirty,
            deleted: Vec::new(),
        }
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn draw_mode(&self) -> Option<DrawMode> {
        self.draw
    }

    /// Switch the draw sub-mode without leaving edit mode. `None` removes
    /// the draw interaction.
    pub fn set_draw_mode(&mut self, mode: Option<DrawMode>) {
        self.draw = mode;
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Click-select within tolerance; the topmost hit wins. A miss clears
    /// the selection.
    pub fn select_at(
        &mut self,
        source: &VectorSource,
        coordinate: [f64; 2],
        tolerance: f64,
    ) -> Option<&str> {
        self.selected = source
            .features
            .iter()
            .rev()
            .find(|f| f.hit_test(coordinate[0], coordinate[1], tolerance))
            .and_then(|f| f.id.clone());
        self.selected.as_deref()
    }

    /// Replace the selected feature's geometry. Inserted features stay
    /// inserted; anything else becomes modified.
    pub fn modify_selected(
        &mut self,
        source: &mut VectorSource,
        geometry: Geometry,
    ) -> MapResult<()> {
        let id = self
            .selected
            .clone()
            .ok_or_else(|| MapError::EditSave("no feature selected".to_string()))?;
        let feature = source
            .features
            .iter_mut()
            .find(|f| f.id.as_deref() == Some(id.as_str()))
            .ok_or_else(|| MapError::EditSave(format!("selected feature {id} vanished")))?;
        feature.geometry = geometry;
        let entry = self.dirty.entry(id).or_insert(Dirtiness::Pristine);
        if *entry != Dirtiness::Inserted {
            *entry = Dirtiness::Modified;
        }
        Ok(())
    }

    /// Nearest vertex of any feature in the source within tolerance, for
    /// snapping a drag or draw position.
    pub fn snap_target(
        &self,
        source: &VectorSource,
        coordinate: [f64; 2],
        tolerance: f64,
    ) -> Option<[f64; 2]> {
        let mut best: Option<([f64; 2], f64)> = None;
        for feature in &source.features {
            if let Some(vertex) = feature
                .geometry
                .nearest_vertex(coordinate[0], coordinate[1], tolerance)
            {
                let d = (vertex[0] - coordinate[0]).hypot(vertex[1] - coordinate[1]);
                if best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((vertex, d));
                }
            }
        }
        best.map(|(v, _)| v)
    }

    /// Add a drawn feature. The geometry must match the active draw mode.
    pub fn draw_feature(
        &mut self,
        source: &mut VectorSource,
        geometry: Geometry,
    ) -> MapResult<String> {
        let mode = self
            .draw
            .ok_or_else(|| MapError::EditSave("no draw mode active".to_string()))?;
        if !mode.accepts(&geometry) {
            return Err(MapError::EditSave(format!(
                "geometry does not match draw mode {mode:?}"
            )));
        }
        let id = Uuid::new_v4().to_string();
        source
            .features
            .push(Feature::new(geometry).with_id(id.clone()));
        self.dirty.insert(id.clone(), Dirtiness::Inserted);
        Ok(id)
    }

    /// Track a feature appended from outside the draw flow (host-supplied
    /// collections) as an insert.
    pub fn note_inserted(&mut self, id: String) {
        self.dirty.insert(id, Dirtiness::Inserted);
    }

    /// Remove the selected feature. Features that existed before editing
    /// started are queued for a Delete block; features drawn this session
    /// simply disappear.
    pub fn delete_selected(&mut self, source: &mut VectorSource) -> MapResult<()> {
        let id = self
            .selected
            .take()
            .ok_or_else(|| MapError::EditSave("no feature selected".to_string()))?;
        source
            .features
            .retain(|f| f.id.as_deref() != Some(id.as_str()));
        match self.dirty.remove(&id) {
            Some(Dirtiness::Inserted) | None => {}
            Some(_) => self.deleted.push(id),
        }
        Ok(())
    }

    /// The Insert/Update/Delete sets the next save must send.
    pub fn plan(&self, source: &VectorSource) -> TransactionPlan {
        let mut plan = TransactionPlan {
            deletes: self.deleted.clone(),
            ..TransactionPlan::default()
        };
        for feature in &source.features {
            let Some(id) = feature.id.as_deref() else {
                continue;
            };
            match self.dirty.get(id) {
                Some(Dirtiness::Inserted) => plan.inserts.push(feature.clone()),
                Some(Dirtiness::Modified) => plan.updates.push(feature.clone()),
                _ => {}
            }
        }
        plan
    }

    /// Reset tracking after a successful save.
    pub fn mark_saved(&mut self) {
        for state in self.dirty.values_mut() {
            *state = Dirtiness::Pristine;
        }
        self.deleted.clear();
    }
}

/// Element name used for the geometry property in transactions.
const GEOMETRY_ELEMENT: &str = "geometry";

fn xml_err(err: impl std::fmt::Display) -> MapError {
    MapError::EditSave(format!("building transaction XML: {err}"))
}

fn write_pos_list(w: &mut Writer<Vec<u8>>, coords: &[[f64; 2]]) -> MapResult<()> {
    let text = coords
        .iter()
        .map(|[x, y]| format!("{x} {y}"))
        .collect::<Vec<_>>()
        .join(" ");
    w.write_event(Event::Start(BytesStart::new("gml:posList")))
        .map_err(xml_err)?;
    w.write_event(Event::Text(BytesText::new(&text)))
        .map_err(xml_err)?;
    w.write_event(Event::End(BytesStart::new("gml:posList").to_end()))
        .map_err(xml_err)
}

fn write_ring(w: &mut Writer<Vec<u8>>, wrapper: &str, ring: &[[f64; 2]]) -> MapResult<()> {
    w.write_event(Event::Start(BytesStart::new(wrapper)))
        .map_err(xml_err)?;
    w.write_event(Event::Start(BytesStart::new("gml:LinearRing")))
        .map_err(xml_err)?;
    write_pos_list(w, ring)?;
    w.write_event(Event::End(BytesStart::new("gml:LinearRing").to_end()))
        .map_err(xml_err)?;
    w.write_event(Event::End(BytesStart::new(wrapper).to_end()))
        .map_err(xml_err)
}

fn write_polygon_body(w: &mut Writer<Vec<u8>>, rings: &[Vec<[f64; 2]>]) -> MapResult<()> {
    for (i, ring) in rings.iter().enumerate() {
        let wrapper = if i == 0 { "gml:exterior" } else { "gml:interior" };
        write_ring(w, wrapper, ring)?;
    }
    Ok(())
}

fn write_geometry(w: &mut Writer<Vec<u8>>, geometry: &Geometry, srs: &str) -> MapResult<()> {
    let named = |name: &str| {
        let mut e = BytesStart::new(name.to_string());
        e.push_attribute(("srsName", srs));
        e
    };
    match geometry {
        Geometry::Point { coordinates } => {
            w.write_event(Event::Start(named("gml:Point"))).map_err(xml_err)?;
            w.write_event(Event::Start(BytesStart::new("gml:pos")))
                .map_err(xml_err)?;
            w.write_event(Event::Text(BytesText::new(&format!(
                "{} {}",
                coordinates[0], coordinates[1]
            ))))
            .map_err(xml_err)?;
            w.write_event(Event::End(BytesStart::new("gml:pos").to_end()))
                .map_err(xml_err)?;
            w.write_event(Event::End(BytesStart::new("gml:Point").to_end()))
                .map_err(xml_err)?;
        }
        Geometry::MultiPoint { coordinates } => {
            w.write_event(Event::Start(named("gml:MultiPoint")))
                .map_err(xml_err)?;
            for point in coordinates {
                w.write_event(Event::Start(BytesStart::new("gml:pointMember")))
                    .map_err(xml_err)?;
                write_geometry(w, &Geometry::Point { coordinates: *point }, srs)?;
                w.write_event(Event::End(BytesStart::new("gml:pointMember").to_end()))
                    .map_err(xml_err)?;
            }
            w.write_event(Event::End(BytesStart::new("gml:MultiPoint").to_end()))
                .map_err(xml_err)?;
        }
        Geometry::LineString { coordinates } => {
            w.write_event(Event::Start(named("gml:LineString")))
                .map_err(xml_err)?;
            write_pos_list(w, coordinates)?;
            w.write_event(Event::End(BytesStart::new("gml:LineString").to_end()))
                .map_err(xml_err)?;
        }
        Geometry::MultiLineString { coordinates } => {
            w.write_event(Event::Start(named("gml:MultiLineString")))
                .map_err(xml_err)?;
            for line in coordinates {
                w.write_event(Event::Start(BytesStart::new("gml:lineStringMember")))
                    .map_err(xml_err)?;
                write_geometry(
                    w,
                    &Geometry::LineString {
                        coordinates: line.clone(),
                    },
                    srs,
                )?;
                w.write_event(Event::End(BytesStart::new("gml:lineStringMember").to_end()))
                    .map_err(xml_err)?;
            }
            w.write_event(Event::End(BytesStart::new("gml:MultiLineString").to_end()))
                .map_err(xml_err)?;
        }
        Geometry::Polygon { coordinates } => {
            w.write_event(Event::Start(named("gml:Polygon")))
                .map_err(xml_err)?;
            write_polygon_body(w, coordinates)?;
            w.write_event(Event::End(BytesStart::new("gml:Polygon").to_end()))
                .map_err(xml_err)?;
        }
        Geometry::MultiPolygon { coordinates } => {
            w.write_event(Event::Start(named("gml:MultiPolygon")))
                .map_err(xml_err)?;
            for polygon in coordinates {
                w.write_event(Event::Start(BytesStart::new("gml:polygonMember")))
                    .map_err(xml_err)?;
                write_geometry(
                    w,
                    &Geometry::Polygon {
                        coordinates: polygon.clone(),
                    },
                    srs,
                )?;
                w.write_event(Event::End(BytesStart::new("gml:polygonMember").to_end()))
                    .map_err(xml_err)?;
            }
            w.write_event(Event::End(BytesStart::new("gml:MultiPolygon").to_end()))
                .map_err(xml_err)?;
        }
    }
    Ok(())
}

fn write_properties(w: &mut Writer<Vec<u8>>, feature: &Feature) -> MapResult<()> {
    for (key, value) in &feature.properties {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        w.write_event(Event::Start(BytesStart::new(key.as_str())))
            .map_err(xml_err)?;
        w.write_event(Event::Text(BytesText::new(&text)))
            .map_err(xml_err)?;
        w.write_event(Event::End(BytesStart::new(key.as_str()).to_end()))
            .map_err(xml_err)?;
    }
    Ok(())
}

fn write_fid_filter(w: &mut Writer<Vec<u8>>, fid: &str) -> MapResult<()> {
    w.write_event(Event::Start(BytesStart::new("ogc:Filter")))
        .map_err(xml_err)?;
    let mut id_elem = BytesStart::new("ogc:FeatureId");
    id_elem.push_attribute(("fid", fid));
    w.write_event(Event::Empty(id_elem)).map_err(xml_err)?;
    w.write_event(Event::End(BytesStart::new("ogc:Filter").to_end()))
        .map_err(xml_err)
}

/// Serialize a WFS 1.1.0 Transaction carrying the plan's Insert, Update and
/// Delete blocks.
pub fn transaction_xml(target: &EditTarget, plan: &TransactionPlan) -> MapResult<String> {
    let mut w = Writer::new(Vec::new());
    let srs = target.srs.as_str();

    let mut root = BytesStart::new("wfs:Transaction");
    root.push_attribute(("service", "WFS"));
    root.push_attribute(("version", "1.1.0"));
    root.push_attribute(("xmlns:wfs", "http://www.opengis.net/wfs"));
    root.push_attribute(("xmlns:gml", "http://www.opengis.net/gml"));
    root.push_attribute(("xmlns:ogc", "http://www.opengis.net/ogc"));
    w.write_event(Event::Start(root)).map_err(xml_err)?;

    if !plan.inserts.is_empty() {
        w.write_event(Event::Start(BytesStart::new("wfs:Insert")))
            .map_err(xml_err)?;
        for feature in &plan.inserts {
            w.write_event(Event::Start(BytesStart::new(target.type_name.as_str())))
                .map_err(xml_err)?;
            write_properties(&mut w, feature)?;
            w.write_event(Event::Start(BytesStart::new(GEOMETRY_ELEMENT)))
                .map_err(xml_err)?;
            write_geometry(&mut w, &feature.geometry, srs)?;
            w.write_event(Event::End(BytesStart::new(GEOMETRY_ELEMENT).to_end()))
                .map_err(xml_err)?;
            w.write_event(Event::End(
                BytesStart::new(target.type_name.as_str()).to_end(),
            ))
            .map_err(xml_err)?;
        }
        w.write_event(Event::End(BytesStart::new("wfs:Insert").to_end()))
            .map_err(xml_err)?;
    }

    for feature in &plan.updates {
        let Some(fid) = feature.id.as_deref() else {
            continue;
        };
        let mut update = BytesStart::new("wfs:Update");
        update.push_attribute(("typeName", target.type_name.as_str()));
        w.write_event(Event::Start(update)).map_err(xml_err)?;

        w.write_event(Event::Start(BytesStart::new("wfs:Property")))
            .map_err(xml_err)?;
        w.write_event(Event::Start(BytesStart::new("wfs:Name")))
            .map_err(xml_err)?;
        w.write_event(Event::Text(BytesText::new(GEOMETRY_ELEMENT)))
            .map_err(xml_err)?;
        w.write_event(Event::End(BytesStart::new("wfs:Name").to_end()))
            .map_err(xml_err)?;
        w.write_event(Event::Start(BytesStart::new("wfs:Value")))
            .map_err(xml_err)?;
        write_geometry(&mut w, &feature.geometry, srs)?;
        w.write_event(Event::End(BytesStart::new("wfs:Value").to_end()))
            .map_err(xml_err)?;
        w.write_event(Event::End(BytesStart::new("wfs:Property").to_end()))
            .map_err(xml_err)?;

        write_fid_filter(&mut w, fid)?;
        w.write_event(Event::End(BytesStart::new("wfs:Update").to_end()))
            .map_err(xml_err)?;
    }

    for fid in &plan.deletes {
        let mut delete = BytesStart::new("wfs:Delete");
        delete.push_attribute(("typeName", target.type_name.as_str()));
        w.write_event(Event::Start(delete)).map_err(xml_err)?;
        write_fid_filter(&mut w, fid)?;
        w.write_event(Event::End(BytesStart::new("wfs:Delete").to_end()))
            .map_err(xml_err)?;
    }

    w.write_event(Event::End(BytesStart::new("wfs:Transaction").to_end()))
        .map_err(xml_err)?;

    String::from_utf8(w.into_inner()).map_err(|e| MapError::EditSave(e.to_string()))
}
