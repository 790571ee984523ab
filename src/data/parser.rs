//! Push-style decoders for raw map data
//!
//! Decoders hand every record to a [`RecordSink`] as soon as it is decoded,
//! so a tile of any size is processed with bounded buffering. A malformed
//! record is reported to [`RecordSink::on_malformed`] and skipped; only an
//! unreadable document as a whole is an error.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::geo::{BoundingBox, LatLng};
use crate::data::element::{Element, ElementKind};
use crate::data::terrain::ElevationGrid;
use crate::prelude::HashMap;
use crate::{MapError, Result};

/// Rows per terrain chunk pushed by the elevation decoder.
pub const ELEVATION_BAND_ROWS: usize = 64;

/// Supported raw data formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    GeoJson,
    OsmXml,
    OsmPbf,
    Elevation,
}

impl DataFormat {
    /// Parses a configuration name such as `geojson`, `osm` or `ele`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "geojson" | "json" => Some(Self::GeoJson),
            "osm" | "xml" | "osmxml" => Some(Self::OsmXml),
            "pbf" | "osmpbf" | "osm.pbf" => Some(Self::OsmPbf),
            "ele" | "elevation" | "hgt" => Some(Self::Elevation),
            _ => None,
        }
    }

    /// Cache file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::GeoJson => "json",
            Self::OsmXml => "osm",
            Self::OsmPbf => "osm.pbf",
            Self::Elevation => "ele",
        }
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Element(Element),
    Terrain(ElevationGrid),
}

/// Receiver of decoded records.
pub trait RecordSink {
    /// Returning `Break` stops decoding early.
    fn on_record(&mut self, record: RawRecord) -> ControlFlow<()>;

    fn on_malformed(&mut self, error: MapError) {
        log::warn!("skipping malformed record: {}", error);
    }
}

/// Counts of what a decode run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub records: usize,
    pub skipped: usize,
    pub stopped: bool,
}

struct Counting<'a> {
    sink: &'a mut dyn RecordSink,
    stats: ParseStats,
}

impl Counting<'_> {
    fn record(&mut self, record: RawRecord) -> ControlFlow<()> {
        self.stats.records += 1;
        let flow = self.sink.on_record(record);
        if flow.is_break() {
            self.stats.stopped = true;
        }
        flow
    }

    fn malformed(&mut self, error: MapError) {
        self.stats.skipped += 1;
        self.sink.on_malformed(error);
    }
}

/// Decodes `bytes` in `format`, pushing each record into `sink`.
/// `bounds` is the geographic extent of the data, used by gridded formats.
pub fn parse(
    format: DataFormat,
    bytes: &[u8],
    bounds: BoundingBox,
    sink: &mut dyn RecordSink,
) -> Result<ParseStats> {
    let mut counting = Counting {
        sink,
        stats: ParseStats::default(),
    };
    match format {
        DataFormat::GeoJson => parse_geojson(bytes, &mut counting)?,
        DataFormat::OsmXml => parse_osm_xml(bytes, &mut counting)?,
        DataFormat::OsmPbf => parse_osm_pbf(bytes, &mut counting)?,
        DataFormat::Elevation => parse_elevation(bytes, bounds, &mut counting)?,
    }
    Ok(counting.stats)
}

// GeoJSON: a stream of Feature / FeatureCollection values, so both plain
// documents and newline-delimited feature sequences decode incrementally.
fn parse_geojson(bytes: &[u8], out: &mut Counting<'_>) -> Result<()> {
    let mut ordinal = 0i64;
    for value in serde_json::Deserializer::from_slice(bytes).into_iter::<Value>() {
        let value = value.map_err(|e| MapError::ParseFailure(format!("invalid GeoJSON: {}", e)))?;
        match value.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => {
                let features = value
                    .get("features")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for feature in features {
                    ordinal += 1;
                    if push_feature(feature, ordinal, out).is_break() {
                        return Ok(());
                    }
                }
            }
            Some("Feature") => {
                ordinal += 1;
                if push_feature(&value, ordinal, out).is_break() {
                    return Ok(());
                }
            }
            other => out.malformed(MapError::ParseFailure(format!(
                "unexpected GeoJSON object type {:?}",
                other
            ))),
        }
    }
    Ok(())
}

fn push_feature(feature: &Value, ordinal: i64, out: &mut Counting<'_>) -> ControlFlow<()> {
    match feature_to_element(feature, ordinal) {
        Ok(element) => out.record(RawRecord::Element(element)),
        Err(e) => {
            out.malformed(e);
            ControlFlow::Continue(())
        }
    }
}

/// Features without a usable id get `-ordinal` so ids stay unique per document.
fn feature_to_element(feature: &Value, ordinal: i64) -> Result<Element> {
    let properties = feature.get("properties").and_then(Value::as_object);

    let declared = properties
        .and_then(|p| p.get("osm_type").or_else(|| p.get("@type")))
        .and_then(Value::as_str)
        .and_then(ElementKind::from_osm_type)
        .unwrap_or_default();
    let (kind, id) = feature
        .get("id")
        .or_else(|| properties.and_then(|p| p.get("id")))
        .and_then(|id| match id {
            Value::Number(n) => n.as_i64().map(|n| (declared, n)),
            Value::String(s) => parse_feature_id(s, declared),
            _ => None,
        })
        .unwrap_or((ElementKind::Feature, -ordinal));

    let geometry = feature
        .get("geometry")
        .filter(|g| !g.is_null())
        .ok_or_else(|| MapError::ParseFailure(format!("feature {} has no geometry", id)))?;
    let points = geometry_points(geometry)
        .ok_or_else(|| MapError::ParseFailure(format!("feature {} has invalid geometry", id)))?;
    if points.is_empty() {
        return Err(MapError::ParseFailure(format!("feature {} has empty geometry", id)));
    }

    let mut tags = HashMap::default();
    if let Some(properties) = properties {
        for (key, value) in properties {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            tags.insert(key.clone(), value);
        }
    }
    Ok(Element::new(id, points, tags).with_kind(kind))
}

/// Reads `way/77`, `w77` or a bare `77`; the type prefix wins over the
/// declared kind.
fn parse_feature_id(id: &str, declared: ElementKind) -> Option<(ElementKind, i64)> {
    let id = id.trim();
    if let Some((kind, number)) = id.split_once('/') {
        return Some((ElementKind::from_osm_type(kind)?, number.parse().ok()?));
    }
    if let Ok(number) = id.parse() {
        return Some((declared, number));
    }
    let split = id.find(|c: char| c.is_ascii_digit() || c == '-')?;
    let kind = ElementKind::from_osm_type(&id[..split])?;
    Some((kind, id[split..].parse().ok()?))
}

/// Outline of a geometry: the coordinates of points and lines, the outer ring
/// of polygons, and the first part of multi geometries.
fn geometry_points(geometry: &Value) -> Option<Vec<LatLng>> {
    let coordinates = geometry.get("coordinates")?;
    match geometry.get("type")?.as_str()? {
        "Point" => Some(vec![position(coordinates)?]),
        "LineString" | "MultiPoint" => positions(coordinates),
        "Polygon" | "MultiLineString" => positions(coordinates.as_array()?.first()?),
        "MultiPolygon" => positions(coordinates.as_array()?.first()?.as_array()?.first()?),
        _ => None,
    }
}

fn positions(value: &Value) -> Option<Vec<LatLng>> {
    value.as_array()?.iter().map(position).collect()
}

fn position(value: &Value) -> Option<LatLng> {
    let pair = value.as_array()?;
    let coord = LatLng::new(pair.get(1)?.as_f64()?, pair.first()?.as_f64()?);
    coord.is_valid().then_some(coord)
}

// OSM XML. Nodes precede ways in OSM extracts, so ways resolve their node
// references against the nodes seen so far.
#[derive(Default)]
struct PendingWay {
    id: i64,
    refs: Vec<i64>,
    tags: HashMap<String, String>,
}

#[derive(Default)]
struct PendingNode {
    id: i64,
    coord: Option<LatLng>,
    tags: HashMap<String, String>,
}

fn parse_osm_xml(bytes: &[u8], out: &mut Counting<'_>) -> Result<()> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| MapError::ParseFailure(format!("OSM XML is not UTF-8: {}", e)))?;
    if !text.contains("<osm") {
        return Err(MapError::ParseFailure("missing <osm> root".to_string()));
    }

    let mut nodes: HashMap<i64, LatLng> = HashMap::default();
    let mut node: Option<PendingNode> = None;
    let mut way: Option<PendingWay> = None;

    for tag in XmlTags::new(text) {
        let tag = match tag {
            Ok(tag) => tag,
            Err(e) => {
                out.malformed(e);
                continue;
            }
        };
        match (tag.name, tag.closing) {
            ("node", false) => {
                let id = tag.attr("id").and_then(|v| v.parse().ok());
                let lat = tag.attr("lat").and_then(|v| v.parse().ok());
                let lon = tag.attr("lon").and_then(|v| v.parse().ok());
                let coord = match (lat, lon) {
                    (Some(lat), Some(lon)) => Some(LatLng::new(lat, lon)).filter(LatLng::is_valid),
                    _ => None,
                };
                let pending = PendingNode {
                    id: id.unwrap_or_default(),
                    coord: if id.is_some() { coord } else { None },
                    tags: HashMap::default(),
                };
                if tag.self_closing {
                    if finish_node(pending, &mut nodes, out).is_break() {
                        return Ok(());
                    }
                } else {
                    node = Some(pending);
                }
            }
            ("node", true) => {
                if let Some(pending) = node.take() {
                    if finish_node(pending, &mut nodes, out).is_break() {
                        return Ok(());
                    }
                }
            }
            ("way", false) => match tag.attr("id").and_then(|v| v.parse().ok()) {
                Some(id) if !tag.self_closing => {
                    way = Some(PendingWay {
                        id,
                        ..PendingWay::default()
                    })
                }
                Some(_) => {}
                None => out.malformed(MapError::ParseFailure("way without id".to_string())),
            },
            ("way", true) => {
                if let Some(pending) = way.take() {
                    if finish_way(pending, &nodes, out).is_break() {
                        return Ok(());
                    }
                }
            }
            ("nd", false) => {
                if let Some(pending) = way.as_mut() {
                    match tag.attr("ref").and_then(|v| v.parse().ok()) {
                        Some(r) => pending.refs.push(r),
                        None => pending.refs.push(i64::MIN),
                    }
                }
            }
            ("tag", false) => {
                let tags = match (node.as_mut(), way.as_mut()) {
                    (Some(n), _) => &mut n.tags,
                    (None, Some(w)) => &mut w.tags,
                    (None, None) => continue,
                };
                match (tag.attr("k"), tag.attr("v")) {
                    (Some(k), Some(v)) => {
                        tags.insert(unescape(k), unescape(v));
                    }
                    _ => out.malformed(MapError::ParseFailure(format!(
                        "tag without key or value: <{}{}>",
                        tag.name, tag.body
                    ))),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn finish_node(
    node: PendingNode,
    nodes: &mut HashMap<i64, LatLng>,
    out: &mut Counting<'_>,
) -> ControlFlow<()> {
    let Some(coord) = node.coord else {
        out.malformed(MapError::ParseFailure(format!(
            "node {} has no valid id or position",
            node.id
        )));
        return ControlFlow::Continue(());
    };
    nodes.insert(node.id, coord);
    if node.tags.is_empty() {
        return ControlFlow::Continue(());
    }
    out.record(RawRecord::Element(
        Element::new(node.id, vec![coord], node.tags).with_kind(ElementKind::Node),
    ))
}

fn finish_way(
    way: PendingWay,
    nodes: &HashMap<i64, LatLng>,
    out: &mut Counting<'_>,
) -> ControlFlow<()> {
    let geometry: Option<Vec<LatLng>> = way.refs.iter().map(|r| nodes.get(r).copied()).collect();
    match geometry {
        Some(points) if points.len() >= 2 => {
            out.record(RawRecord::Element(
                Element::new(way.id, points, way.tags).with_kind(ElementKind::Way),
            ))
        }
        _ => {
            out.malformed(MapError::ParseFailure(format!(
                "way {} references unknown nodes",
                way.id
            )));
            ControlFlow::Continue(())
        }
    }
}

// OSM PBF. Same node-then-way resolution as XML; relations are skipped in
// both encodings.
fn parse_osm_pbf(bytes: &[u8], out: &mut Counting<'_>) -> Result<()> {
    let mut nodes: HashMap<i64, LatLng> = HashMap::default();
    let mut stopped = false;

    let reader = osmpbf::ElementReader::new(bytes);
    reader
        .for_each(|element| {
            if stopped {
                return;
            }
            let flow = match element {
                osmpbf::Element::Node(n) => finish_node(
                    pbf_node(n.id(), n.lat(), n.lon(), n.tags()),
                    &mut nodes,
                    out,
                ),
                osmpbf::Element::DenseNode(n) => finish_node(
                    pbf_node(n.id(), n.lat(), n.lon(), n.tags()),
                    &mut nodes,
                    out,
                ),
                osmpbf::Element::Way(w) => {
                    let way = PendingWay {
                        id: w.id(),
                        refs: w.refs().collect(),
                        tags: collect_tags(w.tags()),
                    };
                    finish_way(way, &nodes, out)
                }
                osmpbf::Element::Relation(_) => ControlFlow::Continue(()),
            };
            stopped = flow.is_break();
        })
        .map_err(|e| MapError::ParseFailure(format!("invalid OSM PBF: {}", e)))
}

fn pbf_node<'a>(
    id: i64,
    lat: f64,
    lon: f64,
    tags: impl Iterator<Item = (&'a str, &'a str)>,
) -> PendingNode {
    PendingNode {
        id,
        coord: Some(LatLng::new(lat, lon)).filter(LatLng::is_valid),
        tags: collect_tags(tags),
    }
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> HashMap<String, String> {
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Minimal tag scanner over an XML document. Quoted attribute values,
/// comments and CDATA sections may contain `>`.
struct XmlTags<'a> {
    rest: &'a str,
}

struct XmlTag<'a> {
    name: &'a str,
    body: &'a str,
    closing: bool,
    self_closing: bool,
}

impl<'a> XmlTags<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn skip_past(&mut self, from: &'a str, terminator: &str, what: &str) -> Result<()> {
        match from.find(terminator) {
            Some(end) => {
                self.rest = &from[end + terminator.len()..];
                Ok(())
            }
            None => Err(self.unterminated(what)),
        }
    }

    fn unterminated(&mut self, what: &str) -> MapError {
        let at = self.rest.chars().take(40).collect::<String>();
        self.rest = "";
        MapError::ParseFailure(format!("unterminated {} near {:?}", what, at))
    }
}

/// Offset of the `>` closing a tag, ignoring any inside quotes.
fn tag_end(text: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

impl<'a> Iterator for XmlTags<'a> {
    type Item = Result<XmlTag<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.rest.find('<')?;
            let after = &self.rest[start + 1..];

            let skipped = if let Some(comment) = after.strip_prefix("!--") {
                Some(self.skip_past(comment, "-->", "comment"))
            } else if let Some(cdata) = after.strip_prefix("![CDATA[") {
                Some(self.skip_past(cdata, "]]>", "CDATA section"))
            } else {
                None
            };
            match skipped {
                Some(Ok(())) => continue,
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }

            let Some(end) = tag_end(after) else {
                return Some(Err(self.unterminated("tag")));
            };
            let inner = &after[..end];
            self.rest = &after[end + 1..];

            // declarations, processing instructions
            if inner.starts_with('?') || inner.starts_with('!') {
                continue;
            }
            let closing = inner.starts_with('/');
            let inner = inner.trim_start_matches('/');
            let self_closing = inner.ends_with('/');
            let inner = inner.trim_end_matches('/').trim();
            let name_end = inner.find(char::is_whitespace).unwrap_or(inner.len());
            return Some(Ok(XmlTag {
                name: &inner[..name_end],
                body: &inner[name_end..],
                closing,
                self_closing,
            }));
        }
    }
}

impl<'a> XmlTag<'a> {
    fn attr(&self, name: &str) -> Option<&'a str> {
        let mut body = self.body;
        while let Some(eq) = body.find('=') {
            let key = body[..eq].trim();
            let value_part = body[eq + 1..].trim_start();
            let quote = value_part.chars().next()?;
            if quote != '"' && quote != '\'' {
                return None;
            }
            let value_end = value_part[1..].find(quote)?;
            let value = &value_part[1..1 + value_end];
            if key == name {
                return Some(value);
            }
            body = &value_part[value_end + 2..];
        }
        None
    }
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_elevation(bytes: &[u8], bounds: BoundingBox, out: &mut Counting<'_>) -> Result<()> {
    let grid = ElevationGrid::from_ele_bytes(bytes, bounds)?;
    for band in grid.row_bands(ELEVATION_BAND_ROWS) {
        if out.record(RawRecord::Terrain(band)).is_break() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        records: Vec<RawRecord>,
        malformed: usize,
        stop_after: Option<usize>,
    }

    impl RecordSink for Collect {
        fn on_record(&mut self, record: RawRecord) -> ControlFlow<()> {
            self.records.push(record);
            match self.stop_after {
                Some(n) if self.records.len() >= n => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }

        fn on_malformed(&mut self, _error: MapError) {
            self.malformed += 1;
        }
    }

    fn elements(sink: &Collect) -> Vec<&Element> {
        sink.records
            .iter()
            .filter_map(|r| match r {
                RawRecord::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn world() -> BoundingBox {
        BoundingBox::from_coords(-90.0, -180.0, 90.0, 180.0)
    }

    const OSM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <!-- sample -->
  <node id="1" lat="52.5300" lon="13.3800"/>
  <node id="2" lat="52.5301" lon="13.3800"/>
  <node id="3" lat="52.5301" lon="13.3802"/>
  <node id="4" lat="52.5300" lon="13.3802" />
  <node id="5" lat="52.5305" lon="13.3805">
    <tag k="amenity" v="cafe"/>
    <tag k="name" v="Caf&amp;e"/>
  </node>
  <node id="6" lat="999" lon="13.0"/>
  <way id="42">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
    <tag k="building" v="yes"/>
    <tag k="height" v="12"/>
  </way>
  <way id="43">
    <nd ref="1"/><nd ref="99"/>
    <tag k="highway" v="path"/>
  </way>
  <relation id="7"><member type="way" ref="42" role="outer"/></relation>
</osm>"#;

    #[test]
    fn test_osm_xml_nodes_and_ways() {
        let mut sink = Collect::default();
        let stats = parse(DataFormat::OsmXml, OSM.as_bytes(), world(), &mut sink).unwrap();

        let elements = elements(&sink);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id, 5);
        assert_eq!(elements[0].tags.get("name").map(String::as_str), Some("Caf&e"));

        let building = elements[1];
        assert_eq!(building.id, 42);
        assert_eq!(building.geometry.len(), 5);
        assert!(building.is_closed());
        assert_eq!(building.tags.get("height").map(String::as_str), Some("12"));

        // node 6 has an invalid latitude and way 43 a dangling reference
        assert_eq!(sink.malformed, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn test_osm_xml_keeps_id_spaces_apart() {
        let osm = r#"<osm>
          <node id="42" lat="52.53" lon="13.38"><tag k="amenity" v="cafe"/></node>
          <node id="43" lat="52.531" lon="13.38"/>
          <way id="42"><nd ref="42"/><nd ref="43"/><tag k="highway" v="path"/></way>
        </osm>"#;
        let mut sink = Collect::default();
        parse(DataFormat::OsmXml, osm.as_bytes(), world(), &mut sink).unwrap();
        let ids: Vec<String> = elements(&sink).iter().map(|e| e.qualified_id()).collect();
        assert_eq!(ids, vec!["node:42", "way:42"]);
    }

    #[test]
    fn test_osm_xml_gt_in_values_and_comments() {
        let osm = r#"<osm>
          <!-- <node id="9" lat="1" lon="1"><tag k="x" v="y"/></node> a > b -->
          <node id="5" lat="52.53" lon="13.38">
            <tag k="amenity" v="cafe"/>
            <tag k="note" v="a>b"/>
            <tag k='sign' v='x > 1'/>
          </node>
          <![CDATA[ <node id="8"/> ]]>
        </osm>"#;
        let mut sink = Collect::default();
        let stats = parse(DataFormat::OsmXml, osm.as_bytes(), world(), &mut sink).unwrap();
        let elements = elements(&sink);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].id, 5);
        assert_eq!(elements[0].tags.get("note").map(String::as_str), Some("a>b"));
        assert_eq!(elements[0].tags.get("sign").map(String::as_str), Some("x > 1"));
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_osm_xml_damaged_tags_are_reported() {
        let osm = r#"<osm>
          <node id="5" lat="52.53" lon="13.38">
            <tag k="amenity"/>
            <tag k="name" v="Corner"/>
          </node>
          <node id="6" lat="52.53" lon="13.38"><tag k="cut" v="unterminated"#;
        let mut sink = Collect::default();
        let stats = parse(DataFormat::OsmXml, osm.as_bytes(), world(), &mut sink).unwrap();
        assert_eq!(elements(&sink).len(), 1);
        // the value-less tag and the unterminated one
        assert_eq!(sink.malformed, 2);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_osm_xml_requires_root() {
        let mut sink = Collect::default();
        assert!(parse(DataFormat::OsmXml, b"<html></html>", world(), &mut sink).is_err());
    }

    #[test]
    fn test_geojson_feature_collection() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "id": 42,
                  "geometry": { "type": "Polygon", "coordinates": [[[13.38,52.53],[13.381,52.53],[13.381,52.531],[13.38,52.53]]] },
                  "properties": { "building": "yes", "levels": 3, "roof": null } },
                { "type": "Feature", "geometry": null, "properties": {} },
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [200.0, 10.0] } },
                { "type": "Feature",
                  "geometry": { "type": "LineString", "coordinates": [[13.0,52.0],[13.1,52.1]] },
                  "properties": { "id": "way/77", "highway": "primary" } },
                { "type": "Feature",
                  "geometry": { "type": "Point", "coordinates": [13.0, 52.0] },
                  "properties": { "amenity": "bench" } }
            ]
        }"#;
        let mut sink = Collect::default();
        let stats = parse(DataFormat::GeoJson, json.as_bytes(), world(), &mut sink).unwrap();
        let elements = elements(&sink);

        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].id, 42);
        assert_eq!(elements[0].geometry[0], LatLng::new(52.53, 13.38));
        assert_eq!(elements[0].tags.get("levels").map(String::as_str), Some("3"));
        assert!(!elements[0].tags.contains_key("roof"));
        assert_eq!(elements[1].id, 77);
        assert_eq!(elements[1].kind, ElementKind::Way);
        assert_eq!(elements[0].kind, ElementKind::Feature);
        assert_eq!(elements[2].id, -5);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_geojson_typed_ids() {
        assert_eq!(
            parse_feature_id("node/77", ElementKind::Feature),
            Some((ElementKind::Node, 77))
        );
        assert_eq!(parse_feature_id("w12", ElementKind::Feature), Some((ElementKind::Way, 12)));
        assert_eq!(
            parse_feature_id("301", ElementKind::Relation),
            Some((ElementKind::Relation, 301))
        );
        assert_eq!(parse_feature_id("area/1", ElementKind::Feature), None);

        let json = r#"
            {"type":"Feature","id":"node/77","geometry":{"type":"Point","coordinates":[1,1]},"properties":{"a":"b"}}
            {"type":"Feature","id":"way/77","geometry":{"type":"LineString","coordinates":[[1,1],[2,2]]},"properties":{"a":"b"}}
            {"type":"Feature","id":77,"geometry":{"type":"Point","coordinates":[3,3]},"properties":{"osm_type":"relation"}}
        "#;
        let mut sink = Collect::default();
        parse(DataFormat::GeoJson, json.as_bytes(), world(), &mut sink).unwrap();
        let ids: Vec<String> = elements(&sink).iter().map(|e| e.qualified_id()).collect();
        assert_eq!(ids, vec!["node:77", "way:77", "relation:77"]);
    }

    // Minimal protobuf writer for building OSM PBF fixtures.
    mod pbf {
        fn varint(out: &mut Vec<u8>, mut value: u64) {
            loop {
                let byte = (value & 0x7f) as u8;
                value >>= 7;
                if value == 0 {
                    out.push(byte);
                    return;
                }
                out.push(byte | 0x80);
            }
        }

        pub fn zigzag(value: i64) -> u64 {
            ((value << 1) ^ (value >> 63)) as u64
        }

        pub fn uint(out: &mut Vec<u8>, field: u32, value: u64) {
            varint(out, u64::from(field << 3));
            varint(out, value);
        }

        pub fn bytes(out: &mut Vec<u8>, field: u32, data: &[u8]) {
            varint(out, u64::from(field << 3 | 2));
            varint(out, data.len() as u64);
            out.extend_from_slice(data);
        }

        pub fn packed(out: &mut Vec<u8>, field: u32, values: &[u64]) {
            let mut data = Vec::new();
            for &v in values {
                varint(&mut data, v);
            }
            bytes(out, field, &data);
        }

        pub fn node(id: i64, lat: f64, lon: f64, keys: &[u64], vals: &[u64]) -> Vec<u8> {
            let mut out = Vec::new();
            uint(&mut out, 1, zigzag(id));
            if !keys.is_empty() {
                packed(&mut out, 2, keys);
                packed(&mut out, 3, vals);
            }
            uint(&mut out, 8, zigzag((lat * 1e7).round() as i64));
            uint(&mut out, 9, zigzag((lon * 1e7).round() as i64));
            out
        }

        pub fn way(id: i64, refs: &[i64], keys: &[u64], vals: &[u64]) -> Vec<u8> {
            let mut out = Vec::new();
            uint(&mut out, 1, id as u64);
            packed(&mut out, 2, keys);
            packed(&mut out, 3, vals);
            let mut last = 0;
            let deltas: Vec<u64> = refs
                .iter()
                .map(|&r| {
                    let delta = zigzag(r - last);
                    last = r;
                    delta
                })
                .collect();
            packed(&mut out, 8, &deltas);
            out
        }

        /// One uncompressed `OSMData` blob holding a group of nodes and a
        /// group of ways.
        pub fn file(strings: &[&str], nodes: &[Vec<u8>], ways: &[Vec<u8>]) -> Vec<u8> {
            let mut table = Vec::new();
            for s in strings {
                bytes(&mut table, 1, s.as_bytes());
            }
            let mut node_group = Vec::new();
            for n in nodes {
                bytes(&mut node_group, 1, n);
            }
            let mut way_group = Vec::new();
            for w in ways {
                bytes(&mut way_group, 3, w);
            }
            let mut block = Vec::new();
            bytes(&mut block, 1, &table);
            bytes(&mut block, 2, &node_group);
            bytes(&mut block, 2, &way_group);
            uint(&mut block, 17, 100);

            let mut blob = Vec::new();
            bytes(&mut blob, 1, &block);
            uint(&mut blob, 2, block.len() as u64);

            let mut header = Vec::new();
            bytes(&mut header, 1, b"OSMData");
            uint(&mut header, 3, blob.len() as u64);

            let mut out = (header.len() as u32).to_be_bytes().to_vec();
            out.extend(header);
            out.extend(blob);
            out
        }
    }

    #[test]
    fn test_osm_pbf_nodes_and_ways() {
        // string table index 0 is reserved
        let strings = ["", "amenity", "cafe", "highway", "path"];
        let nodes = [
            pbf::node(42, 52.53, 13.38, &[1], &[2]),
            pbf::node(1, 52.53, 13.38, &[], &[]),
            pbf::node(2, 52.531, 13.381, &[], &[]),
            pbf::node(3, 95.0, 13.38, &[], &[]),
        ];
        let ways = [
            pbf::way(42, &[1, 2], &[3], &[4]),
            pbf::way(43, &[1, 99], &[3], &[4]),
        ];
        let bytes = pbf::file(&strings, &nodes, &ways);

        let mut sink = Collect::default();
        let stats = parse(DataFormat::OsmPbf, &bytes, world(), &mut sink).unwrap();
        let elements = elements(&sink);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].qualified_id(), "node:42");
        assert_eq!(elements[0].tags.get("amenity").map(String::as_str), Some("cafe"));
        assert!((elements[0].geometry[0].lat - 52.53).abs() < 1e-6);
        assert_eq!(elements[1].qualified_id(), "way:42");
        assert_eq!(elements[1].geometry.len(), 2);
        assert!((elements[1].geometry[1].lng - 13.381).abs() < 1e-6);
        // node 3 is off the globe, way 43 references a missing node
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_osm_pbf_garbage_is_a_parse_failure() {
        let mut sink = Collect::default();
        let result = parse(DataFormat::OsmPbf, b"\x00\x00\x00\x05nope!", world(), &mut sink);
        assert!(matches!(result, Err(MapError::ParseFailure(_))));
    }

    #[test]
    fn test_geojson_sequence_and_early_stop() {
        let json = r#"
            {"type":"Feature","id":1,"geometry":{"type":"Point","coordinates":[1,1]},"properties":{}}
            {"type":"Feature","id":2,"geometry":{"type":"Point","coordinates":[2,2]},"properties":{}}
            {"type":"Feature","id":3,"geometry":{"type":"Point","coordinates":[3,3]},"properties":{}}
        "#;
        let mut sink = Collect {
            stop_after: Some(2),
            ..Collect::default()
        };
        let stats = parse(DataFormat::GeoJson, json.as_bytes(), world(), &mut sink).unwrap();
        assert_eq!(sink.records.len(), 2);
        assert!(stats.stopped);
    }

    #[test]
    fn test_geojson_garbage_is_a_parse_failure() {
        let mut sink = Collect::default();
        let result = parse(DataFormat::GeoJson, b"{ nope", world(), &mut sink);
        assert!(matches!(result, Err(MapError::ParseFailure(_))));
    }

    #[test]
    fn test_elevation_pushes_bands() {
        let side = 130;
        let bytes: Vec<u8> = (0..side * side).flat_map(|_| 5i16.to_be_bytes()).collect();
        let bounds = BoundingBox::from_coords(52.0, 13.0, 52.1, 13.1);
        let mut sink = Collect::default();
        let stats = parse(DataFormat::Elevation, &bytes, bounds, &mut sink).unwrap();
        // 130 rows in bands of 64 sharing boundary rows: 64 + 64 + 4
        assert_eq!(stats.records, 3);
        assert!(sink
            .records
            .iter()
            .all(|r| matches!(r, RawRecord::Terrain(g) if g.cols == side)));
    }

    #[test]
    fn test_format_names() {
        assert_eq!(DataFormat::from_name("GeoJSON"), Some(DataFormat::GeoJson));
        assert_eq!(DataFormat::from_name("osm"), Some(DataFormat::OsmXml));
        assert_eq!(DataFormat::from_name("ele"), Some(DataFormat::Elevation));
        assert_eq!(DataFormat::from_name("pbf"), Some(DataFormat::OsmPbf));
        assert_eq!(DataFormat::from_name("shapefile"), None);
        assert_eq!(DataFormat::OsmPbf.extension(), "osm.pbf");
        assert_eq!(DataFormat::Elevation.extension(), "ele");
    }
}
