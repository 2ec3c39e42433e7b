//! Points of interest from OSM PBF extracts.
//!
//! The file is read three times. Nodes come first and fill the coordinate
//! index, then ways get a centroid from their nodes, then relations get one
//! from their node and way members. Way centroids go back into the index so
//! relations can use them. [`OsmPipeline`] refuses to run a pass before the
//! passes it depends on.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use geo::{BoundingRect, Coord, LineString};
use indicatif::{ProgressBar, ProgressStyle};
use osmpbfreader::{OsmId, OsmObj, OsmPbfReader, Tags};
use tracing::{debug, info, warn};

use crate::config::{Config, OsmTagFilter};
use crate::error::{ConvertError, Result};
use crate::geometry::{resolve_members, CentroidAccumulator};
use crate::index::CoordinateIndex;
use crate::models::{BoundingBox, CanonicalPlace, Coordinate, ObjectKind};
use crate::output::PlaceSink;

pub const SOURCE: &str = "osm";

/// Top two bits of an index key carry the element type: 00 node, 01 way,
/// 10 relation. The remaining 62 bits are the raw id.
const WAY_KEY_PREFIX: u64 = 1 << 62;
const RELATION_KEY_PREFIX: u64 = 1 << 63;
const RAW_ID_MASK: u64 = (1 << 62) - 1;

/// Coordinate index key for an element. Zero, negative and oversized ids
/// have no key.
pub fn index_key(id: OsmId) -> Option<u64> {
    let (prefix, raw) = match id {
        OsmId::Node(id) => (0, id.0),
        OsmId::Way(id) => (WAY_KEY_PREFIX, id.0),
        OsmId::Relation(id) => (RELATION_KEY_PREFIX, id.0),
    };
    match u64::try_from(raw) {
        Ok(base) if base != 0 && base <= RAW_ID_MASK => Some(prefix | base),
        _ => {
            debug!("Skipped OSM element {:?}: unsupported id", id);
            None
        }
    }
}

/// Pass order. Each pass moves the pipeline to the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsmStage {
    Points,
    Lines,
    Composites,
    Done,
}

impl OsmStage {
    fn next(self) -> Self {
        match self {
            OsmStage::Points => OsmStage::Lines,
            OsmStage::Lines => OsmStage::Composites,
            OsmStage::Composites | OsmStage::Done => OsmStage::Done,
        }
    }

    fn label(self) -> &'static str {
        match self {
            OsmStage::Points => "points",
            OsmStage::Lines => "lines",
            OsmStage::Composites => "composites",
            OsmStage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsmStats {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    /// Matching ways and relations with no resolvable member.
    pub unresolved: usize,
}

/// Three-pass point → line → composite resolution over one extract.
pub struct OsmPipeline<'a> {
    config: &'a Config,
    index: CoordinateIndex,
    stage: OsmStage,
    stats: OsmStats,
}

impl<'a> OsmPipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            index: CoordinateIndex::new(),
            stage: OsmStage::Points,
            stats: OsmStats::default(),
        }
    }

    pub fn stage(&self) -> OsmStage {
        self.stage
    }

    pub fn index(&self) -> &CoordinateIndex {
        &self.index
    }

    pub fn stats(&self) -> OsmStats {
        self.stats
    }

    /// Run `stage` over a full read of the extract. A stage other than the
    /// current one is refused with a warning and emits nothing.
    pub fn run<I, S>(&mut self, stage: OsmStage, objects: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = OsmObj>,
        S: PlaceSink,
    {
        if stage != self.stage {
            warn!(
                "Refusing OSM {} pass while at stage {}",
                stage.label(),
                self.stage.label()
            );
            return Ok(0);
        }
        let emitted = match stage {
            OsmStage::Points => self.points(objects, sink)?,
            OsmStage::Lines => self.lines(objects, sink)?,
            OsmStage::Composites => self.composites(objects, sink)?,
            OsmStage::Done => 0,
        };
        self.stage = stage.next();
        Ok(emitted)
    }

    fn points<I, S>(&mut self, objects: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = OsmObj>,
        S: PlaceSink,
    {
        let mut emitted = 0;
        for obj in objects {
            let OsmObj::Node(node) = obj else { continue };
            let Some(key) = index_key(OsmId::Node(node.id)) else {
                continue;
            };
            let Some(location) = Coordinate::checked(node.lon(), node.lat()) else {
                continue;
            };
            self.index.put(key, location);

            if let Some(mut place) = self.assemble(ObjectKind::Node, node.id.0, &node.tags, location)
            {
                place.extra.accuracy = Some("point".to_string());
                sink.accept(place)?;
                emitted += 1;
            }
        }
        self.stats.nodes += emitted;
        info!("Indexed {} node coordinates", self.index.len());
        Ok(emitted)
    }

    fn lines<I, S>(&mut self, objects: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = OsmObj>,
        S: PlaceSink,
    {
        let mut emitted = 0;
        for obj in objects {
            let OsmObj::Way(way) = obj else { continue };
            let Some(key) = index_key(OsmId::Way(way.id)) else {
                continue;
            };
            let members: Vec<Coordinate> = way
                .nodes
                .iter()
                .filter_map(|node| index_key(OsmId::Node(*node)))
                .filter_map(|member| self.index.get(member))
                .collect();

            let mut acc = CentroidAccumulator::new();
            acc.extend(members.iter().copied());
            let Some(centroid) = acc.centroid() else {
                if self.matching_filter(&way.tags).is_some() {
                    self.stats.unresolved += 1;
                }
                continue;
            };
            self.index.put(key, centroid);

            if let Some(mut place) = self.assemble(ObjectKind::Way, way.id.0, &way.tags, centroid) {
                place.bbox = bounding_box(&members);
                place.extra.accuracy = Some("centroid".to_string());
                sink.accept(place)?;
                emitted += 1;
            }
        }
        self.stats.ways += emitted;
        info!("Indexed {} node and way coordinates", self.index.len());
        Ok(emitted)
    }

    fn composites<I, S>(&mut self, objects: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = OsmObj>,
        S: PlaceSink,
    {
        let mut emitted = 0;
        for obj in objects {
            let OsmObj::Relation(relation) = obj else {
                continue;
            };
            if self.matching_filter(&relation.tags).is_none() {
                continue;
            }
            let members = relation.refs.iter().filter_map(|r| match r.member {
                OsmId::Node(_) | OsmId::Way(_) => index_key(r.member),
                OsmId::Relation(_) => None,
            });
            let acc = resolve_members(members, &self.index);
            let Some(centroid) = acc.centroid() else {
                debug!("Relation {} has no resolvable members", relation.id.0);
                self.stats.unresolved += 1;
                continue;
            };

            if let Some(mut place) =
                self.assemble(ObjectKind::Relation, relation.id.0, &relation.tags, centroid)
            {
                place.bbox = acc.bbox();
                place.extra.accuracy = Some("centroid".to_string());
                sink.accept(place)?;
                emitted += 1;
            }
        }
        self.stats.relations += emitted;
        Ok(emitted)
    }

    fn matching_filter(&self, tags: &Tags) -> Option<&'a OsmTagFilter> {
        let filters: &'a [OsmTagFilter] = &self.config.osm.filters;
        filters.iter().find(|filter| filter_matches(filter, tags))
    }

    /// Named element matching a filter, or `None`.
    fn assemble(
        &self,
        kind: ObjectKind,
        id: i64,
        tags: &Tags,
        centroid: Coordinate,
    ) -> Option<CanonicalPlace> {
        let filter = self.matching_filter(tags)?;
        let name = tags.get("name")?;

        let mut place = CanonicalPlace::new(format!("OSM:{}:{}", kind, id), kind, centroid, SOURCE);
        place.importance = self.config.importance.importance(filter.popularity);
        place.name.name = Some(name.to_string());
        place.name.alt_name = tags.get("alt_name").map(|n| n.to_string());
        for filter in self
            .config
            .osm
            .filters
            .iter()
            .filter(|filter| filter_matches(filter, tags))
        {
            if let Some(value) = tags.get(filter.key.as_str()) {
                place.add_category(format!("osm.poi.{}.{}", filter.key, value));
            }
        }
        extract_address(&mut place, tags);
        place.extra.id = Some(place.place_id.clone());
        place.extra.tags = place.categories.clone();
        Some(place)
    }
}

fn filter_matches(filter: &OsmTagFilter, tags: &Tags) -> bool {
    match (tags.get(filter.key.as_str()), filter.value.as_deref()) {
        (Some(_), None) => true,
        (Some(actual), Some(wanted)) => actual.as_str() == wanted,
        (None, _) => false,
    }
}

fn extract_address(place: &mut CanonicalPlace, tags: &Tags) {
    for (key, value) in tags.iter() {
        match key.as_str() {
            "addr:street" => place.address.street = Some(value.to_string()),
            "addr:housenumber" => place.address.housenumber = Some(value.to_string()),
            "addr:city" => place.address.city = Some(value.to_string()),
            "addr:county" => place.address.county = Some(value.to_string()),
            "addr:postcode" => place.postcode = Some(value.to_string()),
            "addr:country" => place.country_code = value.to_lowercase(),
            _ => {}
        }
    }
}

fn bounding_box(members: &[Coordinate]) -> Option<BoundingBox> {
    let line: LineString<f64> = members
        .iter()
        .map(|c| Coord { x: c.lon, y: c.lat })
        .collect();
    let rect = line.bounding_rect()?;
    Some(BoundingBox::new(
        rect.min().x,
        rect.min().y,
        rect.max().x,
        rect.max().y,
    ))
}

fn spinner(stage: OsmStage) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = "{spinner:.green} [{elapsed_precise}] {msg} {pos} ({per_sec})";
    if let Ok(style) = ProgressStyle::default_spinner().template(template) {
        pb.set_style(style);
    }
    pb.set_message(format!("OSM {} pass", stage.label()));
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

/// Convert one extract, reading it once per stage.
pub fn convert<S: PlaceSink>(path: &Path, config: &Config, sink: &mut S) -> Result<OsmStats> {
    info!("Converting map features from {}", path.display());
    let file = File::open(path).map_err(|source| ConvertError::Open {
        source,
        path: path.to_path_buf(),
    })?;
    let mut reader = OsmPbfReader::new(BufReader::new(file));
    let mut pipeline = OsmPipeline::new(config);

    for (n, stage) in [OsmStage::Points, OsmStage::Lines, OsmStage::Composites]
        .into_iter()
        .enumerate()
    {
        info!("Pass {}/3: {}...", n + 1, stage.label());
        reader.rewind()?;
        let pb = spinner(stage);
        let objects = reader.iter().filter_map(|obj| {
            pb.inc(1);
            match obj {
                Ok(obj) => Some(obj),
                Err(e) => {
                    warn!("Error reading OSM object: {}", e);
                    None
                }
            }
        });
        let emitted = pipeline.run(stage, objects, sink)?;
        pb.finish_and_clear();
        info!("Pass {}/3 emitted {} places", n + 1, emitted);
    }

    let stats = pipeline.stats();
    info!(
        "Converted {} nodes, {} ways and {} relations ({} unresolved)",
        stats.nodes, stats.ways, stats.relations, stats.unresolved
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmpbfreader::{Node, NodeId, Ref, Relation, RelationId, Way, WayId};

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        let mut tags = Tags::new();
        for (k, v) in pairs {
            tags.insert((*k).into(), (*v).into());
        }
        tags
    }

    fn node(id: i64, lon: f64, lat: f64, pairs: &[(&str, &str)]) -> OsmObj {
        OsmObj::Node(Node {
            id: NodeId(id),
            tags: tags(pairs),
            decimicro_lat: (lat * 1e7).round() as i32,
            decimicro_lon: (lon * 1e7).round() as i32,
        })
    }

    fn way(id: i64, nodes: &[i64], pairs: &[(&str, &str)]) -> OsmObj {
        OsmObj::Way(Way {
            id: WayId(id),
            tags: tags(pairs),
            nodes: nodes.iter().map(|n| NodeId(*n)).collect(),
        })
    }

    fn relation(id: i64, members: &[OsmId], pairs: &[(&str, &str)]) -> OsmObj {
        OsmObj::Relation(Relation {
            id: RelationId(id),
            tags: tags(pairs),
            refs: members
                .iter()
                .map(|member| Ref {
                    member: *member,
                    role: "outer".into(),
                })
                .collect(),
        })
    }

    const MUSEUM: &[(&str, &str)] = &[("tourism", "museum"), ("name", "Domkirkeodden")];

    fn extract() -> Vec<OsmObj> {
        vec![
            relation(
                30,
                &[OsmId::Way(WayId(20)), OsmId::Node(NodeId(4))],
                &[("tourism", "attraction"), ("name", "Hamar")],
            ),
            way(20, &[1, 2, 3, 1], MUSEUM),
            way(21, &[1, 2], &[("highway", "footway")]),
            node(1, 11.0, 60.0, &[]),
            node(2, 11.2, 60.0, &[]),
            node(3, 11.2, 60.2, &[]),
            node(4, 12.0, 61.0, &[("amenity", "hospital"), ("name", "Sykehuset")]),
            node(5, 12.0, 61.0, &[("amenity", "bench")]),
        ]
    }

    fn run_all(config: &Config) -> (OsmPipeline<'_>, Vec<CanonicalPlace>) {
        let mut pipeline = OsmPipeline::new(config);
        let mut places = Vec::new();
        for stage in [OsmStage::Points, OsmStage::Lines, OsmStage::Composites] {
            pipeline.run(stage, extract(), &mut places).unwrap();
        }
        (pipeline, places)
    }

    #[test]
    fn test_index_keys_are_tagged() {
        assert_eq!(index_key(OsmId::Node(NodeId(7))), Some(7));
        assert_eq!(index_key(OsmId::Way(WayId(7))), Some((1 << 62) | 7));
        assert_eq!(index_key(OsmId::Relation(RelationId(7))), Some((1 << 63) | 7));
        assert_eq!(index_key(OsmId::Node(NodeId(0))), None);
        assert_eq!(index_key(OsmId::Way(WayId(-3))), None);
        assert_eq!(index_key(OsmId::Node(NodeId(1 << 62))), None);
    }

    #[test]
    fn test_three_passes_emit_in_order() {
        let config = Config::default();
        let (pipeline, places) = run_all(&config);

        let ids: Vec<_> = places.iter().map(|p| p.place_id.as_str()).collect();
        assert_eq!(ids, vec!["OSM:N:4", "OSM:W:20", "OSM:R:30"]);
        assert_eq!(pipeline.stage(), OsmStage::Done);
        assert_eq!(
            pipeline.stats(),
            OsmStats {
                nodes: 1,
                ways: 1,
                relations: 1,
                unresolved: 0,
            }
        );
    }

    #[test]
    fn test_node_place() {
        let config = Config::default();
        let (_, places) = run_all(&config);
        let hospital = &places[0];

        assert_eq!(hospital.object_type, ObjectKind::Node);
        assert_eq!(hospital.name.name.as_deref(), Some("Sykehuset"));
        assert_eq!(hospital.categories, vec!["osm.poi.amenity.hospital"]);
        assert_eq!(hospital.importance, config.importance.importance(80.0));
        assert_eq!(hospital.extra.accuracy.as_deref(), Some("point"));
    }

    #[test]
    fn test_way_centroid_and_bbox() {
        let config = Config::default();
        let (_, places) = run_all(&config);
        let museum = &places[1];

        // Closed ring: the first node counts twice.
        assert!((museum.centroid.lon - 11.1).abs() < 1e-6);
        assert!((museum.centroid.lat - 60.05).abs() < 1e-6);
        let bbox = museum.bbox.unwrap();
        assert!((bbox.min.lon - 11.0).abs() < 1e-6);
        assert!((bbox.max.lat - 60.2).abs() < 1e-6);
        assert_eq!(museum.categories, vec!["osm.poi.tourism.museum"]);
    }

    #[test]
    fn test_relation_uses_way_centroid() {
        let config = Config::default();
        let (_, places) = run_all(&config);
        let relation = &places[2];

        assert_eq!(relation.object_type, ObjectKind::Relation);
        assert!((relation.centroid.lon - (11.1 + 12.0) / 2.0).abs() < 1e-6);
        assert!((relation.centroid.lat - (60.05 + 61.0) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_composites_after_points_only_is_empty() {
        let config = Config::default();
        let mut pipeline = OsmPipeline::new(&config);
        let mut places = Vec::new();

        pipeline.run(OsmStage::Points, extract(), &mut places).unwrap();
        let before = places.len();
        let emitted = pipeline
            .run(OsmStage::Composites, extract(), &mut places)
            .unwrap();

        assert_eq!(emitted, 0);
        assert_eq!(places.len(), before);
        assert_eq!(pipeline.stage(), OsmStage::Lines);
    }

    #[test]
    fn test_way_without_indexed_nodes_is_dropped() {
        let config = Config::default();
        let mut pipeline = OsmPipeline::new(&config);
        let mut places = Vec::new();

        pipeline.run(OsmStage::Points, Vec::new(), &mut places).unwrap();
        pipeline
            .run(OsmStage::Lines, vec![way(20, &[1, 2, 3], MUSEUM)], &mut places)
            .unwrap();

        assert!(places.is_empty());
        assert_eq!(pipeline.stats().unresolved, 1);
    }

    #[test]
    fn test_address_tags() {
        let config = Config::default();
        let mut pipeline = OsmPipeline::new(&config);
        let mut places = Vec::new();
        let cinema = node(
            9,
            10.75,
            59.91,
            &[
                ("amenity", "cinema"),
                ("name", "Colosseum"),
                ("alt_name", "Colosseum kino"),
                ("addr:street", "Fridtjof Nansens vei"),
                ("addr:housenumber", "6"),
                ("addr:postcode", "0369"),
                ("addr:city", "Oslo"),
            ],
        );
        pipeline.run(OsmStage::Points, vec![cinema], &mut places).unwrap();

        let place = &places[0];
        assert_eq!(place.name.alt_name.as_deref(), Some("Colosseum kino"));
        assert_eq!(place.address.street.as_deref(), Some("Fridtjof Nansens vei"));
        assert_eq!(place.address.housenumber.as_deref(), Some("6"));
        assert_eq!(place.postcode.as_deref(), Some("0369"));
        // amenity=cinema and the amenity wildcard both match
        assert_eq!(place.categories, vec!["osm.poi.amenity.cinema"]);
        assert_eq!(place.importance, config.importance.importance(40.0));
    }
}
