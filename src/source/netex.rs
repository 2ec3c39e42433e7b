//! Stop place registry in NeTEx XML.
//!
//! Three forward scans over the same file: `topographicPlaces` builds the
//! hierarchy table, `stopPlaces` emits stops and remembers their
//! coordinates and popularity, `groupsOfStopPlaces` emits groups scored
//! from their members.

use std::path::Path;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::geometry::centroid_of;
use crate::hierarchy::{HierarchyEntry, HierarchyTable, ResolvedHierarchy, UnitKind};
use crate::index::CoordinateIndex;
use crate::models::{CanonicalPlace, Coordinate, ObjectKind};
use crate::output::PlaceSink;
use crate::popularity::group_popularity;
use crate::reader::{ElementStream, FromElement, XmlElement};

pub const SOURCE: &str = "nsr";
const DEFAULT_COUNTRY: &str = "no";

const TOPOGRAPHIC_PLACES: &str = "topographicPlaces";
const STOP_PLACES: &str = "stopPlaces";
const GROUPS_OF_STOP_PLACES: &str = "groupsOfStopPlaces";

impl FromElement for HierarchyEntry {
    fn from_element(element: &XmlElement) -> Option<Self> {
        Some(Self {
            id: element.attr("id")?.to_string(),
            name: element.text_at(&["Descriptor", "Name"]).map(str::to_string),
            kind: element
                .text_at(&["TopographicPlaceType"])
                .map(UnitKind::parse)
                .unwrap_or(UnitKind::Other),
            parent: element
                .child("ParentTopographicPlaceRef")
                .and_then(|r| r.attr("ref"))
                .map(str::to_string),
            country_code: element
                .child("CountryRef")
                .and_then(|r| r.attr("ref"))
                .map(str::to_lowercase),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopPlace {
    pub id: String,
    pub name: String,
    pub alt_names: Vec<String>,
    pub centroid: Option<Coordinate>,
    pub transport_mode: Option<String>,
    pub stop_place_type: Option<String>,
    pub weighting: Option<String>,
    pub topographic_place_ref: Option<String>,
    pub parent_site_ref: Option<String>,
    pub tariff_zones: Vec<String>,
}

impl StopPlace {
    /// Multimodal parents carry neither mode nor type of their own.
    pub fn is_multimodal_parent(&self) -> bool {
        self.transport_mode.is_none() && self.stop_place_type.is_none()
    }
}

impl FromElement for StopPlace {
    fn from_element(element: &XmlElement) -> Option<Self> {
        let mut tariff_zones: Vec<String> = ["tariffZones", "fareZones"]
            .iter()
            .filter_map(|container| element.child(container))
            .flat_map(|zones| zones.children.iter())
            .filter_map(|zone| zone.attr("ref"))
            .map(str::to_string)
            .collect();
        tariff_zones.dedup();

        Some(Self {
            id: element.attr("id")?.to_string(),
            name: element.text_at(&["Name"])?.to_string(),
            alt_names: alternative_names(element),
            centroid: location(element),
            transport_mode: element.text_at(&["TransportMode"]).map(str::to_string),
            stop_place_type: element.text_at(&["StopPlaceType"]).map(str::to_string),
            weighting: element.text_at(&["Weighting"]).map(str::to_string),
            topographic_place_ref: element
                .child("TopographicPlaceRef")
                .and_then(|r| r.attr("ref"))
                .map(str::to_string),
            parent_site_ref: element
                .child("ParentSiteRef")
                .and_then(|r| r.attr("ref"))
                .map(str::to_string),
            tariff_zones,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupOfStopPlaces {
    pub id: String,
    pub name: String,
    pub alt_names: Vec<String>,
    pub members: Vec<String>,
    pub centroid: Option<Coordinate>,
}

impl FromElement for GroupOfStopPlaces {
    fn from_element(element: &XmlElement) -> Option<Self> {
        let members = element
            .child("members")
            .map(|m| {
                m.children_named("StopPlaceRef")
                    .filter_map(|r| r.attr("ref"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id: element.attr("id")?.to_string(),
            name: element.text_at(&["Name"])?.to_string(),
            alt_names: alternative_names(element),
            members,
            centroid: location(element),
        })
    }
}

fn alternative_names(element: &XmlElement) -> Vec<String> {
    element
        .child("alternativeNames")
        .map(|names| {
            names
                .children_named("AlternativeName")
                .filter_map(|n| n.text_at(&["Name"]))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn location(element: &XmlElement) -> Option<Coordinate> {
    let location = element.path(&["Centroid", "Location"])?;
    let lon = location.text_at(&["Longitude"])?.parse().ok()?;
    let lat = location.text_at(&["Latitude"])?.parse().ok()?;
    Coordinate::checked(lon, lat)
}

/// Numeric suffix of an id such as `NSR:StopPlace:123`, used as index key.
fn numeric_key(id: &str) -> Option<u64> {
    id.rsplit(':').next()?.parse().ok().filter(|&n| n != 0)
}

/// Counts reported after a conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetexStats {
    pub topographic_places: usize,
    pub stop_places: usize,
    pub groups: usize,
    pub skipped: usize,
}

/// Pass 1: administrative units. An absent container yields an empty table.
pub fn build_hierarchy(path: &Path) -> Result<HierarchyTable> {
    info!("Pass 1/3: Reading topographic places...");
    let Some(stream) = ElementStream::open(path, TOPOGRAPHIC_PLACES, &["TopographicPlace"])? else {
        warn!("No <{}> in {}", TOPOGRAPHIC_PLACES, path.display());
        return Ok(HierarchyTable::new());
    };
    let mut table = HierarchyTable::new();
    for entry in stream.typed::<HierarchyEntry>() {
        table.insert(entry?);
    }
    info!("Loaded {} topographic places", table.len());
    Ok(table)
}

/// Convert a NeTEx file. `hierarchy` may come from this or another file.
pub fn convert<S: PlaceSink>(
    path: &Path,
    hierarchy: &HierarchyTable,
    config: &Config,
    sink: &mut S,
) -> Result<NetexStats> {
    let mut conversion = StopPlaceConversion::new(config, hierarchy);
    conversion.stats.topographic_places = hierarchy.len();

    info!("Pass 2/3: Converting stop places...");
    let stream = ElementStream::open(path, STOP_PLACES, &["StopPlace"])?.ok_or_else(|| {
        ConvertError::MissingContainer {
            container: STOP_PLACES,
            path: path.to_path_buf(),
        }
    })?;
    let mut stops = stream.typed::<StopPlace>();
    for stop in stops.by_ref() {
        conversion.add_stop_place(stop?, sink)?;
    }
    conversion.stats.skipped += stops.skipped();
    conversion.finish_stop_places(sink)?;

    info!("Pass 3/3: Converting groups of stop places...");
    match ElementStream::open(path, GROUPS_OF_STOP_PLACES, &["GroupOfStopPlaces"])? {
        Some(stream) => {
            let mut groups = stream.typed::<GroupOfStopPlaces>();
            for group in groups.by_ref() {
                conversion.add_group(group?, sink)?;
            }
            conversion.stats.skipped += groups.skipped();
        }
        None => debug!("No groups of stop places in {}", path.display()),
    }

    let stats = conversion.stats;
    info!(
        "Converted {} stop places and {} groups ({} skipped)",
        stats.stop_places, stats.groups, stats.skipped
    );
    Ok(stats)
}

#[derive(Debug, Clone, Default)]
struct StopSummary {
    popularity: f64,
    topographic_place_ref: Option<String>,
    modes: Vec<String>,
}

/// Per-file state: coordinates, popularity and modes of every stop seen.
pub struct StopPlaceConversion<'a> {
    config: &'a Config,
    hierarchy: &'a HierarchyTable,
    coordinates: CoordinateIndex,
    stops: HashMap<String, StopSummary>,
    /// Child popularity and modes per parent id, read only for deferred parents.
    children: HashMap<String, StopSummary>,
    pending_parents: Vec<StopPlace>,
    stats: NetexStats,
}

impl<'a> StopPlaceConversion<'a> {
    pub fn new(config: &'a Config, hierarchy: &'a HierarchyTable) -> Self {
        Self {
            config,
            hierarchy,
            coordinates: CoordinateIndex::new(),
            stops: HashMap::new(),
            children: HashMap::new(),
            pending_parents: Vec::new(),
            stats: NetexStats::default(),
        }
    }

    /// `default * type factor * interchange factor`.
    pub fn stop_place_popularity(&self, stop: &StopPlace) -> f64 {
        let cfg = &self.config.stop_place;
        let type_factor = stop
            .stop_place_type
            .as_ref()
            .and_then(|t| cfg.stop_type_factors.get(t))
            .or_else(|| {
                stop.transport_mode
                    .as_ref()
                    .and_then(|m| cfg.stop_type_factors.get(m))
            })
            .copied()
            .unwrap_or(1.0);
        let interchange_factor = stop
            .weighting
            .as_ref()
            .and_then(|w| cfg.interchange_factors.get(w))
            .copied()
            .unwrap_or(1.0);
        cfg.default_popularity * type_factor * interchange_factor
    }

    /// Popularity of a group from the members seen so far.
    pub fn group_popularity(&self, group: &GroupOfStopPlaces) -> f64 {
        let members = group
            .members
            .iter()
            .filter_map(|id| self.stops.get(id))
            .map(|s| s.popularity);
        group_popularity(self.config.group_of_stop_places.boost_factor, members)
    }

    pub fn add_stop_place<S: PlaceSink>(&mut self, stop: StopPlace, sink: &mut S) -> Result<()> {
        if stop.is_multimodal_parent() {
            self.pending_parents.push(stop);
            return Ok(());
        }

        let popularity = self.stop_place_popularity(&stop);
        let modes: Vec<String> = stop.transport_mode.iter().cloned().collect();

        if let Some(parent) = &stop.parent_site_ref {
            let summary = self.children.entry(parent.clone()).or_default();
            summary.popularity += popularity;
            for mode in &modes {
                if !summary.modes.contains(mode) {
                    summary.modes.push(mode.clone());
                }
            }
        }

        let mut categories = Vec::new();
        categories.extend(stop.stop_place_type.clone());
        self.emit_stop(stop, popularity, modes, categories, sink)
    }

    /// Emit multimodal parents once all their children have been seen.
    pub fn finish_stop_places<S: PlaceSink>(&mut self, sink: &mut S) -> Result<()> {
        for parent in std::mem::take(&mut self.pending_parents) {
            let children = self.children.remove(&parent.id).unwrap_or_default();
            let popularity = if children.popularity > 0.0 {
                children.popularity
            } else {
                self.config.stop_place.default_popularity
            };
            let categories = vec!["multimodal".to_string()];
            self.emit_stop(parent, popularity, children.modes, categories, sink)?;
        }
        Ok(())
    }

    fn emit_stop<S: PlaceSink>(
        &mut self,
        stop: StopPlace,
        popularity: f64,
        modes: Vec<String>,
        categories: Vec<String>,
        sink: &mut S,
    ) -> Result<()> {
        let Some(centroid) = stop.centroid else {
            debug!("Stop place {} has no centroid, skipping", stop.id);
            self.stats.skipped += 1;
            return Ok(());
        };

        if let Some(key) = numeric_key(&stop.id) {
            self.coordinates.put(key, centroid);
        }
        self.stops.insert(
            stop.id.clone(),
            StopSummary {
                popularity,
                topographic_place_ref: stop.topographic_place_ref.clone(),
                modes: modes.clone(),
            },
        );

        let hierarchy = stop
            .topographic_place_ref
            .as_deref()
            .map(|r| self.hierarchy.resolve(r))
            .unwrap_or_default();

        let mut place = CanonicalPlace::new(stop.id.clone(), ObjectKind::Node, centroid, SOURCE);
        place.name.name = Some(stop.name);
        place.name.alt_name = join_alt_names(stop.alt_names);
        for category in categories {
            place.add_category(category);
        }
        if place.categories.is_empty() {
            place.add_category("StopPlace");
        }
        place.importance = self.config.importance.importance(popularity);
        place.extra.transport_modes = modes;
        place.extra.tariff_zones = stop.tariff_zones;
        apply_hierarchy(&mut place, &hierarchy);
        finish_extra(&mut place);

        self.stats.stop_places += 1;
        sink.accept(place)
    }

    pub fn add_group<S: PlaceSink>(&mut self, group: GroupOfStopPlaces, sink: &mut S) -> Result<()> {
        let centroid = group.centroid.or_else(|| {
            centroid_of(
                group.members.iter().filter_map(|id| numeric_key(id)),
                &self.coordinates,
            )
        });
        let Some(centroid) = centroid else {
            debug!("Group {} has no resolvable location, skipping", group.id);
            self.stats.skipped += 1;
            return Ok(());
        };

        let popularity = self.group_popularity(&group);
        let hierarchy = group
            .members
            .iter()
            .filter_map(|id| self.stops.get(id))
            .find_map(|s| s.topographic_place_ref.as_deref())
            .map(|r| self.hierarchy.resolve(r))
            .unwrap_or_default();

        let mut modes: Vec<String> = Vec::new();
        for member in group.members.iter().filter_map(|id| self.stops.get(id)) {
            for mode in &member.modes {
                if !modes.contains(mode) {
                    modes.push(mode.clone());
                }
            }
        }

        let mut place = CanonicalPlace::new(group.id.clone(), ObjectKind::Relation, centroid, SOURCE);
        place.rank_address = 16;
        place.name.name = Some(group.name);
        place.name.alt_name = join_alt_names(group.alt_names);
        place.add_category("GroupOfStopPlaces");
        place.importance = self.config.importance.importance(popularity);
        place.extra.transport_modes = modes;
        apply_hierarchy(&mut place, &hierarchy);
        finish_extra(&mut place);

        self.stats.groups += 1;
        sink.accept(place)
    }
}

fn apply_hierarchy(place: &mut CanonicalPlace, hierarchy: &ResolvedHierarchy) {
    if let Some(locality) = &hierarchy.locality {
        place.address.city = locality.name.clone();
        place.extra.locality_gid = Some(locality.id.clone());
    }
    if let Some(county) = &hierarchy.county {
        place.address.county = county.name.clone();
        place.extra.county_gid = Some(county.id.clone());
    }
    place.country_code = hierarchy
        .country_code
        .clone()
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
}

/// Alternative names as one `;`-separated value, the form Stedsnavn uses.
fn join_alt_names(names: Vec<String>) -> Option<String> {
    (!names.is_empty()).then(|| names.join(";"))
}

fn finish_extra(place: &mut CanonicalPlace) {
    place.extra.id = Some(place.place_id.clone());
    place.extra.accuracy = Some("point".to_string());
    place.extra.tags = place.categories.clone();
}
