//! Place names from the Stedsnavn GML feature collection.

use std::io::BufRead;
use std::path::Path;

use tracing::{debug, info};

use super::{county_gid, municipality_gid};
use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::geometry::{CentroidAccumulator, Crs};
use crate::hierarchy::HierarchyTable;
use crate::models::{CanonicalPlace, Coordinate, ObjectKind};
use crate::output::PlaceSink;
use crate::reader::{ElementStream, FromElement, XmlElement};

pub const SOURCE: &str = "kartverket-stedsnavn";
const CONTAINER: &str = "FeatureCollection";
const WRAPPERS: &[&str] = &["featureMember", "member"];
const ACTIVE: &str = "aktiv";

/// One named place.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedPlace {
    pub id: String,
    pub place_type: String,
    pub name: String,
    pub alt_names: Vec<String>,
    pub municipality_code: Option<String>,
    pub municipality_name: Option<String>,
    pub county_code: Option<String>,
    pub county_name: Option<String>,
    pub status: Option<String>,
    pub centroid: Coordinate,
}

impl NamedPlace {
    pub fn is_active(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == ACTIVE)
    }
}

impl FromElement for NamedPlace {
    fn from_element(wrapper: &XmlElement) -> Option<Self> {
        let feature = wrapper.children.first()?;
        let text = |name: &str| {
            feature
                .descendants(name)
                .into_iter()
                .find_map(XmlElement::text)
                .map(str::to_string)
        };

        let mut names = feature
            .descendants("komplettskrivemåte")
            .into_iter()
            .chain(feature.descendants("skrivemåte"))
            .filter_map(XmlElement::text)
            .map(str::to_string);
        let name = names.next()?;
        let mut alt_names: Vec<String> = Vec::new();
        for alt in names {
            if alt != name && !alt_names.contains(&alt) {
                alt_names.push(alt);
            }
        }

        Some(Self {
            id: text("stedsnummer")?,
            place_type: text("navneobjekttype")?,
            name,
            alt_names,
            municipality_code: text("kommunenummer"),
            municipality_name: text("kommunenavn"),
            county_code: text("fylkesnummer"),
            county_name: text("fylkesnavn"),
            status: text("stedstatus"),
            centroid: feature_centroid(feature)?,
        })
    }
}

/// Mean of every `pos`/`posList` pair under the feature.
fn feature_centroid(feature: &XmlElement) -> Option<Coordinate> {
    let crs = srs_name(feature)
        .map(Crs::from_srs_name)
        .unwrap_or(Some(Crs::default()))?;

    let mut acc = CentroidAccumulator::new();
    for list in feature
        .descendants("pos")
        .into_iter()
        .chain(feature.descendants("posList"))
    {
        let dimension = list
            .attr("srsDimension")
            .and_then(|d| d.parse::<usize>().ok())
            .filter(|d| *d >= 2)
            .unwrap_or(2);
        let values: Vec<f64> = list
            .text
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        for tuple in values.chunks_exact(dimension) {
            acc.add(crs.to_wgs84(tuple[0], tuple[1])?);
        }
    }
    acc.centroid()
}

fn srs_name(element: &XmlElement) -> Option<&str> {
    element
        .attr("srsName")
        .or_else(|| element.children.iter().find_map(srs_name))
}

fn rank_for(place_type: &str) -> u8 {
    match place_type {
        "by" => 16,
        "tettsted" => 18,
        "bydel" | "tettsteddel" => 20,
        _ => 22,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StedsnavnStats {
    pub places: usize,
    pub filtered: usize,
    pub skipped: usize,
}

/// Convert one feature collection. A file without a `FeatureCollection`
/// root is a structural failure.
pub fn convert<S: PlaceSink>(
    path: &Path,
    hierarchy: Option<&HierarchyTable>,
    config: &Config,
    sink: &mut S,
) -> Result<StedsnavnStats> {
    info!("Converting place names from {}", path.display());
    let stream = ElementStream::open(path, CONTAINER, WRAPPERS)?.ok_or_else(|| {
        ConvertError::MissingContainer {
            container: CONTAINER,
            path: path.to_path_buf(),
        }
    })?;
    convert_stream(stream, hierarchy, config, sink)
}

pub fn convert_stream<R: BufRead, S: PlaceSink>(
    stream: ElementStream<R>,
    hierarchy: Option<&HierarchyTable>,
    config: &Config,
    sink: &mut S,
) -> Result<StedsnavnStats> {
    let mut stats = StedsnavnStats::default();
    let mut records = stream.typed::<NamedPlace>();
    for record in records.by_ref() {
        let record = record?;
        let popularity = match config.stedsnavn.place_types.get(&record.place_type) {
            Some(&popularity) if record.is_active() => popularity,
            _ => {
                debug!("Filtered {} ({})", record.id, record.place_type);
                stats.filtered += 1;
                continue;
            }
        };
        sink.accept(assemble(record, popularity, hierarchy, config))?;
        stats.places += 1;
    }
    stats.skipped = records.skipped();

    info!(
        "Converted {} place names ({} filtered, {} skipped)",
        stats.places, stats.filtered, stats.skipped
    );
    Ok(stats)
}

fn assemble(
    record: NamedPlace,
    popularity: f64,
    hierarchy: Option<&HierarchyTable>,
    config: &Config,
) -> CanonicalPlace {
    let mut place = CanonicalPlace::new(
        format!("KVE:TopographicPlace:{}", record.id),
        ObjectKind::Node,
        record.centroid,
        SOURCE,
    );
    place.rank_address = rank_for(&record.place_type);
    place.importance = config.importance.importance(popularity);
    place.name.name = Some(record.name);
    place.name.alt_name = Some(record.alt_names.join(";")).filter(|n| !n.is_empty());
    place.add_category(record.place_type.as_str());

    if let Some(code) = record.municipality_code.as_deref() {
        let locality_gid = municipality_gid(code);
        let resolved = hierarchy
            .map(|table| table.resolve(&locality_gid))
            .unwrap_or_default();
        place.address.city = resolved
            .locality
            .and_then(|l| l.name)
            .or(record.municipality_name);
        match resolved.county {
            Some(county) => {
                place.address.county = county.name;
                place.extra.county_gid = Some(county.id);
            }
            None => {
                place.address.county = record.county_name;
                place.extra.county_gid = Some(match record.county_code.as_deref() {
                    Some(county) => format!("KVE:TopographicPlace:{}", county),
                    None => county_gid(code),
                });
            }
        }
        if let Some(cc) = resolved.country_code {
            place.country_code = cc;
        }
        place.extra.locality_gid = Some(locality_gid);
    } else {
        place.address.city = record.municipality_name;
        place.address.county = record.county_name;
    }

    place.extra.id = Some(place.place_id.clone());
    place.extra.accuracy = Some("point".to_string());
    place.extra.tags = place.categories.clone();
    place
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: &str, kind: &str, status: &str, geometry: &str) -> String {
        format!(
            r#"<wfs:member>
  <app:Sted gml:id="sted.{id}">
    <app:stedsnummer>{id}</app:stedsnummer>
    <app:stedstatus>{status}</app:stedstatus>
    <app:navneobjekttype>{kind}</app:navneobjekttype>
    <app:posisjon>{geometry}</app:posisjon>
    <app:stedsnavn>
      <app:Stedsnavn>
        <app:skrivemåte><app:Skrivemåte><app:komplettskrivemåte>Moelv</app:komplettskrivemåte></app:Skrivemåte></app:skrivemåte>
        <app:skrivemåte><app:Skrivemåte><app:komplettskrivemåte>Mølv</app:komplettskrivemåte></app:Skrivemåte></app:skrivemåte>
      </app:Stedsnavn>
    </app:stedsnavn>
    <app:kommune>
      <app:Kommune>
        <app:kommunenummer>3411</app:kommunenummer>
        <app:kommunenavn>Ringsaker</app:kommunenavn>
        <app:fylkesnummer>34</app:fylkesnummer>
        <app:fylkesnavn>Innlandet</app:fylkesnavn>
      </app:Kommune>
    </app:kommune>
  </app:Sted>
</wfs:member>"#
        )
    }

    fn collection(features: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:app="http://skjema.geonorge.no/SOSI/produktspesifikasjon/StedsnavnForVanligBruk/20181115">
{}
</wfs:FeatureCollection>"#,
            features.join("\n")
        )
    }

    const POINT: &str = r#"<gml:Point srsName="urn:ogc:def:crs:EPSG::25833"><gml:pos>311734.14 6755518.26</gml:pos></gml:Point>"#;

    fn run(doc: &str) -> (StedsnavnStats, Vec<CanonicalPlace>) {
        let stream = ElementStream::from_reader(doc.as_bytes(), CONTAINER, WRAPPERS)
            .unwrap()
            .unwrap();
        let mut places = Vec::new();
        let stats = convert_stream(stream, None, &Config::default(), &mut places).unwrap();
        (stats, places)
    }

    #[test]
    fn test_point_feature() {
        let (stats, places) = run(&collection(&[feature("1001", "tettsted", "aktiv", POINT)]));
        assert_eq!(stats.places, 1);

        let place = &places[0];
        assert_eq!(place.place_id, "KVE:TopographicPlace:1001");
        assert_eq!(place.name.name.as_deref(), Some("Moelv"));
        assert_eq!(place.name.alt_name.as_deref(), Some("Mølv"));
        assert_eq!(place.categories, vec!["tettsted"]);
        assert_eq!(place.address.city.as_deref(), Some("Ringsaker"));
        assert_eq!(place.address.county.as_deref(), Some("Innlandet"));
        assert_eq!(place.extra.locality_gid.as_deref(), Some("KVE:TopographicPlace:3411"));
        assert_eq!(place.extra.county_gid.as_deref(), Some("KVE:TopographicPlace:34"));
        assert_eq!(format!("{:.6}", place.centroid.lon), "11.530000");
        assert_eq!(format!("{:.6}", place.centroid.lat), "60.890000");
    }

    #[test]
    fn test_pos_list_centroid_is_mean() {
        let area = r#"<gml:Polygon srsName="EPSG:25833"><gml:exterior><gml:LinearRing>
<gml:posList>311734.14 6755518.26 311834.14 6755578.26</gml:posList>
</gml:LinearRing></gml:exterior></gml:Polygon>"#;
        let (_, places) = run(&collection(&[feature("7", "by", "aktiv", area)]));

        assert_eq!(format!("{:.6}", places[0].centroid.lon), "11.530890");
        assert_eq!(format!("{:.6}", places[0].centroid.lat), "60.890293");
        assert_eq!(places[0].rank_address, 16);
    }

    #[test]
    fn test_geographic_srs_is_latitude_first() {
        let point = r#"<gml:Point srsName="EPSG:4258"><gml:pos>60.5 10.25</gml:pos></gml:Point>"#;
        let (_, places) = run(&collection(&[feature("8", "grend", "aktiv", point)]));
        assert_eq!(places[0].centroid, Coordinate::new(10.25, 60.5));
    }

    #[test]
    fn test_missing_srs_defaults_to_zone_33() {
        let point = "<gml:Point><gml:pos>311734.14 6755518.26</gml:pos></gml:Point>";
        let (_, places) = run(&collection(&[feature("9", "grend", "aktiv", point)]));
        assert!((places[0].centroid.lon - 11.53).abs() < 1e-6);
    }

    #[test]
    fn test_filters_type_and_status() {
        let doc = collection(&[
            feature("1", "fjell", "aktiv", POINT),
            feature("2", "by", "historisk", POINT),
            feature("3", "by", "aktiv", POINT),
        ]);
        let (stats, places) = run(&doc);
        assert_eq!(stats.places, 1);
        assert_eq!(stats.filtered, 2);
        assert_eq!(places[0].place_id, "KVE:TopographicPlace:3");
    }

    #[test]
    fn test_feature_without_geometry_is_skipped() {
        let (stats, places) = run(&collection(&[feature("4", "by", "aktiv", "")]));
        assert!(places.is_empty());
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_missing_collection_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stedsnavn.gml");
        std::fs::write(&path, "<other/>").unwrap();

        let mut places = Vec::new();
        let result = convert(&path, None, &Config::default(), &mut places);
        assert!(matches!(
            result,
            Err(ConvertError::MissingContainer { container: "FeatureCollection", .. })
        ));
    }
}
