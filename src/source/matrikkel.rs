//! Cadastral addresses from the semicolon-separated Matrikkel export.
//!
//! Every `vegadresse` row becomes an address place. Rows are also folded
//! into one street place per (street name, municipality), located at the
//! running mean of its addresses.

use std::io::BufRead;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use hashbrown::HashMap;
use tracing::{debug, info};

use super::{county_gid, municipality_gid, titleize};
use crate::config::Config;
use crate::error::Result;
use crate::geometry::{CentroidAccumulator, Crs};
use crate::hierarchy::HierarchyTable;
use crate::models::{CanonicalPlace, Coordinate, ObjectKind};
use crate::output::PlaceSink;
use crate::reader::open_source;

pub const SOURCE: &str = "kartverket-matrikkelenadresse";
pub const ADDRESS_TYPE: &str = "vegadresse";
pub const FIELD_COUNT: usize = 46;

/// Column positions in the 46-column export.
pub mod column {
    pub const LOKALID: usize = 0;
    pub const KOMMUNENUMMER: usize = 1;
    pub const KOMMUNENAVN: usize = 2;
    pub const ADRESSETYPE: usize = 3;
    pub const ADRESSEKODE: usize = 6;
    pub const ADRESSENAVN: usize = 7;
    pub const NUMMER: usize = 8;
    pub const BOKSTAV: usize = 9;
    pub const EPSG_KODE: usize = 17;
    pub const NORD: usize = 18;
    pub const OST: usize = 19;
    pub const POSTNUMMER: usize = 20;
    pub const POSTSTED: usize = 21;
}

/// One `vegadresse` row.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrikkelAddress {
    pub id: String,
    pub municipality_code: String,
    pub municipality_name: String,
    pub street_code: String,
    pub street_name: String,
    pub number: String,
    pub letter: String,
    pub postcode: Option<String>,
    pub postal_place: Option<String>,
    pub location: Coordinate,
}

impl MatrikkelAddress {
    /// Validate and project one row; `None` for rows to skip.
    pub fn from_record(record: &StringRecord) -> Option<Self> {
        if record.len() != FIELD_COUNT || record.get(column::ADRESSETYPE)? != ADDRESS_TYPE {
            return None;
        }
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or_default();
        let optional = |i: usize| Some(field(i)).filter(|v| !v.is_empty()).map(str::to_string);

        let street_name = field(column::ADRESSENAVN);
        if street_name.is_empty() {
            return None;
        }

        let crs = match field(column::EPSG_KODE) {
            "" => Crs::default(),
            code => Crs::from_epsg(code.parse().ok()?)?,
        };
        let north: f64 = field(column::NORD).replace(',', ".").parse().ok()?;
        let east: f64 = field(column::OST).replace(',', ".").parse().ok()?;
        let location = match crs {
            Crs::Utm(zone) => crate::geometry::utm_to_wgs84(zone, east, north)?,
            Crs::Geographic => Coordinate::checked(east, north)?,
        };

        Some(Self {
            id: field(column::LOKALID).to_string(),
            municipality_code: field(column::KOMMUNENUMMER).to_string(),
            municipality_name: field(column::KOMMUNENAVN).to_string(),
            street_code: field(column::ADRESSEKODE).to_string(),
            street_name: street_name.to_string(),
            number: field(column::NUMMER).to_string(),
            letter: field(column::BOKSTAV).to_string(),
            postcode: optional(column::POSTNUMMER),
            postal_place: optional(column::POSTSTED),
            location,
        })
    }

    pub fn housenumber(&self) -> String {
        format!("{}{}", self.number, self.letter)
    }

    pub fn display_name(&self) -> String {
        let housenumber = self.housenumber();
        if housenumber.is_empty() {
            self.street_name.clone()
        } else {
            format!("{} {}", self.street_name, housenumber)
        }
    }
}

/// Forward-only reader over the export. The header line is skipped.
pub struct MatrikkelReader<R: BufRead> {
    inner: csv::Reader<R>,
    record: StringRecord,
    skipped: usize,
}

impl MatrikkelReader<Box<dyn BufRead>> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_reader(open_source(path)?))
    }
}

impl<R: BufRead> MatrikkelReader<R> {
    pub fn from_reader(reader: R) -> Self {
        let inner = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(b';')
            .flexible(true)
            .from_reader(reader);
        Self {
            inner,
            record: StringRecord::new(),
            skipped: 0,
        }
    }

    /// Rows rejected so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for MatrikkelReader<R> {
    type Item = Result<MatrikkelAddress>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.read_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => match MatrikkelAddress::from_record(&self.record) {
                    Some(address) => return Some(Ok(address)),
                    None => self.skipped += 1,
                },
                Err(e) if e.is_io_error() => return Some(Err(e.into())),
                Err(e) => {
                    debug!("Skipping unreadable row: {}", e);
                    self.skipped += 1;
                }
            }
        }
    }
}

/// Running aggregate for one street.
#[derive(Debug, Clone)]
struct StreetEntry {
    street_name: String,
    street_code: String,
    municipality_code: String,
    postcode: Option<String>,
    city: Option<String>,
    county: Option<String>,
    locality_gid: String,
    county_gid: String,
    location: CentroidAccumulator,
}

/// Groups addresses by (street name, municipality) in first-seen order.
#[derive(Debug, Default)]
pub struct StreetAggregator {
    keys: HashMap<(String, String), usize>,
    streets: Vec<StreetEntry>,
}

impl StreetAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streets.is_empty()
    }

    fn add(&mut self, address: &MatrikkelAddress, names: &AreaNames) {
        let key = (
            address.street_name.clone(),
            address.municipality_code.clone(),
        );
        let index = *self.keys.entry(key).or_insert_with(|| {
            self.streets.push(StreetEntry {
                street_name: address.street_name.clone(),
                street_code: address.street_code.clone(),
                municipality_code: address.municipality_code.clone(),
                postcode: address.postcode.clone(),
                city: names.city.clone(),
                county: names.county.clone(),
                locality_gid: names.locality_gid.clone(),
                county_gid: names.county_gid.clone(),
                location: CentroidAccumulator::new(),
            });
            self.streets.len() - 1
        });
        self.streets[index].location.add(address.location);
    }

    fn into_places(self, config: &Config) -> impl Iterator<Item = CanonicalPlace> + '_ {
        self.streets.into_iter().filter_map(move |street| {
            let centroid = street.location.centroid()?;
            let id = format!(
                "KVE:Street:{}-{}",
                street.municipality_code, street.street_code
            );
            let mut place = CanonicalPlace::new(id, ObjectKind::Way, centroid, SOURCE);
            place.rank_address = 26;
            place.name.name = Some(street.street_name.clone());
            place.address.street = Some(street.street_name);
            place.address.city = street.city;
            place.address.county = street.county;
            place.postcode = street.postcode;
            place.bbox = street.location.bbox();
            place.add_category("street");
            place.importance = config
                .importance
                .importance(config.matrikkel.street_popularity);
            place.extra.id = Some(place.place_id.clone());
            place.extra.accuracy = Some("street".to_string());
            place.extra.locality_gid = Some(street.locality_gid);
            place.extra.county_gid = Some(street.county_gid);
            place.extra.tags = place.categories.clone();
            Some(place)
        })
    }
}

/// Names and ids of the administrative areas of one address.
struct AreaNames {
    city: Option<String>,
    county: Option<String>,
    locality_gid: String,
    county_gid: String,
}

impl AreaNames {
    fn resolve(address: &MatrikkelAddress, hierarchy: Option<&HierarchyTable>) -> Self {
        let locality_gid = municipality_gid(&address.municipality_code);
        let resolved = hierarchy
            .map(|table| table.resolve(&locality_gid))
            .unwrap_or_default();

        let city = resolved
            .locality
            .as_ref()
            .and_then(|l| l.name.clone())
            .or_else(|| {
                Some(titleize(&address.municipality_name)).filter(|name| !name.is_empty())
            })
            .or_else(|| address.postal_place.as_deref().map(titleize));
        let (county, county_gid) = match resolved.county {
            Some(county) => (county.name, county.id),
            None => (None, county_gid(&address.municipality_code)),
        };

        Self {
            city,
            county,
            locality_gid,
            county_gid,
        }
    }
}

/// Counts reported after a conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrikkelStats {
    pub addresses: usize,
    pub streets: usize,
    pub skipped: usize,
}

/// Convert one export. `hierarchy` supplies municipality and county names
/// when available.
pub fn convert<S: PlaceSink>(
    path: &Path,
    hierarchy: Option<&HierarchyTable>,
    config: &Config,
    sink: &mut S,
) -> Result<MatrikkelStats> {
    info!("Converting addresses from {}", path.display());
    convert_reader(MatrikkelReader::open(path)?, hierarchy, config, sink)
}

pub fn convert_reader<R: BufRead, S: PlaceSink>(
    mut reader: MatrikkelReader<R>,
    hierarchy: Option<&HierarchyTable>,
    config: &Config,
    sink: &mut S,
) -> Result<MatrikkelStats> {
    let mut streets = StreetAggregator::new();
    let mut stats = MatrikkelStats::default();
    let importance = config
        .importance
        .importance(config.matrikkel.address_popularity);

    for address in reader.by_ref() {
        let address = address?;
        let names = AreaNames::resolve(&address, hierarchy);
        streets.add(&address, &names);

        let mut place = CanonicalPlace::new(
            format!("KVE:Address:{}", address.id),
            ObjectKind::Node,
            address.location,
            SOURCE,
        );
        place.name.name = Some(address.display_name());
        place.address.street = Some(address.street_name.clone());
        place.address.housenumber = Some(address.housenumber()).filter(|h| !h.is_empty());
        place.address.city = names.city;
        place.address.county = names.county;
        place.postcode = address.postcode;
        place.add_category(ADDRESS_TYPE);
        place.importance = importance;
        place.extra.id = Some(place.place_id.clone());
        place.extra.accuracy = Some("exact".to_string());
        place.extra.locality_gid = Some(names.locality_gid);
        place.extra.county_gid = Some(names.county_gid);
        place.extra.tags = place.categories.clone();

        sink.accept(place)?;
        stats.addresses += 1;
    }

    info!("Aggregating {} streets", streets.len());
    for street in streets.into_places(config) {
        sink.accept(street)?;
        stats.streets += 1;
    }

    stats.skipped = reader.skipped();
    info!(
        "Converted {} addresses and {} streets ({} rows skipped)",
        stats.addresses, stats.streets, stats.skipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyEntry, UnitKind};

    fn row(kind: &str, street: &str, number: &str, east: &str, north: &str) -> String {
        let mut fields = vec![String::new(); FIELD_COUNT];
        fields[column::LOKALID] = format!("{}{}", street.len(), number);
        fields[column::KOMMUNENUMMER] = "3411".into();
        fields[column::KOMMUNENAVN] = "RINGSAKER".into();
        fields[column::ADRESSETYPE] = kind.into();
        fields[column::ADRESSEKODE] = street.len().to_string();
        fields[column::ADRESSENAVN] = street.into();
        fields[column::NUMMER] = number.into();
        fields[column::EPSG_KODE] = "25833".into();
        fields[column::NORD] = north.into();
        fields[column::OST] = east.into();
        fields[column::POSTNUMMER] = "2390".into();
        fields[column::POSTSTED] = "MOELV".into();
        fields.join(";")
    }

    fn header() -> String {
        (0..FIELD_COUNT).map(|i| format!("col{}", i)).collect::<Vec<_>>().join(";")
    }

    fn convert_str(content: &str, hierarchy: Option<&HierarchyTable>) -> (MatrikkelStats, Vec<CanonicalPlace>) {
        let mut places = Vec::new();
        let reader = MatrikkelReader::from_reader(content.as_bytes());
        let stats = convert_reader(reader, hierarchy, &Config::default(), &mut places).unwrap();
        (stats, places)
    }

    #[test]
    fn test_skips_header_and_invalid_rows() {
        let content = [
            header(),
            row("vegadresse", "Storgata", "1", "311734.14", "6755518.26"),
            row("matrikkeladresse", "Storgata", "2", "311734.14", "6755518.26"),
            "too;few;fields".to_string(),
            row("vegadresse", "", "3", "311734.14", "6755518.26"),
            row("vegadresse", "Storgata", "4", "not-a-number", "6755518.26"),
        ]
        .join("\n");

        let (stats, places) = convert_str(&content, None);
        assert_eq!(stats.addresses, 1);
        assert_eq!(stats.streets, 1);
        assert_eq!(stats.skipped, 4);
        assert_eq!(places.len(), 2);
    }

    #[test]
    fn test_address_fields() {
        let content = [header(), row("vegadresse", "Storgata", "12", "311734.14", "6755518.26")].join("\n");
        let (_, places) = convert_str(&content, None);
        let address = &places[0];

        assert_eq!(address.name.name.as_deref(), Some("Storgata 12"));
        assert_eq!(address.address.housenumber.as_deref(), Some("12"));
        assert_eq!(address.address.city.as_deref(), Some("Ringsaker"));
        assert_eq!(address.postcode.as_deref(), Some("2390"));
        assert_eq!(address.extra.locality_gid.as_deref(), Some("KVE:TopographicPlace:3411"));
        assert_eq!(address.extra.county_gid.as_deref(), Some("KVE:TopographicPlace:34"));
        assert!((address.centroid.lon - 11.53).abs() < 1e-6);
        assert!((address.centroid.lat - 60.89).abs() < 1e-6);
    }

    #[test]
    fn test_street_centroid_is_running_mean() {
        let content = [
            header(),
            row("vegadresse", "Storgata", "1", "311734.14", "6755518.26"),
            row("vegadresse", "Storgata", "3", "311834.14", "6755578.26"),
            row("vegadresse", "Kirkeveien", "1", "311734.14", "6755518.26"),
        ]
        .join("\n");

        let (stats, places) = convert_str(&content, None);
        assert_eq!(stats.streets, 2);

        let street = places.iter().find(|p| p.place_id == "KVE:Street:3411-8").unwrap();
        assert_eq!(street.name.name.as_deref(), Some("Storgata"));
        assert_eq!(street.object_type, ObjectKind::Way);
        assert_eq!(format!("{:.6}", street.centroid.lon), "11.530890");
        assert_eq!(format!("{:.6}", street.centroid.lat), "60.890293");
        assert!(street.bbox.is_some());
    }

    #[test]
    fn test_hierarchy_names_win_over_fallback() {
        let table = HierarchyTable::build([
            HierarchyEntry {
                id: "KVE:TopographicPlace:3411".into(),
                name: Some("Ringsaker kommune".into()),
                kind: UnitKind::Municipality,
                parent: Some("KVE:TopographicPlace:34".into()),
                country_code: Some("no".into()),
            },
            HierarchyEntry {
                id: "KVE:TopographicPlace:34".into(),
                name: Some("Innlandet".into()),
                kind: UnitKind::County,
                parent: None,
                country_code: Some("no".into()),
            },
        ]);
        let content = [header(), row("vegadresse", "Storgata", "1", "311734.14", "6755518.26")].join("\n");
        let (_, places) = convert_str(&content, Some(&table));

        assert_eq!(places[0].address.city.as_deref(), Some("Ringsaker kommune"));
        assert_eq!(places[0].address.county.as_deref(), Some("Innlandet"));
    }
}
