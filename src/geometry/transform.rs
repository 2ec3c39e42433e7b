//! ETRS89 / UTM to WGS84 conversion.
//!
//! ETRS89 and WGS84 differ by well under a metre in Norway, so both sides
//! use GRS80 and the conversion is a plain inverse projection.

use std::cell::RefCell;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use proj4rs::transform::transform;
use proj4rs::Proj;
use tracing::debug;

use crate::models::Coordinate;

const GEOGRAPHIC: &str = "+proj=longlat +ellps=GRS80 +no_defs";

thread_local! {
    static ZONES: RefCell<HashMap<u8, UtmZone>> = RefCell::new(HashMap::new());
}

/// Source and target projections for one UTM zone.
struct UtmZone {
    source: Proj,
    target: Proj,
}

impl UtmZone {
    fn new(zone: u8) -> Option<Self> {
        let definition = format!("+proj=utm +zone={} +ellps=GRS80 +units=m +no_defs", zone);
        let build = |definition: &str| {
            Proj::from_proj_string(definition)
                .map_err(|e| debug!("Invalid projection {}: {:?}", definition, e))
                .ok()
        };
        Some(Self {
            source: build(&definition)?,
            target: build(GEOGRAPHIC)?,
        })
    }

    fn inverse(&self, easting: f64, northing: f64) -> Option<(f64, f64)> {
        let mut point = (easting, northing, 0.0);
        transform(&self.source, &self.target, &mut point)
            .map_err(|e| debug!("Projection failed for ({}, {}): {:?}", easting, northing, e))
            .ok()?;
        Some((point.0.to_degrees(), point.1.to_degrees()))
    }
}

/// Coordinate reference systems found in the supported sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// ETRS89 / UTM, northern hemisphere, by zone number.
    Utm(u8),
    /// Geographic degrees with latitude first (EPSG 4258, 4326).
    Geographic,
}

impl Default for Crs {
    fn default() -> Self {
        Crs::Utm(33)
    }
}

impl Crs {
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            25828..=25838 => Some(Crs::Utm((code - 25800) as u8)),
            4258 | 4326 => Some(Crs::Geographic),
            _ => None,
        }
    }

    /// Parse GML `srsName` forms such as `EPSG:25833`,
    /// `urn:ogc:def:crs:EPSG::25833` or `http://www.opengis.net/def/crs/EPSG/0/25833`.
    pub fn from_srs_name(srs_name: &str) -> Option<Self> {
        let digits: String = srs_name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok().and_then(Self::from_epsg)
    }

    /// Convert a pair given in this system's native axis order.
    pub fn to_wgs84(&self, first: f64, second: f64) -> Option<Coordinate> {
        match *self {
            Crs::Utm(zone) => utm_to_wgs84(zone, first, second),
            Crs::Geographic => Coordinate::checked(second, first),
        }
    }
}

/// Inverse UTM projection for a northern zone.
///
/// Projections are built once per zone and thread. Returns `None` if the
/// zone is invalid or the result is not a valid WGS84 coordinate.
pub fn utm_to_wgs84(zone: u8, easting: f64, northing: f64) -> Option<Coordinate> {
    if !(1..=60).contains(&zone) || !easting.is_finite() || !northing.is_finite() {
        return None;
    }
    let (lon, lat) = ZONES.with(|zones| {
        let mut zones = zones.borrow_mut();
        let projection = match zones.entry(zone) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(UtmZone::new(zone)?),
        };
        projection.inverse(easting, northing)
    })?;
    Coordinate::checked(lon, lat)
}
