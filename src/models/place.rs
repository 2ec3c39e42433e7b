//! Canonical place record emitted for every source kind.

use serde::ser::{Error as _, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

/// Kind of the source entity, following the OSM node/way/relation split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectKind {
    #[serde(rename = "N")]
    Node,
    #[serde(rename = "W")]
    Way,
    #[serde(rename = "R")]
    Relation,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Node => write!(f, "N"),
            ObjectKind::Way => write!(f, "W"),
            ObjectKind::Relation => write!(f, "R"),
        }
    }
}

/// WGS84 coordinate in decimal degrees.
///
/// Serialized as `[lon, lat]` with exactly six decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Returns `None` unless both axes are finite and inside WGS84 bounds.
    pub fn checked(lon: f64, lat: f64) -> Option<Self> {
        let coordinate = Self { lon, lat };
        coordinate.is_valid().then_some(coordinate)
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&fixed6(self.lon).map_err(S::Error::custom)?)?;
        seq.serialize_element(&fixed6(self.lat).map_err(S::Error::custom)?)?;
        seq.end()
    }
}

/// Bounding box serialized as `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Coordinate,
    pub max: Coordinate,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min: Coordinate::new(min_lon, min_lat),
            max: Coordinate::new(max_lon, max_lat),
        }
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        for value in [self.min.lon, self.min.lat, self.max.lon, self.max.lat] {
            seq.serialize_element(&fixed6(value).map_err(S::Error::custom)?)?;
        }
        seq.end()
    }
}

fn fixed6(value: f64) -> Result<Box<RawValue>, serde_json::Error> {
    RawValue::from_string(format!("{:.6}", value))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaceName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_name: Option<String>,
}

/// Address components
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub housenumber: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.housenumber.is_none()
            && self.city.is_none()
            && self.county.is_none()
    }
}

/// Source-specific metadata. The key set is closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extra {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality_gid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county_gid: Option<String>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "comma_separated"
    )]
    pub transport_modes: Vec<String>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "comma_separated"
    )]
    pub tariff_zones: Vec<String>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "comma_separated"
    )]
    pub tags: Vec<String>,
}

fn comma_separated<S: Serializer>(values: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&values.join(","))
}

/// One output place.
///
/// `centroid` is always a valid WGS84 coordinate; the assemblers drop
/// entities whose location cannot be resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalPlace {
    pub place_id: String,
    pub object_type: ObjectKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    pub rank_address: u8,
    pub importance: f64,
    pub name: PlaceName,
    #[serde(skip_serializing_if = "Address::is_empty")]
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    pub country_code: String,
    pub centroid: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    pub extra: Extra,
}

impl CanonicalPlace {
    /// Create a place with minimal required fields
    pub fn new(
        place_id: impl Into<String>,
        object_type: ObjectKind,
        centroid: Coordinate,
        source: &str,
    ) -> Self {
        Self {
            place_id: place_id.into(),
            object_type,
            categories: Vec::new(),
            rank_address: 30,
            importance: 0.0,
            name: PlaceName::default(),
            address: Address::default(),
            postcode: None,
            country_code: "no".to_string(),
            centroid,
            bbox: None,
            extra: Extra {
                source: source.to_string(),
                ..Extra::default()
            },
        }
    }

    /// Add a category, ignoring repeats.
    pub fn add_category(&mut self, category: impl Into<String>) {
        let category = category.into();
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_serializes_six_decimals() {
        let json = serde_json::to_string(&Coordinate::new(11.53, 60.89)).unwrap();
        assert_eq!(json, "[11.530000,60.890000]");
    }

    #[test]
    fn test_bbox_serializes_four_values() {
        let json = serde_json::to_string(&BoundingBox::new(10.0, 59.5, 10.25, 60.0)).unwrap();
        assert_eq!(json, "[10.000000,59.500000,10.250000,60.000000]");
    }

    #[test]
    fn test_checked_rejects_out_of_range() {
        assert!(Coordinate::checked(10.0, 60.0).is_some());
        assert!(Coordinate::checked(181.0, 60.0).is_none());
        assert!(Coordinate::checked(10.0, -90.5).is_none());
        assert!(Coordinate::checked(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn test_optional_fields_omitted() {
        let place = CanonicalPlace::new("X:1", ObjectKind::Node, Coordinate::new(1.0, 2.0), "test");
        let value = serde_json::to_value(&place).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("address"));
        assert!(!object.contains_key("postcode"));
        assert!(!object.contains_key("bbox"));
        assert!(!object.contains_key("categories"));
        assert_eq!(value["object_type"], "N");
        assert_eq!(value["extra"], serde_json::json!({ "source": "test" }));
    }

    #[test]
    fn test_extra_lists_joined() {
        let extra = Extra {
            source: "nsr".into(),
            transport_modes: vec!["bus".into(), "rail".into()],
            tariff_zones: vec!["RUT:TariffZone:1".into()],
            ..Extra::default()
        };
        let value = serde_json::to_value(&extra).unwrap();
        assert_eq!(value["transport_modes"], "bus,rail");
        assert_eq!(value["tariff_zones"], "RUT:TariffZone:1");
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn test_add_category_collapses_duplicates() {
        let mut place = CanonicalPlace::new("X:1", ObjectKind::Node, Coordinate::new(1.0, 2.0), "test");
        place.add_category("a");
        place.add_category("b");
        place.add_category("a");
        assert_eq!(place.categories, vec!["a", "b"]);
    }
}
