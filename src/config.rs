//! Popularity and filter configuration.
//!
//! Every section falls back to built-in defaults, so a missing file or a
//! partial file both produce a usable configuration.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::popularity::ImportanceScale;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub importance: ImportanceScale,
    pub stop_place: StopPlaceConfig,
    pub group_of_stop_places: GroupOfStopPlacesConfig,
    pub matrikkel: MatrikkelConfig,
    pub stedsnavn: StedsnavnConfig,
    pub osm: OsmConfig,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("Invalid config file")?;
        Ok(config)
    }

    /// Reject values that would give a place a non-positive popularity.
    pub fn validate(&self) -> Result<()> {
        let scale = &self.importance;
        positive("importance.min_popularity", scale.min_popularity)?;
        positive("importance.max_popularity", scale.max_popularity)?;
        ensure!(
            scale.max_popularity > scale.min_popularity,
            "importance.max_popularity must exceed importance.min_popularity"
        );
        ensure!(
            (0.0..=1.0).contains(&scale.floor),
            "importance.floor must lie in [0, 1], got {}",
            scale.floor
        );

        let stop_place = &self.stop_place;
        positive("stop_place.default_popularity", stop_place.default_popularity)?;
        positive_entries("stop_place.stop_type_factors", &stop_place.stop_type_factors)?;
        positive_entries("stop_place.interchange_factors", &stop_place.interchange_factors)?;
        positive(
            "group_of_stop_places.boost_factor",
            self.group_of_stop_places.boost_factor,
        )?;
        positive("matrikkel.address_popularity", self.matrikkel.address_popularity)?;
        positive("matrikkel.street_popularity", self.matrikkel.street_popularity)?;
        positive_entries("stedsnavn.place_types", &self.stedsnavn.place_types)?;
        for filter in &self.osm.filters {
            positive(&format!("osm.filters[{}].popularity", filter.key), filter.popularity)?;
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value > 0.0,
        "{} must be a finite number above zero, got {}",
        name,
        value
    );
    Ok(())
}

fn positive_entries(section: &str, values: &HashMap<String, f64>) -> Result<()> {
    for (key, value) in values {
        positive(&format!("{}.{}", section, key), *value)?;
    }
    Ok(())
}

/// Stop place popularity: `default * type factor * interchange factor`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StopPlaceConfig {
    pub default_popularity: f64,
    /// Keyed by `StopPlaceType`, falling back to the transport mode.
    pub stop_type_factors: HashMap<String, f64>,
    /// Keyed by the NeTEx interchange `Weighting` value.
    pub interchange_factors: HashMap<String, f64>,
}

impl Default for StopPlaceConfig {
    fn default() -> Self {
        let stop_type_factors = [
            ("airport", 3.0),
            ("railStation", 3.0),
            ("metroStation", 2.0),
            ("busStation", 2.0),
            ("ferryStop", 1.5),
            ("harbourPort", 1.5),
            ("tramStation", 1.5),
            ("onstreetTram", 1.2),
            ("onstreetBus", 1.0),
        ];
        let interchange_factors = [
            ("preferredInterchange", 10.0),
            ("recommendedInterchange", 3.0),
            ("interchangeAllowed", 1.0),
            ("noInterchange", 1.0),
        ];
        Self {
            default_popularity: 50.0,
            stop_type_factors: to_map(&stop_type_factors),
            interchange_factors: to_map(&interchange_factors),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GroupOfStopPlacesConfig {
    /// Multiplied into the product of member popularities.
    pub boost_factor: f64,
}

impl Default for GroupOfStopPlacesConfig {
    fn default() -> Self {
        Self { boost_factor: 10.0 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MatrikkelConfig {
    pub address_popularity: f64,
    pub street_popularity: f64,
}

impl Default for MatrikkelConfig {
    fn default() -> Self {
        Self {
            address_popularity: 20.0,
            street_popularity: 100.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StedsnavnConfig {
    /// Kept `navneobjekttype` values and their popularity.
    pub place_types: HashMap<String, f64>,
}

impl Default for StedsnavnConfig {
    fn default() -> Self {
        let place_types = [
            ("by", 1000.0),
            ("tettsted", 300.0),
            ("bydel", 200.0),
            ("tettsteddel", 100.0),
            ("tettbebyggelse", 60.0),
            ("grend", 30.0),
            ("boligfelt", 30.0),
            ("industriområde", 20.0),
        ];
        Self {
            place_types: to_map(&place_types),
        }
    }
}

/// One OSM tag filter; `value = None` matches any value of `key`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OsmTagFilter {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub popularity: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OsmConfig {
    /// Checked in order, first match wins.
    pub filters: Vec<OsmTagFilter>,
}

impl Default for OsmConfig {
    fn default() -> Self {
        let filter = |key: &str, value: Option<&str>, popularity: f64| OsmTagFilter {
            key: key.to_string(),
            value: value.map(str::to_string),
            popularity,
        };
        Self {
            filters: vec![
                filter("place", Some("city"), 1000.0),
                filter("place", Some("town"), 300.0),
                filter("place", Some("village"), 100.0),
                filter("amenity", Some("hospital"), 80.0),
                filter("amenity", Some("university"), 80.0),
                filter("tourism", Some("attraction"), 60.0),
                filter("leisure", Some("stadium"), 60.0),
                filter("aeroway", Some("aerodrome"), 60.0),
                filter("amenity", Some("cinema"), 40.0),
                filter("shop", Some("mall"), 40.0),
                filter("tourism", Some("museum"), 40.0),
                filter("amenity", None, 20.0),
                filter("shop", None, 20.0),
                filter("tourism", None, 20.0),
                filter("leisure", None, 20.0),
            ],
        }
    }
}

fn to_map(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [group_of_stop_places]
            boost_factor = 4.0

            [importance]
            floor = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.group_of_stop_places.boost_factor, 4.0);
        assert_eq!(config.importance.floor, 0.2);
        assert_eq!(config.importance.max_popularity, 1e9);
        assert_eq!(config.stop_place.default_popularity, 50.0);
        assert_eq!(config.stedsnavn.place_types.get("by"), Some(&1000.0));
    }

    #[test]
    fn test_osm_filters_replace_defaults() {
        let config: Config = toml::from_str(
            r#"
            [[osm.filters]]
            key = "amenity"
            value = "pub"
            popularity = 5.0
            "#,
        )
        .unwrap();

        assert_eq!(
            config.osm.filters,
            vec![OsmTagFilter {
                key: "amenity".into(),
                value: Some("pub".into()),
                popularity: 5.0,
            }]
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[matrikkel]\nstreet_popularity = 7.5\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.matrikkel.street_popularity, 7.5);
        assert_eq!(config.matrikkel.address_popularity, 20.0);
    }

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_non_positive_values_are_rejected() {
        let cases = [
            ("[stop_place.stop_type_factors]\nrailStation = 0.0\n", "railStation"),
            ("[stop_place]\ndefault_popularity = -5.0\n", "default_popularity"),
            ("[stop_place.interchange_factors]\npreferredInterchange = nan\n", "preferredInterchange"),
            ("[group_of_stop_places]\nboost_factor = -1.0\n", "boost_factor"),
            ("[matrikkel]\naddress_popularity = 0.0\n", "address_popularity"),
            ("[stedsnavn.place_types]\nby = inf\n", "stedsnavn.place_types.by"),
            (
                "[[osm.filters]]\nkey = \"shop\"\npopularity = 0.0\n",
                "osm.filters[shop]",
            ),
            ("[importance]\nmax_popularity = 0.5\n", "max_popularity"),
            ("[importance]\nfloor = 1.5\n", "floor"),
        ];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        for (content, field) in cases {
            std::fs::write(&path, content).unwrap();
            let err = Config::load_from_file(&path).unwrap_err();
            let message = format!("{:#}", err);
            assert!(message.contains(field), "{} not in {}", field, message);
        }
    }
}
