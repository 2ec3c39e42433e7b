//! Line envelopes of the place dump.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CanonicalPlace;

pub const DUMP_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize)]
pub struct DumpFeatures {
    pub sorted_by_country: bool,
    pub has_addresslines: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DumpHeaderContent {
    pub version: &'static str,
    pub generator: &'static str,
    pub data_timestamp: DateTime<Utc>,
    pub features: DumpFeatures,
}

/// First line of a fresh dump.
#[derive(Debug, Clone, Serialize)]
pub struct DumpHeader {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: DumpHeaderContent,
}

impl DumpHeader {
    pub fn new(data_timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: "NominatimDumpFile",
            content: DumpHeaderContent {
                version: DUMP_VERSION,
                generator: env!("CARGO_PKG_NAME"),
                data_timestamp,
                features: DumpFeatures {
                    sorted_by_country: false,
                    has_addresslines: false,
                },
            },
        }
    }
}

/// One place line: `{"type":"Place","content":[place]}`.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceLine<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: [&'a CanonicalPlace; 1],
}

impl<'a> PlaceLine<'a> {
    pub fn new(place: &'a CanonicalPlace) -> Self {
        Self {
            kind: "Place",
            content: [place],
        }
    }
}
