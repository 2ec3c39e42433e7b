//! Placedump - converts Norwegian geodata extracts into a place dump
//!
//! Stop places (NeTEx), cadastral addresses (Matrikkel CSV), place names
//! (Stedsnavn GML) and OSM points of interest are resolved into one
//! line-delimited JSON stream of canonical places.

pub mod config;
pub mod error;
pub mod geometry;
pub mod hierarchy;
pub mod index;
pub mod models;
pub mod output;
pub mod popularity;
pub mod reader;
pub mod source;

pub use config::Config;
pub use error::{ConvertError, Result};
pub use models::{CanonicalPlace, Coordinate, ObjectKind};
pub use output::{DumpWriter, PlaceSink};
