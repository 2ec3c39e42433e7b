//! Error types shared by the readers and source converters.

use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort the conversion of one source.
///
/// Row-level validation failures and reference misses never show up here;
/// they are logged and skipped where they occur.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to open source file {path:?}")]
    Open {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("I/O error while reading source")]
    Io(#[from] std::io::Error),

    #[error("malformed XML at byte {position}")]
    Xml {
        #[source]
        source: quick_xml::Error,
        position: u64,
    },

    #[error("required <{container}> element not found in {path:?}")]
    MissingContainer {
        container: &'static str,
        path: PathBuf,
    },

    #[error("failed to decode delimited text")]
    Csv(#[from] csv::Error),

    #[error("failed to decode OSM PBF data")]
    Pbf(#[from] osmpbfreader::Error),

    #[error("failed to serialize place record")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;
