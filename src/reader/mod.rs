//! Pull-based record readers for the supported source formats.
//!
//! Every reader is forward-only and yields one record at a time; a new pass
//! over a source means opening it again.

pub mod xml;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{ConvertError, Result};

pub use xml::{ElementStream, FromElement, TypedRecords, XmlElement};

/// Open a source file, transparently decompressing `.gz`.
pub fn open_source(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|source| ConvertError::Open {
        source,
        path: path.to_path_buf(),
    })?;
    let reader: Box<dyn BufRead> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}
