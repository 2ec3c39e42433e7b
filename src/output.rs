//! Line-delimited JSON place dump.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{ConvertError, Result};
use crate::models::{CanonicalPlace, DumpHeader, PlaceLine};

/// Receiver of assembled places.
pub trait PlaceSink {
    fn accept(&mut self, place: CanonicalPlace) -> Result<()>;
}

impl PlaceSink for Vec<CanonicalPlace> {
    fn accept(&mut self, place: CanonicalPlace) -> Result<()> {
        self.push(place);
        Ok(())
    }
}

/// Writes one JSON object per line, with a header line on fresh output.
pub struct DumpWriter<W: Write> {
    out: BufWriter<W>,
    written: usize,
}

impl DumpWriter<File> {
    /// Open `path` for writing.
    ///
    /// Without `append` the file is truncated and gets a header. With
    /// `append` the header is only written if the file is new or empty.
    pub fn create(path: &Path, append: bool) -> Result<Self> {
        let open_error = |source| ConvertError::Open {
            source,
            path: path.to_path_buf(),
        };
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(open_error)?;
        let is_empty = file.metadata().map_err(open_error)?.len() == 0;

        info!(
            "Writing places to {} ({})",
            path.display(),
            if append { "append" } else { "fresh" }
        );
        Self::new(file, is_empty)
    }
}

impl<W: Write> DumpWriter<W> {
    pub fn new(inner: W, write_header: bool) -> Result<Self> {
        let mut writer = Self {
            out: BufWriter::new(inner),
            written: 0,
        };
        if write_header {
            debug!("Writing dump header");
            writer.write_line(&DumpHeader::new(Utc::now()))?;
        }
        Ok(writer)
    }

    pub fn write_place(&mut self, place: &CanonicalPlace) -> Result<()> {
        self.write_line(&PlaceLine::new(place))?;
        self.written += 1;
        Ok(())
    }

    /// Places written so far (the header is not counted).
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the number of places written.
    pub fn finish(mut self) -> Result<usize> {
        self.out.flush()?;
        Ok(self.written)
    }

    fn write_line<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> PlaceSink for DumpWriter<W> {
    fn accept(&mut self, place: CanonicalPlace) -> Result<()> {
        self.write_place(&place)
    }
}
