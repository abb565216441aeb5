//! Streaming NDJSON writer for file sinks.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use polyplan_core::types::Record;

pub struct JsonlWriter<W: Write> {
    writer: BufWriter<W>,
    written: u64,
}

impl JsonlWriter<File> {
    pub fn to_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::create(path)?;
        Ok(Self::to_writer(f))
    }
}

impl<W: Write> JsonlWriter<W> {
    pub fn to_writer(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Write each record as one JSON object per line.
    pub fn write_records<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) -> io::Result<()> {
        for r in records {
            let line = serde_json::to_string(&r.to_json())?;
            writeln!(self.writer, "{}", line)?;
            self.written += 1;
        }
        self.writer.flush()
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}
