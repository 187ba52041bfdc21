//! Catalog state dump and restore
//!
//! A dump is a plain sequence of CBOR-encoded records, one per metric, in
//! (origin, source, metric) order. Restore replays each record through
//! `Catalog::insert`, so it is additive and keeps first-inserted attributes.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, Record};
use crate::error::{Result, SightlineError};

/// File extension used for per-provider state dumps
pub const STATE_EXTENSION: &str = "catalog";

impl Catalog {
    /// Write every record to `writer`; returns the number of records written
    pub fn dump<W: Write>(&self, writer: W) -> Result<usize> {
        let mut writer = BufWriter::new(writer);
        let records = self.records();

        for record in &records {
            ciborium::into_writer(record, &mut writer).map_err(|e| SightlineError::Encoding(e.to_string()))?;
        }
        writer.flush()?;

        Ok(records.len())
    }

    /// Read records from `reader` and insert them; an empty stream is not an error
    pub fn restore<R: Read>(&self, reader: R) -> Result<usize> {
        let mut reader = BufReader::new(reader);
        let mut restored = 0;

        loop {
            if reader.fill_buf()?.is_empty() {
                break;
            }

            let record: Record =
                ciborium::from_reader(&mut reader).map_err(|e| SightlineError::Decoding(e.to_string()))?;
            if self.insert(&record)? {
                restored += 1;
            }
        }

        Ok(restored)
    }
}

/// Location of the state dump for `provider` under `cache_dir`
pub fn state_path(cache_dir: &Path, provider: &str) -> PathBuf {
    cache_dir.join("state").join(format!("{}.{}", provider, STATE_EXTENSION))
}

/// Dump `catalog` to `path`, creating parent directories as needed
pub fn dump_to_file(catalog: &Catalog, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let count = catalog.dump(fs::File::create(path)?)?;
    tracing::debug!(path = %path.display(), records = count, "dumped catalog state");
    Ok(count)
}

/// Restore `catalog` from `path`; a missing file restores nothing
pub fn restore_from_file(catalog: &Catalog, path: &Path) -> Result<usize> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let count = catalog.restore(file)?;
    tracing::debug!(path = %path.display(), records = count, "restored catalog state");
    Ok(count)
}
