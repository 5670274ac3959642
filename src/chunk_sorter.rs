use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Terminator, WriterBuilder};

use crate::error::SortError;
use crate::line_record::LineRecord;
use crate::sort_key::SortKey;
use crate::worker_pool::Task;

pub(crate) fn reader_builder(delimiter: u8) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter);
    builder
}

pub(crate) fn writer_builder(delimiter: u8) -> WriterBuilder {
    let mut builder = WriterBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .terminator(Terminator::Any(b'\n'));
    builder
}

/// Load the whole chunk, sort it stably by `sort_key` and rewrite it in place.
/// Returns the number of records.
pub(crate) fn sort_chunk(path: &Path, sort_key: &SortKey, delimiter: u8) -> Result<usize, SortError> {
    let mut records = read_records(path, sort_key, delimiter)?;
    records.sort();

    let mut writer = writer_builder(delimiter)
        .from_path(path)
        .map_err(|e| SortError::csv(path, e))?;
    for line_record in &records {
        writer.write_byte_record(line_record.record())
            .map_err(|e| SortError::csv(path, e))?;
    }
    writer.flush()
        .map_err(|e| SortError::io(format!("write chunk: {}", path.display()), e))?;
    Ok(records.len())
}

fn read_records(path: &Path, sort_key: &SortKey, delimiter: u8) -> Result<Vec<LineRecord>, SortError> {
    let mut reader = reader_builder(delimiter)
        .from_path(path)
        .map_err(|e| SortError::csv(path, e))?;
    let mut line_records = Vec::new();
    for result in reader.byte_records() {
        let record = result.map_err(|e| SortError::csv(path, e))?;
        line_records.push(LineRecord::new(record, sort_key, path)?);
    }
    Ok(line_records)
}

/// Sorts one chunk file in a pool worker
pub(crate) struct SortTask {
    path: PathBuf,
    sort_key: SortKey,
    delimiter: u8,
}

impl SortTask {
    pub(crate) fn new(path: PathBuf, sort_key: SortKey, delimiter: u8) -> SortTask {
        SortTask {
            path,
            sort_key,
            delimiter,
        }
    }
}

impl Task for SortTask {
    fn run(&self) -> Result<(), SortError> {
        let records = sort_chunk(&self.path, &self.sort_key, self.delimiter)?;
        log::debug!("Sorted chunk {}, records: {}", self.path.display(), records);
        Ok(())
    }

    fn name(&self) -> String {
        format!("sort {}", self.path.display())
    }
}
