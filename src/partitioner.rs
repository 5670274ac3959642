use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::SortError;
use crate::sort_key::SortKey;
use crate::workspace::Workspace;

const QUOTE: u8 = b'"';

/// Quoting state while scanning a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
    /// a bare `\r` ended the record, a following `\n` belongs to it
    EndCr,
    End,
}

/// Splits a byte stream into logical records. `\n`, `\r` and `\r\n` end a record unless
/// they are inside a quoted field. Record bytes are returned verbatim, terminator included.
pub(crate) struct RecordFramer<R> {
    reader: R,
    path: PathBuf,
    delimiter: u8,
    line: u64,
    record_line: u64,
}

impl<R: BufRead> RecordFramer<R> {
    pub(crate) fn new(reader: R, path: PathBuf, delimiter: u8) -> RecordFramer<R> {
        RecordFramer {
            reader,
            path,
            delimiter,
            line: 0,
            record_line: 0,
        }
    }

    /// Line where the last returned record starts, 1 based
    pub(crate) fn record_line(&self) -> u64 {
        self.record_line
    }

    /// Read the next record into `record`. Returns false at end of input.
    pub(crate) fn next_record(&mut self, record: &mut Vec<u8>) -> Result<bool, SortError> {
        record.clear();
        self.record_line = self.line + 1;
        let delimiter = self.delimiter;
        let mut state = ScanState::FieldStart;
        loop {
            let buf = self.reader.fill_buf()
                .map_err(|e| SortError::io(format!("read: {}", self.path.display()), e))?;
            if buf.is_empty() {
                if state == ScanState::Quoted {
                    return Err(
                        SortError::Parse {
                            path: self.path.clone(),
                            line: self.record_line,
                            reason: "unterminated quoted field at end of input".to_string(),
                        }
                    );
                }
                return Ok(!record.is_empty());
            }

            let mut used = 0;
            for &b in buf {
                if state == ScanState::EndCr {
                    if b == b'\n' {
                        used += 1;
                    }
                    state = ScanState::End;
                    break;
                }
                used += 1;
                state = Self::scan(state, b, delimiter);
                if state == ScanState::End {
                    break;
                }
            }
            record.extend_from_slice(&buf[..used]);
            self.line += buf[..used].iter().filter(|b| **b == b'\n').count() as u64;
            self.reader.consume(used);
            if state == ScanState::End {
                return Ok(true);
            }
        }
    }

    fn scan(state: ScanState, b: u8, delimiter: u8) -> ScanState {
        match state {
            ScanState::FieldStart if b == QUOTE => ScanState::Quoted,
            ScanState::Quoted if b == QUOTE => ScanState::QuoteInQuoted,
            ScanState::Quoted => ScanState::Quoted,
            ScanState::QuoteInQuoted if b == QUOTE => ScanState::Quoted,
            _ if b == b'\n' => ScanState::End,
            _ if b == b'\r' => ScanState::EndCr,
            _ if b == delimiter => ScanState::FieldStart,
            _ => ScanState::Unquoted,
        }
    }
}

/// A record made of line terminators only, which holds no field at all
fn is_blank(record: &[u8]) -> bool {
    record.iter().all(|b| *b == b'\n' || *b == b'\r')
}

/// Chunk files in source order plus the header record, if one was requested
#[derive(Debug)]
pub(crate) struct Partition {
    chunks: Vec<PathBuf>,
    header: Option<Vec<u8>>,
}

impl Partition {
    pub(crate) fn into_parts(self) -> (Vec<PathBuf>, Option<Vec<u8>>) {
        (self.chunks, self.header)
    }
}

struct OpenChunk {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
}

impl OpenChunk {
    fn close(mut self) -> Result<PathBuf, SortError> {
        self.writer.flush()
            .map_err(|e| SortError::io(format!("write chunk: {}", self.path.display()), e))?;
        Ok(self.path)
    }
}

/// Stream `source` once, writing its records into chunk files in `workspace`.
///
/// A chunk is closed as soon as its size reaches `chunk_size_bytes`, so it can exceed the
/// threshold by at most the record that triggered the rollover. A chunk file is only created
/// when a record is written to it.
///
/// A blank line below the header has no fields, so no key column can exist in it and the run
/// fails with [SortError::Key].
pub(crate) fn partition(
    source: &Path,
    workspace: &Workspace,
    chunk_size_bytes: u64,
    has_header: bool,
    delimiter: u8,
    sort_key: &SortKey,
) -> Result<Partition, SortError> {
    let file = File::open(source)
        .map_err(|e| SortError::io(format!("open source: {}", source.display()), e))?;
    let mut framer = RecordFramer::new(BufReader::new(file), source.to_path_buf(), delimiter);

    let mut record = Vec::new();
    let mut header = None;
    if has_header && framer.next_record(&mut record)? {
        header = Some(record.clone());
    }

    let mut chunks = Vec::new();
    let mut current: Option<OpenChunk> = None;
    while framer.next_record(&mut record)? {
        if is_blank(&record) {
            return Err(
                SortError::Key {
                    path: source.to_path_buf(),
                    line: framer.record_line(),
                    column: sort_key.columns().first().copied().unwrap_or(0),
                    fields: 0,
                }
            );
        }
        let mut chunk = match current.take() {
            Some(chunk) => chunk,
            None => {
                let path = workspace.next_chunk_path();
                let file = File::create(&path)
                    .map_err(|e| SortError::io(format!("create chunk: {}", path.display()), e))?;
                OpenChunk { path, writer: BufWriter::new(file), bytes: 0 }
            }
        };
        chunk.writer.write_all(&record)
            .map_err(|e| SortError::io(format!("write chunk: {}", chunk.path.display()), e))?;
        chunk.bytes += record.len() as u64;
        if chunk.bytes >= chunk_size_bytes {
            chunks.push(chunk.close()?);
        } else {
            current = Some(chunk);
        }
    }
    if let Some(chunk) = current {
        chunks.push(chunk.close()?);
    }

    log::info!("Partitioned {} into {} chunks", source.display(), chunks.len());
    Ok(Partition { chunks, header })
}
