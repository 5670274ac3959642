use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use csv::{ByteRecord, Reader};

use crate::chunk_sorter::{reader_builder, writer_builder};
use crate::error::SortError;
use crate::line_record::LineRecord;
use crate::sort_key::SortKey;
use crate::worker_pool::Task;

/// One sorted input of a merge, positioned on its current head record
struct MergeSource {
    index: usize,
    path: PathBuf,
    reader: Reader<File>,
    head: Option<LineRecord>,
    sort_key: SortKey,
}

impl MergeSource {
    fn open(index: usize, path: PathBuf, sort_key: SortKey, delimiter: u8) -> Result<MergeSource, SortError> {
        let reader = reader_builder(delimiter)
            .from_path(&path)
            .map_err(|e| SortError::csv(&path, e))?;
        let mut source = MergeSource {
            index,
            path,
            reader,
            head: None,
            sort_key,
        };
        source.head = source.read_next()?;
        Ok(source)
    }

    fn read_next(&mut self) -> Result<Option<LineRecord>, SortError> {
        let mut record = ByteRecord::new();
        let more = self.reader.read_byte_record(&mut record)
            .map_err(|e| SortError::csv(&self.path, e))?;
        if more {
            Ok(Some(LineRecord::new(record, &self.sort_key, &self.path)?))
        } else {
            Ok(None)
        }
    }

    /// Take the head record and refill it from the file
    fn advance(&mut self) -> Result<Option<LineRecord>, SortError> {
        let next = self.read_next()?;
        Ok(std::mem::replace(&mut self.head, next))
    }

    fn is_exhausted(&self) -> bool {
        self.head.is_none()
    }
}

impl Eq for MergeSource {}

impl PartialEq<Self> for MergeSource {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd<Self> for MergeSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeSource {
    // flipped so that BinaryHeap (a max heap) pops the smallest head first, ties go to the
    // earlier input
    fn cmp(&self, other: &Self) -> Ordering {
        other.head.cmp(&self.head)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Merge individually sorted `inputs` into `output`, writing `header` first when given, then
/// delete the inputs. Returns the number of merged records.
///
/// At most one record per input is held in memory.
pub(crate) fn merge_files(
    inputs: &[PathBuf],
    output: &Path,
    sort_key: &SortKey,
    header: Option<&[u8]>,
    delimiter: u8,
) -> Result<usize, SortError> {
    log::debug!("Merging {} sorted files into {}, thread: {}", inputs.len(), output.display(), thread::current().name().unwrap_or("unnamed"));
    let output_context = || format!("write merged file: {}", output.display());
    let mut file = File::create(output).map_err(|e| SortError::io(output_context(), e))?;
    if let Some(header) = header {
        file.write_all(header).map_err(|e| SortError::io(output_context(), e))?;
        if !header.ends_with(b"\n") {
            file.write_all(b"\n").map_err(|e| SortError::io(output_context(), e))?;
        }
    }

    let mut sources = BinaryHeap::with_capacity(inputs.len());
    for (index, path) in inputs.iter().enumerate() {
        let source = MergeSource::open(index, path.clone(), sort_key.clone(), delimiter)?;
        if !source.is_exhausted() {
            sources.push(source);
        }
    }

    let mut writer = writer_builder(delimiter).from_writer(file);
    let mut merged: usize = 0;
    while let Some(mut current_min) = sources.pop() {
        if let Some(line_record) = current_min.advance()? {
            writer.write_byte_record(line_record.record())
                .map_err(|e| SortError::csv(output, e))?;
            merged += 1;
        }
        if !current_min.is_exhausted() {
            sources.push(current_min);
        }
    }
    writer.flush().map_err(|e| SortError::io(output_context(), e))?;
    drop(writer);

    for path in inputs {
        std::fs::remove_file(path)
            .map_err(|e| SortError::io(format!("remove merged input: {}", path.display()), e))?;
    }
    log::debug!("Finished merging into {}, merged length: {} records", output.display(), merged);
    Ok(merged)
}

/// Merges one group of sorted files in a pool worker
pub(crate) struct MergeTask {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    sort_key: SortKey,
    header: Option<Arc<[u8]>>,
    delimiter: u8,
}

impl MergeTask {
    pub(crate) fn new(
        inputs: Vec<PathBuf>,
        output: PathBuf,
        sort_key: SortKey,
        header: Option<Arc<[u8]>>,
        delimiter: u8,
    ) -> MergeTask {
        MergeTask {
            inputs,
            output,
            sort_key,
            header,
            delimiter,
        }
    }
}

impl Task for MergeTask {
    fn run(&self) -> Result<(), SortError> {
        merge_files(&self.inputs, &self.output, &self.sort_key, self.header.as_deref(), self.delimiter)?;
        Ok(())
    }

    fn name(&self) -> String {
        format!("merge {} files into {}", self.inputs.len(), self.output.display())
    }
}

/// Group `files` into merge tasks of at most `fan_in` files each, keeping listing order
pub(crate) fn build_merge_tasks(files: Vec<PathBuf>, fan_in: usize) -> Vec<Vec<PathBuf>> {
    files.chunks(fan_in).map(|batch| batch.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use crate::merger::{build_merge_tasks, merge_files};
    use crate::sort_key::SortKey;

    #[test]
    fn test_merge_three_files() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        let c = dir.path().join("c.csv");
        fs::write(&a, b"1,a\n4,a\n7,a\n")?;
        fs::write(&b, b"2,b\n5,b\n")?;
        fs::write(&c, b"0,c\n3,c\n6,c\n8,c\n")?;
        let output = dir.path().join("out.csv");

        let merged = merge_files(&[a.clone(), b.clone(), c.clone()], &output, &SortKey::new(vec![0])?, None, b',')?;
        assert_eq!(merged, 9);
        assert_eq!(fs::read_to_string(&output)?, "0,c\n1,a\n2,b\n3,c\n4,a\n5,b\n6,c\n7,a\n8,c\n");
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(!c.exists());
        Ok(())
    }

    #[test]
    fn test_ties_keep_stream_order() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, b"1,first\n1,second\n")?;
        fs::write(&b, b"1,third\n")?;
        let output = dir.path().join("out.csv");
        merge_files(&[a, b], &output, &SortKey::new(vec![0])?, None, b',')?;
        let lines: Vec<String> = fs::read_to_string(&output)?.lines().map(|l| l.to_string()).collect();
        let first = lines.iter().position(|l| l == "1,first").unwrap();
        let second = lines.iter().position(|l| l == "1,second").unwrap();
        assert!(first < second);
        assert_eq!(lines.len(), 3);
        Ok(())
    }

    #[test]
    fn test_header_and_empty_input() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.csv");
        let empty = dir.path().join("empty.csv");
        fs::write(&a, b"1,\"x,y\"\n")?;
        fs::write(&empty, b"")?;
        let output = dir.path().join("out.csv");
        merge_files(&[a, empty.clone()], &output, &SortKey::new(vec![0])?, Some(&b"id,value"[..]), b',')?;
        assert_eq!(fs::read_to_string(&output)?, "id,value\n1,\"x,y\"\n");
        assert!(!empty.exists());
        Ok(())
    }

    #[test]
    fn test_no_inputs() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.csv");
        let merged = merge_files(&[], &output, &SortKey::new(vec![0])?, Some(&b"a,b\n"[..]), b',')?;
        assert_eq!(merged, 0);
        assert_eq!(fs::read_to_string(&output)?, "a,b\n");
        Ok(())
    }

    #[test]
    fn test_build_merge_tasks() {
        let files: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("{i}"))).collect();
        let tasks = build_merge_tasks(files, 2);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0], vec![PathBuf::from("0"), PathBuf::from("1")]);
        assert_eq!(tasks[2], vec![PathBuf::from("4")]);
        assert!(build_merge_tasks(vec![], 2).is_empty());
    }
}
