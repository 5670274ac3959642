use std::cmp::min;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rlimit::{getrlimit, setrlimit, Resource};

use crate::chunk_sorter::{reader_builder, SortTask};
use crate::config::{Config, WorkspaceLocation};
use crate::error::SortError;
use crate::line_record::LineRecord;
use crate::merger::{build_merge_tasks, merge_files, MergeTask};
use crate::partitioner::partition;
use crate::sort_key::SortKey;
use crate::worker_pool::WorkerPool;
use crate::workspace::Workspace;

const MIB: u64 = 1_048_576;

/// Pipeline phase, used to report where a run stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Partitioning,
    Sorting,
    Merging { round: usize },
    Finalizing,
    Done,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Partitioning => write!(f, "partitioning"),
            Phase::Sorting => write!(f, "sorting"),
            Phase::Merging { round } => write!(f, "merging, round {}", round),
            Phase::Finalizing => write!(f, "finalizing"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Sort a delimited file with every parameter except the key columns and worker count at its
/// default. Returns the path of the sorted file, a sibling of `path` with a `_sorted` suffix.
///
/// # Examples
/// ```
/// use std::path::{Path, PathBuf};
/// use delimited_file_sort::error::SortError;
/// use delimited_file_sort::sort::sort_file;
///
/// fn sort_by_id(input: &Path) -> Result<PathBuf, SortError> {
///     sort_file(input, vec![0], 4)
/// }
/// ```
pub fn sort_file(path: &Path, key_columns: Vec<usize>, tasks: usize) -> Result<PathBuf, SortError> {
    let mut sort = Sort::new(path.to_path_buf(), key_columns);
    sort.with_tasks(tasks);
    sort.sort()
}

/// External sort of a delimited file
///
/// # Examples
/// ```
/// use std::path::PathBuf;
/// use delimited_file_sort::error::SortError;
/// use delimited_file_sort::sort::Sort;
///
/// // sort a TSV file without a header by the second column, ties broken by the first
/// fn sort_records(input: PathBuf, tmp: PathBuf) -> Result<PathBuf, SortError> {
///     let mut sort = Sort::new(input, vec![1, 0]);
///     sort.with_header(false);
///     sort.with_delimiter('\t');
///     sort.with_tasks(2);
///     // merge 8 files at a time
///     sort.with_fan_in(8);
///     sort.with_chunk_size_mib(64);
///     sort.with_tmp_dir(tmp);
///     sort.sort()
/// }
/// ```
pub struct Sort {
    input: PathBuf,
    key_columns: Vec<usize>,
    tasks: usize,
    fan_in: usize,
    chunk_size_bytes: u64,
    has_header: bool,
    delimiter: char,
    overwrite: bool,
    tmp: Option<PathBuf>,
    workspace: Option<PathBuf>,
}

impl Sort {
    /// Create a default Sort definition.
    ///
    /// * all available cores are used
    /// * two files are merged at a time
    /// * the input is split into chunks of 100 MiB
    /// * the first line is a header
    /// * the delimiter is ','
    /// * the result is written next to the input with a `_sorted` suffix
    /// * the workspace is created in the directory of the input
    pub fn new(input: PathBuf, key_columns: Vec<usize>) -> Sort {
        Sort {
            input,
            key_columns,
            tasks: 0,
            fan_in: 2,
            chunk_size_bytes: 100 * MIB,
            has_header: true,
            delimiter: ',',
            overwrite: false,
            tmp: None,
            workspace: None,
        }
    }

    /// Set the number of tasks. The default is zero which will result in using all system cores
    pub fn with_tasks(&mut self, tasks: usize) {
        self.tasks = tasks;
    }

    /// Set the number of files merged at once. Must be at least 2.
    pub fn with_fan_in(&mut self, fan_in: usize) {
        self.fan_in = fan_in;
    }

    /// The input is split into chunks of about 'chunk_size_bytes' bytes respecting record
    /// boundaries. Each chunk is sorted in memory so this bounds memory per worker.
    pub fn with_chunk_size_bytes(&mut self, chunk_size_bytes: u64) {
        self.chunk_size_bytes = chunk_size_bytes;
    }

    /// Same as [Sort::with_chunk_size_bytes] in MiB
    pub fn with_chunk_size_mib(&mut self, chunk_size_mib: u64) {
        self.chunk_size_bytes = chunk_size_mib * MIB;
    }

    /// Whether the first record is a header. The header is copied verbatim to the output.
    pub fn with_header(&mut self, has_header: bool) {
        self.has_header = has_header;
    }

    /// Set the field delimiter, a single ASCII character. The default is ','
    pub fn with_delimiter(&mut self, delimiter: char) {
        self.delimiter = delimiter;
    }

    /// Replace the input with the sorted result
    pub fn with_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    /// Set the directory in which a uniquely named workspace is created. It is recommended
    /// to use a directory on the same file system as the input.
    pub fn with_tmp_dir(&mut self, tmp: PathBuf) {
        self.tmp = Some(tmp);
    }

    /// Use exactly this workspace directory. The run fails if it already exists.
    pub fn with_workspace(&mut self, workspace: PathBuf) {
        self.workspace = Some(workspace);
    }

    /// Append a column to the sort key
    pub fn add_key_column(&mut self, column: usize) {
        self.key_columns.push(column);
    }

    /// Replace the sort key columns
    pub fn with_key_columns(&mut self, key_columns: Vec<usize>) {
        self.key_columns = key_columns;
    }

    /// Sort the input. Returns the path of the sorted file.
    ///
    /// On failure the workspace is left in place for inspection and has to be removed before
    /// the run is retried.
    ///
    /// The process wide soft limit of open files is raised to cover every worker merging at full
    /// fan-in, up to the hard limit. It is never lowered again, so runs sharing the process never
    /// take file descriptors away from each other.
    pub fn sort(&self) -> Result<PathBuf, SortError> {
        let config = self.create_config()?;
        Self::raise_rlimits(config.files())?;
        Self::internal_sort(&self.input, &config)
    }

    /// Check whether the input is sorted by the key columns
    pub fn check(&self) -> Result<bool, SortError> {
        let config = self.create_config()?;
        Self::internal_check(&self.input, &config)
    }

    fn raise_rlimits(files: usize) -> Result<(), SortError> {
        let (current_soft, current_hard) = Self::get_rlimits()?;
        log::info!("Current rlimit NOFILE, soft: {}, hard: {}", current_soft, current_hard);
        let new_soft = min((files + 256) as u64, current_hard);
        if new_soft > current_soft {
            log::info!("Set new rlimit NOFILE, soft: {}, hard: {}", new_soft, current_hard);
            Self::set_rlimits(new_soft, current_hard)?;
        }
        Ok(())
    }

    fn get_rlimits() -> Result<(u64, u64), SortError> {
        getrlimit(Resource::NOFILE).map_err(|e| SortError::io("getrlimit NOFILE".to_string(), e))
    }

    fn set_rlimits(soft: u64, hard: u64) -> Result<(), SortError> {
        setrlimit(Resource::NOFILE, soft, hard)
            .map_err(|e| SortError::io(format!("set rlimit NOFILE, soft: {}, hard: {}", soft, hard), e))
    }

    fn create_config(&self) -> Result<Config, SortError> {
        let sort_key = SortKey::new(self.key_columns.clone())?;

        if self.fan_in < 2 {
            return Err(SortError::invalid_parameter("fan_in", "must be at least 2"));
        }

        if self.chunk_size_bytes == 0 {
            return Err(SortError::invalid_parameter("chunk_size_bytes", "must be greater than zero"));
        }

        let delimiter = match u8::try_from(self.delimiter) {
            Ok(b) if b.is_ascii() && b != b'"' && b != b'\n' && b != b'\r' => b,
            _ => return Err(SortError::invalid_parameter("delimiter", "must be a single ASCII character other than a quote or a line break")),
        };

        let mut tasks = self.tasks;
        if self.tasks == 0 {
            tasks = num_cpus::get();
        }

        let workspace = match (&self.workspace, &self.tmp) {
            (Some(workspace), _) => WorkspaceLocation::At(workspace.clone()),
            (None, Some(tmp)) => WorkspaceLocation::In(tmp.clone()),
            (None, None) => WorkspaceLocation::In(Self::parent_dir(&self.input)),
        };

        Ok(
            Config::new(
                workspace,
                tasks,
                self.fan_in,
                self.chunk_size_bytes,
                self.has_header,
                delimiter,
                self.overwrite,
                sort_key,
            )
        )
    }

    fn parent_dir(path: &Path) -> PathBuf {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// `<stem>_sorted.<ext>` next to the input, or the input itself when overwriting
    pub(crate) fn destination(input: &Path, overwrite: bool) -> PathBuf {
        if overwrite {
            return input.to_path_buf();
        }
        let mut name = OsString::from(input.file_stem().unwrap_or(input.as_os_str()));
        name.push("_sorted");
        if let Some(extension) = input.extension() {
            name.push(".");
            name.push(extension);
        }
        input.with_file_name(name)
    }

    fn internal_sort(input: &Path, config: &Config) -> Result<PathBuf, SortError> {
        log::info!("Start parallel sort of {}", input.display());
        let workspace = match config.workspace() {
            WorkspaceLocation::At(path) => Workspace::create(path.clone())?,
            WorkspaceLocation::In(parent) => Workspace::create_in(parent)?,
        };

        let workspace_path = workspace.path().clone();
        let mut phase = Phase::Partitioning;
        let result = Self::run_phases(input, config, &workspace, &mut phase)
            .and_then(|sorted| Self::finalize(sorted, input, config))
            .and_then(|output| workspace.remove().map(|_| output));
        match result {
            Ok(output) => {
                log::info!("Finish parallel sort, output: {}, phase: {}", output.display(), Phase::Done);
                Ok(output)
            }
            Err(e) => {
                log::error!("Sort failed while {}, workspace left at {}: {}", phase, workspace_path.display(), e);
                Err(e)
            }
        }
    }

    /// Drive partition, sort and merge rounds. Returns the single sorted file left in the
    /// workspace.
    fn run_phases(input: &Path, config: &Config, workspace: &Workspace, phase: &mut Phase) -> Result<PathBuf, SortError> {
        let (chunks, header) = partition(
            input,
            workspace,
            config.chunk_size_bytes(),
            config.has_header(),
            config.delimiter(),
            config.sort_key(),
        )?.into_parts();

        if chunks.is_empty() {
            *phase = Phase::Finalizing;
            let output = workspace.next_merge_path(0);
            merge_files(&[], &output, config.sort_key(), header.as_deref(), config.delimiter())?;
            return Ok(output);
        }

        let mut pool = WorkerPool::new(config.tasks(), config.queue_size())?;
        let result = Self::sort_and_merge(&mut pool, chunks, header, config, workspace, phase);
        let shutdown = pool.shutdown();
        let sorted = result?;
        shutdown?;
        *phase = Phase::Finalizing;
        Ok(sorted)
    }

    fn sort_and_merge(
        pool: &mut WorkerPool,
        chunks: Vec<PathBuf>,
        header: Option<Vec<u8>>,
        config: &Config,
        workspace: &Workspace,
        phase: &mut Phase,
    ) -> Result<PathBuf, SortError> {
        *phase = Phase::Sorting;
        log::info!("Sorting {} chunks with {} tasks", chunks.len(), config.tasks());
        let sort_tasks = chunks.into_iter()
            .map(|path| SortTask::new(path, config.sort_key().clone(), config.delimiter()))
            .collect();
        pool.run_all(sort_tasks)?;

        let header: Option<Arc<[u8]>> = header.map(Arc::from);
        let mut header_written = header.is_none();
        let mut round = 0;
        loop {
            let mut files = workspace.snapshot()?;
            if files.len() == 1 && header_written {
                return files.pop().ok_or_else(|| SortError::WorkerFailure {
                    reason: "no sorted file left in workspace".to_string(),
                });
            }
            if files.is_empty() {
                return Err(SortError::WorkerFailure { reason: "no sorted file left in workspace".to_string() });
            }

            round += 1;
            *phase = Phase::Merging { round };
            let batches = build_merge_tasks(files, config.fan_in());
            let final_round = batches.len() == 1;
            log::info!("Merge round {}: {} tasks, final: {}", round, batches.len(), final_round);
            let merge_tasks = batches.into_iter()
                .map(|inputs| {
                    MergeTask::new(
                        inputs,
                        workspace.next_merge_path(round),
                        config.sort_key().clone(),
                        if final_round { header.clone() } else { None },
                        config.delimiter(),
                    )
                })
                .collect();
            pool.run_all(merge_tasks)?;
            if final_round {
                header_written = true;
            }
        }
    }

    fn finalize(sorted: PathBuf, input: &Path, config: &Config) -> Result<PathBuf, SortError> {
        let output = Self::destination(input, config.overwrite());
        if let Err(e) = fs::rename(&sorted, &output) {
            log::info!("Rename {} to {} failed ({}), copying instead", sorted.display(), output.display(), e);
            fs::copy(&sorted, &output)
                .map_err(|e| SortError::io(format!("copy {} to {}", sorted.display(), output.display()), e))?;
            fs::remove_file(&sorted)
                .map_err(|e| SortError::io(format!("remove {}", sorted.display()), e))?;
        }
        Ok(output)
    }

    pub(crate) fn internal_check(path: &Path, config: &Config) -> Result<bool, SortError> {
        let mut builder = reader_builder(config.delimiter());
        builder.has_headers(config.has_header());
        let mut reader = builder.from_path(path).map_err(|e| SortError::csv(path, e))?;
        let mut previous: Option<LineRecord> = None;
        for result in reader.byte_records() {
            let record = result.map_err(|e| SortError::csv(path, e))?;
            let current = LineRecord::new(record, config.sort_key(), path)?;
            if let Some(previous) = &previous {
                if previous > &current {
                    return Ok(false);
                }
            }
            previous = Some(current);
        }
        Ok(true)
    }
}
