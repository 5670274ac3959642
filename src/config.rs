use std::path::PathBuf;

use crate::sort_key::SortKey;

/// Validated, immutable run parameters
#[derive(Clone, Debug)]
pub(crate) struct Config {
    workspace: WorkspaceLocation,
    tasks: usize,
    queue_size: usize,
    fan_in: usize,
    chunk_size_bytes: u64,
    has_header: bool,
    delimiter: u8,
    overwrite: bool,
    sort_key: SortKey,
}

/// Where the run keeps its intermediate files
#[derive(Clone, Debug)]
pub(crate) enum WorkspaceLocation {
    /// Generate a uniquely named directory inside this parent
    In(PathBuf),
    /// Use exactly this directory, which must not exist yet
    At(PathBuf),
}

impl Config {
    pub(crate) fn new(
        workspace: WorkspaceLocation,
        tasks: usize,
        fan_in: usize,
        chunk_size_bytes: u64,
        has_header: bool,
        delimiter: u8,
        overwrite: bool,
        sort_key: SortKey,
    ) -> Config {
        let queue_size = 4096;
        Config {
            workspace,
            tasks,
            queue_size,
            fan_in,
            chunk_size_bytes,
            has_header,
            delimiter,
            overwrite,
            sort_key,
        }
    }

    pub(crate) fn workspace(&self) -> &WorkspaceLocation {
        &self.workspace
    }

    pub(crate) fn tasks(&self) -> usize {
        self.tasks
    }

    pub(crate) fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub(crate) fn fan_in(&self) -> usize {
        self.fan_in
    }

    pub(crate) fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_bytes
    }

    pub(crate) fn has_header(&self) -> bool {
        self.has_header
    }

    pub(crate) fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub(crate) fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub(crate) fn sort_key(&self) -> &SortKey {
        &self.sort_key
    }

    /// Open files needed when every worker runs a full fan-in merge at once
    pub(crate) fn files(&self) -> usize {
        self.tasks * (self.fan_in + 1)
    }
}
