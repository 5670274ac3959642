use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use data_encoding::HEXLOWER;

use crate::error::SortError;

const WORKSPACE_PREFIX: &str = ".delimited-sort-";
const FILE_EXTENSION: &str = "csv";

/// Temporary directory holding every chunk and merge file of one run.
///
/// The directory is flat. At the start of each merge round it holds exactly the sorted files
/// still waiting to be merged. File names come from a per-run monotonic sequence so no two
/// writers ever share a file.
#[derive(Debug)]
pub(crate) struct Workspace {
    path: PathBuf,
    sequence: AtomicUsize,
}

impl Workspace {
    /// Create the workspace at exactly `path`
    pub(crate) fn create(path: PathBuf) -> Result<Workspace, SortError> {
        match fs::create_dir(&path) {
            Ok(()) => {
                log::info!("Created workspace {}", path.display());
                Ok(
                    Workspace {
                        path,
                        sequence: AtomicUsize::new(0),
                    }
                )
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(SortError::WorkspaceConflict { path })
            }
            Err(e) => Err(SortError::io(format!("create workspace: {}", path.display()), e)),
        }
    }

    /// Create a workspace with a random name inside `parent`
    pub(crate) fn create_in(parent: &Path) -> Result<Workspace, SortError> {
        let name = format!("{}{}", WORKSPACE_PREFIX, HEXLOWER.encode(&rand::random::<[u8; 8]>()));
        Self::create(parent.join(name))
    }

    pub(crate) fn path(&self) -> &PathBuf {
        &self.path
    }

    pub(crate) fn next_chunk_path(&self) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.path.join(format!("chunk-{:08}.{}", seq, FILE_EXTENSION))
    }

    pub(crate) fn next_merge_path(&self, round: usize) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.path.join(format!("merge-{:04}-{:08}.{}", round, seq, FILE_EXTENSION))
    }

    /// Point in time listing of the workspace, sorted by file name. Callers must make sure no
    /// worker is still writing.
    pub(crate) fn snapshot(&self) -> Result<Vec<PathBuf>, SortError> {
        let context = || format!("list workspace: {}", self.path.display());
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(|e| SortError::io(context(), e))? {
            let entry = entry.map_err(|e| SortError::io(context(), e))?;
            let file_type = entry.file_type().map_err(|e| SortError::io(context(), e))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove the workspace directory, which must be empty by now
    pub(crate) fn remove(self) -> Result<(), SortError> {
        fs::remove_dir(&self.path)
            .map_err(|e| SortError::io(format!("remove workspace: {}", self.path.display()), e))?;
        log::info!("Removed workspace {}", self.path.display());
        Ok(())
    }
}
