//! This crate implements an external sort for delimited text files, for example CSV or TSV,
//! that are too large to be sorted in memory.
//!
//! The input is split into chunks of bounded size, every chunk is sorted in memory by a pool
//! of workers, and the sorted chunks are merged in rounds of bounded fan-in until a single
//! sorted file remains. Records are compared by a composite key of column indices, field values
//! are compared as text. Fields may be quoted the usual CSV way, so a quoted field may contain
//! the delimiter, doubled quotes or line breaks. An optional header line is carried through and
//! written once, at the top of the result.
//!
//! Intermediate files live in a workspace directory owned by the run. On success the workspace
//! is removed. On failure it is left in place for inspection and the run has to be retried from
//! scratch.
//!
//! # Examples
//! ```
//! use std::path::PathBuf;
//! use delimited_file_sort::error::SortError;
//! use delimited_file_sort::sort::Sort;
//!
//! // optimized for use with Jemalloc
//! use tikv_jemallocator::Jemalloc;
//! #[global_allocator]
//! static GLOBAL: Jemalloc = Jemalloc;
//!
//! // sort by the first column, ties broken by the third
//! fn sort_records(input: PathBuf, tmp: PathBuf) -> Result<PathBuf, SortError> {
//!     let mut sort = Sort::new(input, vec![0, 2]);
//!
//!     // set number of CPU cores the sort will attempt to use. The default is to use all
//!     // available cores.
//!     sort.with_tasks(2);
//!
//!     // the chunk size bounds the memory used by each worker
//!     sort.with_chunk_size_mib(16);
//!
//!     // set the parent directory of the workspace. The default is the directory of the input,
//!     // keep it on the same file system as the input so the result can be moved in place.
//!     sort.with_tmp_dir(tmp);
//!
//!     sort.sort()
//! }
//! ```
//!

pub(crate) mod chunk_sorter;
pub(crate) mod config;
pub(crate) mod key;
pub(crate) mod line_record;
pub(crate) mod merger;
pub(crate) mod partitioner;
pub(crate) mod worker_pool;
pub(crate) mod workspace;

pub mod error;
pub mod sort;
pub mod sort_key;
