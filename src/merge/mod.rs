//! Multi-File Merger
//!
//! Consolidates per-session recordings into one dataset:
//!
//! ```text
//! sessions (sorted) ──► read phase ──► [FileReport; n] ──► fold ──► stack ──► write
//!                       (per file,      Ingested|Skipped    accumulator   per key        temp+rename
//!                        optionally
//!                        on rayon)
//! ```
//!
//! Every key of a session is read through one handle in one pass, and a
//! session is either ingested whole or skipped whole. Row `i` of every
//! merged array therefore comes from the same source sample.
//!
//! A column-count disagreement between sessions aborts the whole run before
//! anything is written.

pub mod discovery;

pub use discovery::discover_sessions;

use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DatasetConfig;
use crate::store::{self, DatasetReader, NamedArray, StoreError};

// ============================================================================
// Errors
// ============================================================================

/// Fatal merge failures. Per-file problems are [`SkipReason`]s instead.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(
        "column mismatch for '{key}': {} has {found} columns but {} has {expected}",
        path.display(),
        first_path.display()
    )]
    ShapeMismatch {
        key: String,
        expected: usize,
        found: usize,
        path: PathBuf,
        first_path: PathBuf,
    },

    #[error("cannot create output directory {}: {source}", dir.display())]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write merged dataset: {0}")]
    Write(#[source] StoreError),
}

/// Why a session contributed no rows.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Unreadable(StoreError),

    #[error("missing required arrays: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("arrays disagree on row count ({})", describe_counts(.0))]
    RowCountMismatch(Vec<(String, usize)>),
}

fn describe_counts(counts: &[(String, usize)]) -> String {
    counts
        .iter()
        .map(|(key, rows)| format!("{key}: {rows}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Per-file read phase
// ============================================================================

/// Every required array of one session, in required-key order.
#[derive(Debug)]
pub struct SessionArrays {
    pub rows: usize,
    pub arrays: Vec<NamedArray>,
}

#[derive(Debug)]
pub enum FileOutcome {
    Ingested(SessionArrays),
    Skipped(SkipReason),
}

/// Result of reading one session file.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

impl FileReport {
    fn summary(&self) -> FileSummary {
        FileSummary {
            path: self.path.clone(),
            status: match &self.outcome {
                FileOutcome::Ingested(session) => FileStatus::Ingested { rows: session.rows },
                FileOutcome::Skipped(reason) => FileStatus::Skipped {
                    reason: reason.to_string(),
                },
            },
        }
    }

    fn log(&self) {
        match &self.outcome {
            FileOutcome::Ingested(session) => {
                info!(file = %self.path.display(), rows = session.rows, "Collected session");
            }
            FileOutcome::Skipped(reason) => {
                warn!(file = %self.path.display(), reason = %reason, "Skipping session");
            }
        }
    }
}

/// Read all `keys` from one session through a single file handle.
pub fn ingest_session(path: &Path, keys: &[String]) -> FileOutcome {
    let mut reader = match DatasetReader::open(path) {
        Ok(r) => r,
        Err(e) => return FileOutcome::Skipped(SkipReason::Unreadable(e)),
    };

    let missing: Vec<String> = keys
        .iter()
        .filter(|key| !reader.contains(key))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return FileOutcome::Skipped(SkipReason::MissingKeys(missing));
    }

    let mut arrays = Vec::with_capacity(keys.len());
    for key in keys {
        match reader.read(key) {
            Ok(array) => arrays.push((key.clone(), array)),
            Err(e) => return FileOutcome::Skipped(SkipReason::Unreadable(e)),
        }
    }

    let rows = arrays.first().map_or(0, |(_, a)| a.nrows());
    if arrays.iter().any(|(_, a)| a.nrows() != rows) {
        let counts = arrays.iter().map(|(k, a)| (k.clone(), a.nrows())).collect();
        return FileOutcome::Skipped(SkipReason::RowCountMismatch(counts));
    }

    FileOutcome::Ingested(SessionArrays { rows, arrays })
}

// ============================================================================
// Accumulation
// ============================================================================

/// Where a block of merged rows came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub path: PathBuf,
    /// First merged row taken from this file.
    pub offset: usize,
    pub rows: usize,
}

/// Parts collected for one key, plus the file that fixed its column count.
struct KeyParts<'a> {
    key: &'a str,
    width: Option<(usize, &'a Path)>,
    parts: Vec<ArrayView2<'a, f32>>,
}

impl KeyParts<'_> {
    /// Stack the parts row-wise. `absorb` has already pinned every part to
    /// one column count.
    fn stack(&self) -> Array2<f32> {
        let rows = self.parts.iter().map(ArrayView2::nrows).sum();
        let cols = self.width.map_or(0, |(cols, _)| cols);
        let mut merged = Array2::zeros((rows, cols));
        let mut offset = 0;
        for part in &self.parts {
            merged
                .slice_mut(s![offset..offset + part.nrows(), ..])
                .assign(part);
            offset += part.nrows();
        }
        merged
    }
}

/// Fold state for the concatenation step. Threaded by value through
/// [`MergeAccumulator::absorb`]; nothing outside it is mutated.
pub struct MergeAccumulator<'a> {
    columns: Vec<KeyParts<'a>>,
    sources: Vec<SourceSpan>,
    total_rows: usize,
}

impl<'a> MergeAccumulator<'a> {
    pub fn new(keys: &'a [String]) -> Self {
        Self {
            columns: keys
                .iter()
                .map(|key| KeyParts {
                    key: key.as_str(),
                    width: None,
                    parts: Vec::new(),
                })
                .collect(),
            sources: Vec::new(),
            total_rows: 0,
        }
    }

    /// Add one report. Skipped files pass through untouched.
    pub fn absorb(mut self, report: &'a FileReport) -> Result<Self, MergeError> {
        let FileOutcome::Ingested(session) = &report.outcome else {
            return Ok(self);
        };

        for column in &mut self.columns {
            let Some((_, array)) = session.arrays.iter().find(|(k, _)| k == column.key) else {
                continue;
            };
            match column.width {
                None => column.width = Some((array.ncols(), report.path.as_path())),
                Some((expected, first_path)) if expected != array.ncols() => {
                    return Err(MergeError::ShapeMismatch {
                        key: column.key.to_string(),
                        expected,
                        found: array.ncols(),
                        path: report.path.clone(),
                        first_path: first_path.to_path_buf(),
                    });
                }
                Some(_) => {}
            }
            column.parts.push(array.view());
        }

        self.sources.push(SourceSpan {
            path: report.path.clone(),
            offset: self.total_rows,
            rows: session.rows,
        });
        self.total_rows += session.rows;
        Ok(self)
    }

    /// Stack every key's parts. Keys nobody supplied are listed as omitted.
    pub fn finish(self) -> MergedDataset {
        let mut arrays = Vec::new();
        let mut omitted = Vec::new();

        for column in self.columns {
            if column.parts.is_empty() {
                warn!(key = column.key, "No data was collected for dataset");
                omitted.push(column.key.to_string());
                continue;
            }
            let merged = column.stack();
            info!(key = column.key, rows = merged.nrows(), cols = merged.ncols(), "Merged dataset");
            arrays.push((column.key.to_string(), merged));
        }

        MergedDataset {
            arrays,
            omitted,
            sources: self.sources,
        }
    }
}

/// In-memory result of concatenation, before it is written.
#[derive(Debug)]
pub struct MergedDataset {
    pub arrays: Vec<NamedArray>,
    pub omitted: Vec<String>,
    pub sources: Vec<SourceSpan>,
}

/// Fold `reports` in order and concatenate.
pub fn concatenate_sessions(keys: &[String], reports: &[FileReport]) -> Result<MergedDataset, MergeError> {
    let accumulator = reports
        .iter()
        .try_fold(MergeAccumulator::new(keys), MergeAccumulator::absorb)?;
    Ok(accumulator.finish())
}

// ============================================================================
// Outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Ingested { rows: usize },
    Skipped { reason: String },
}

/// Per-file line of the merge report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub output: PathBuf,
    /// `(key, (rows, cols))` for every written array.
    pub shapes: Vec<(String, (usize, usize))>,
    pub omitted: Vec<String>,
    pub sources: Vec<SourceSpan>,
    pub files: Vec<FileSummary>,
}

impl MergeSummary {
    pub fn skipped(&self) -> impl Iterator<Item = &FileSummary> {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Skipped { .. }))
    }
}

/// What a merge run did. Neither variant is an error.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Written(MergeSummary),
    /// No session yielded data; no output file was created.
    NothingToMerge { files: Vec<FileSummary> },
}

// ============================================================================
// Merger
// ============================================================================

/// Merges session recordings that all carry `keys`.
#[derive(Debug, Clone)]
pub struct SessionMerger {
    keys: Vec<String>,
    parallel_reads: bool,
}

impl SessionMerger {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            parallel_reads: false,
        }
    }

    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(config.keys.required()).with_parallel_reads(config.parallel_reads)
    }

    #[must_use]
    pub fn with_parallel_reads(mut self, parallel: bool) -> Self {
        self.parallel_reads = parallel;
        self
    }

    /// Read phase. Reports come back in `paths` order whether or not the
    /// reads ran in parallel.
    pub fn read_sessions(&self, paths: &[PathBuf]) -> Vec<FileReport> {
        let read = |path: &PathBuf| FileReport {
            path: path.clone(),
            outcome: ingest_session(path, &self.keys),
        };
        let reports: Vec<FileReport> = if self.parallel_reads {
            paths.par_iter().map(read).collect()
        } else {
            paths.iter().map(read).collect()
        };

        for report in &reports {
            report.log();
        }
        reports
    }

    /// Merge `paths` (in the given order) into `output`.
    pub fn merge(&self, paths: &[PathBuf], output: &Path) -> Result<MergeOutcome, MergeError> {
        if paths.is_empty() {
            info!("File list is empty, nothing to merge");
            return Ok(MergeOutcome::NothingToMerge { files: Vec::new() });
        }

        info!(files = paths.len(), parallel = self.parallel_reads, "Reading sessions");
        let reports = self.read_sessions(paths);
        let files: Vec<FileSummary> = reports.iter().map(FileReport::summary).collect();

        let merged = concatenate_sessions(&self.keys, &reports)?;
        if merged.arrays.is_empty() {
            info!("No data was merged, output file will not be created");
            return Ok(MergeOutcome::NothingToMerge { files });
        }

        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| MergeError::CreateDir {
                dir: dir.to_path_buf(),
                source,
            })?;
        }
        store::write_arrays(output, &merged.arrays).map_err(MergeError::Write)?;

        let shapes = merged
            .arrays
            .iter()
            .map(|(key, a)| (key.clone(), a.dim()))
            .collect();
        info!(output = %output.display(), sessions = merged.sources.len(), "Merged dataset saved");

        Ok(MergeOutcome::Written(MergeSummary {
            output: output.to_path_buf(),
            shapes,
            omitted: merged.omitted,
            sources: merged.sources,
            files,
        }))
    }

    /// Discover `<dir>/<prefix>*<suffix>` and merge the sorted list.
    pub fn merge_directory(
        &self,
        dir: &Path,
        prefix: &str,
        suffix: &str,
        output: &Path,
    ) -> Result<MergeOutcome, MergeError> {
        let paths = discover_sessions(dir, prefix, suffix);
        if paths.is_empty() {
            warn!(dir = %dir.display(), pattern = %format!("{prefix}*{suffix}"), "No session files found");
        }
        self.merge(&paths, output)
    }
}
