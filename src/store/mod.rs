//! Dataset Reader/Writer Adapter
//!
//! Thin wrapper over the NumPy `.npz` container: a zip archive holding one
//! `.npy` member per named array. Session recordings and merged datasets are
//! both stored this way, so Python tooling can open them with `numpy.load`.
//!
//! ## Contract
//!
//! - [`DatasetReader`] holds exactly one open file handle and releases it on
//!   drop, so every key of a file is read through the same scoped handle.
//! - [`read_array`] opens, reads one key, and closes.
//! - [`write_arrays`] writes every key to a temporary sibling and renames it
//!   over the target. Either all keys land or the target is untouched.
//!
//! Members stored as `float64` are accepted and narrowed to `f32`.

use ndarray::Array2;
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File extension used for session recordings and merged datasets.
pub const NPZ_EXTENSION: &str = "npz";

/// Suffix NumPy appends to every member name inside an `.npz` archive.
const MEMBER_SUFFIX: &str = ".npy";

/// One named 2-D array, in the order it should be written.
pub type NamedArray = (String, Array2<f32>);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: OpenFailure,
    },

    #[error("{} has no array named '{key}'", path.display())]
    MissingKey { path: PathBuf, key: String },

    #[error("cannot read '{key}' from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        key: String,
        #[source]
        source: ReadNpzError,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteFailure,
    },
}

/// Why a container could not be opened.
#[derive(Debug, Error)]
pub enum OpenFailure {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("not a valid npz archive: {0}")]
    Archive(#[from] ReadNpzError),
}

/// Why a container could not be written.
#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Npz(#[from] WriteNpzError),
}

// ============================================================================
// Reading
// ============================================================================

/// An open `.npz` container.
///
/// The underlying file is closed when the reader is dropped.
pub struct DatasetReader {
    path: PathBuf,
    npz: NpzReader<File>,
    /// Raw member names as stored in the archive.
    members: Vec<String>,
}

impl DatasetReader {
    /// Open a container and index its member names.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source: OpenFailure| StoreError::Open {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(|e| open_err(e.into()))?;
        let mut npz = NpzReader::new(file).map_err(|e| open_err(e.into()))?;
        let members = npz.names().map_err(|e| open_err(e.into()))?;

        debug!(file = %path.display(), members = members.len(), "Opened dataset");
        Ok(Self { path, npz, members })
    }

    /// Array names in archive order, without the `.npy` member suffix.
    pub fn keys(&self) -> Vec<&str> {
        self.members
            .iter()
            .map(|m| m.strip_suffix(MEMBER_SUFFIX).unwrap_or(m.as_str()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.member_name(key).is_some()
    }

    /// Read a named 2-D array as `f32`.
    pub fn read(&mut self, key: &str) -> Result<Array2<f32>, StoreError> {
        let member = self
            .member_name(key)
            .ok_or_else(|| StoreError::MissingKey {
                path: self.path.clone(),
                key: key.to_string(),
            })?
            .to_string();

        let single: Result<Array2<f32>, ReadNpzError> = self.npz.by_name(&member);
        match single {
            Ok(array) => Ok(array),
            Err(single_err) => {
                // Recordings written from float64 numpy arrays.
                let wide: Result<Array2<f64>, _> = self.npz.by_name(&member);
                match wide {
                    Ok(array) => {
                        debug!(file = %self.path.display(), key, "Narrowing float64 array to f32");
                        Ok(array.mapv(|v| v as f32))
                    }
                    Err(_) => Err(StoreError::Read {
                        path: self.path.clone(),
                        key: key.to_string(),
                        source: single_err,
                    }),
                }
            }
        }
    }

    fn member_name(&self, key: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.as_str() == key || m.strip_suffix(MEMBER_SUFFIX) == Some(key))
            .map(String::as_str)
    }
}

/// Open `path`, read one array, and close the file.
pub fn read_array(path: impl AsRef<Path>, key: &str) -> Result<Array2<f32>, StoreError> {
    DatasetReader::open(path)?.read(key)
}

// ============================================================================
// Writing
// ============================================================================

/// Write `arrays` to `path`, replacing any existing file.
///
/// The archive is written to `<path>.tmp` and renamed into place once every
/// member has been flushed. On failure the temporary file is removed and the
/// target is left as it was.
pub fn write_arrays(path: impl AsRef<Path>, arrays: &[NamedArray]) -> Result<(), StoreError> {
    let path = path.as_ref();
    let tmp_path = temp_sibling(path);

    let result = write_archive(&tmp_path, arrays)
        .and_then(|()| std::fs::rename(&tmp_path, path).map_err(WriteFailure::from));

    match result {
        Ok(()) => {
            debug!(file = %path.display(), arrays = arrays.len(), "Wrote dataset");
            Ok(())
        }
        Err(source) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(StoreError::Write {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

fn write_archive(tmp_path: &Path, arrays: &[NamedArray]) -> Result<(), WriteFailure> {
    let file = File::create(tmp_path)?;
    let mut npz = NpzWriter::new(file);
    for (key, array) in arrays {
        npz.add_array(key.as_str(), array)?;
    }
    let file = npz.finish()?;
    file.sync_all()?;
    Ok(())
}

/// `<dir>/<name>.tmp` next to the target, so the final rename stays on one
/// filesystem.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_write_then_read_by_key() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("session.npz");

        let a = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let b = array![[5.0_f32], [6.0]];
        write_arrays(&path, &[("a".into(), a.clone()), ("b".into(), b.clone())]).expect("write");

        let mut reader = DatasetReader::open(&path).expect("open");
        assert!(reader.contains("a"));
        assert!(reader.contains("b"));
        assert!(!reader.contains("c"));
        assert_eq!(reader.keys(), vec!["a", "b"]);
        assert_eq!(reader.read("b").expect("read b"), b);
        assert_eq!(reader.read("a").expect("read a"), a);
    }

    #[test]
    fn test_missing_key() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("session.npz");
        write_arrays(&path, &[("a".into(), Array2::zeros((1, 1)))]).expect("write");

        let err = read_array(&path, "nope").unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { ref key, .. } if key == "nope"));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let err = read_array(dir.path().join("absent.npz"), "a").unwrap_err();
        assert!(matches!(err, StoreError::Open { .. }));
    }

    #[test]
    fn test_open_corrupt_file() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("corrupt.npz");
        std::fs::write(&path, b"definitely not a zip archive").expect("write junk");

        let err = DatasetReader::open(&path).err().expect("open should fail");
        assert!(matches!(err, StoreError::Open { .. }));
    }

    #[test]
    fn test_float64_members_are_narrowed() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("wide.npz");
        let wide = array![[0.5_f64, -1.25], [2.0, 8.0]];
        {
            let file = File::create(&path).expect("create");
            let mut npz = NpzWriter::new(file);
            npz.add_array("w", &wide).expect("add");
            npz.finish().expect("finish");
        }

        let narrowed = read_array(&path, "w").expect("read");
        assert_eq!(narrowed, array![[0.5_f32, -1.25], [2.0, 8.0]]);
    }

    #[test]
    fn test_overwrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("out.npz");
        write_arrays(&path, &[("a".into(), Array2::zeros((2, 2)))]).expect("first write");
        write_arrays(&path, &[("a".into(), Array2::ones((3, 2)))]).expect("second write");

        assert_eq!(read_array(&path, "a").expect("read").nrows(), 3);
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_write_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("no_such_dir").join("out.npz");
        let err = write_arrays(&path, &[("a".into(), Array2::zeros((1, 1)))]).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(!path.exists());
    }
}
