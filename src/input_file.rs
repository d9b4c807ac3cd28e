//! Single feature row as text (`input.txt`).
//!
//! One line of comma-separated values, each printed as `%.6f`, followed by a
//! newline. Meant for eyeballing and for smoke-testing the inference runtime,
//! not for bulk data.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Digits after the decimal point.
pub const DECIMALS: usize = 6;

#[derive(Debug, Error)]
pub enum InputFileError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: '{token}' is not a number", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },
}

/// Format one row the way `numpy.savetxt(fmt='%.6f', delimiter=',')` does.
pub fn format_row(row: &[f32]) -> String {
    let mut line = row.iter().map(|&v| format_value(v)).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

/// C `printf` spelling: `nan`, `inf`, `-inf`.
fn format_value(v: f32) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{v:.prec$}", prec = DECIMALS)
    }
}

/// Write `row` to `path`, replacing it atomically.
pub fn write_feature_row(path: &Path, row: &[f32]) -> Result<(), InputFileError> {
    let io_err = |source: std::io::Error| InputFileError::Io {
        path: path.to_path_buf(),
        source,
    };

    let tmp_path = crate::store::temp_sibling(path);
    let result = (|| {
        let file = std::fs::File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(format_row(row).as_bytes())?;
        writer.flush()?;
        std::fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result.map_err(io_err)
}

/// Read every value in `path`. Values may be separated by commas or
/// whitespace and span several lines.
pub fn read_feature_row(path: &Path) -> Result<Vec<f32>, InputFileError> {
    let file = std::fs::File::open(path).map_err(|source| InputFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| InputFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let value = token.parse::<f32>().map_err(|_| InputFileError::Parse {
                path: path.to_path_buf(),
                line: index + 1,
                token: token.to_string(),
            })?;
            values.push(value);
        }
    }
    Ok(values)
}
