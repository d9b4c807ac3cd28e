//! Pipeline Configuration - dataset locations, trajectory layout, scaler paths
//!
//! Every path and dimension the scripts used to hardcode is a field here.
//! Each struct implements `Default` with the values those scripts used, so
//! running without a config file reproduces their behavior.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::features::{FlattenOrder, TrajectoryLayout};
use crate::store::NPZ_EXTENSION;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "TRAJPREP_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "trajprep.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$TRAJPREP_CONFIG` env var
/// 2. `./trajprep.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Session discovery and merge output
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Shape of current-state and reference-path rows
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Single-sample feature file
    #[serde(default)]
    pub input: InputConfig,

    /// Persisted normalizers and the exported parameter file
    #[serde(default)]
    pub scalers: ScalerConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TRAJPREP_CONFIG` environment variable
    /// 2. `./trajprep.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        // 2. Check ./trajprep.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
                other => other,
            })?;
        Ok(config)
    }

    /// Parse and validate a TOML document. Unknown keys are logged, not
    /// rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check structural constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let l = &self.layout;
        if l.position_dims == 0 {
            errors.push("layout.position_dims must be at least 1".to_string());
        }
        if l.position_dims >= l.state_dim {
            errors.push(format!(
                "layout.position_dims ({}) must be less than layout.state_dim ({})",
                l.position_dims, l.state_dim
            ));
        }
        if l.reference_steps == 0 {
            errors.push("layout.reference_steps must be at least 1 (horizon + current step)".to_string());
        }

        let k = &self.dataset.keys;
        let names = [&k.current_state, &k.reference_path, &k.control];
        if names.iter().any(|n| n.trim().is_empty()) {
            errors.push("dataset.keys entries must be non-empty".to_string());
        }
        if k.current_state == k.reference_path
            || k.current_state == k.control
            || k.reference_path == k.control
        {
            errors.push(format!(
                "dataset.keys must be distinct (got '{}', '{}', '{}')",
                k.current_state, k.reference_path, k.control
            ));
        }
        if self.dataset.session_suffix.is_empty() {
            errors.push("dataset.session_suffix must be non-empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Output path of `merge`.
    pub fn merged_path(&self) -> PathBuf {
        self.dataset.data_dir.join(&self.dataset.merged_file)
    }

    /// Trajectory layout for the feature builder.
    pub fn trajectory_layout(&self) -> TrajectoryLayout {
        TrajectoryLayout {
            state_dim: self.layout.state_dim,
            position_dims: self.layout.position_dims,
            reference_steps: self.layout.reference_steps,
            order: self.layout.flatten_order,
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Dataset Config
// ============================================================================

/// Where session recordings live and where the merge lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory scanned for session recordings.
    pub data_dir: PathBuf,
    /// Session file name prefix, e.g. `data_ins_`.
    pub session_prefix: String,
    /// Session file name suffix, e.g. `.npz`.
    pub session_suffix: String,
    /// Merged output file name, created inside `data_dir`.
    pub merged_file: String,
    /// Read session files on the rayon pool. Output is identical either way.
    pub parallel_reads: bool,
    /// Array names every session must carry.
    pub keys: KeyConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            session_prefix: "data_ins_".to_string(),
            session_suffix: format!(".{NPZ_EXTENSION}"),
            merged_file: "merged_rows.npz".to_string(),
            parallel_reads: false,
            keys: KeyConfig::default(),
        }
    }
}

/// Array names inside a recording.
///
/// Recordings from the first collection campaign use `x_current`, `x_ref`
/// and `u_opt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub current_state: String,
    pub reference_path: String,
    pub control: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            current_state: "current_state".to_string(),
            reference_path: "reference_path_flat".to_string(),
            control: "optimal_control".to_string(),
        }
    }
}

impl KeyConfig {
    /// The required keys, in output order.
    pub fn required(&self) -> Vec<String> {
        vec![
            self.current_state.clone(),
            self.reference_path.clone(),
            self.control.clone(),
        ]
    }
}

// ============================================================================
// Layout Config
// ============================================================================

/// Shape of a single state vector and its reference path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Scalars per state (position, velocity, orientation, ...).
    pub state_dim: usize,
    /// Leading state scalars that are positions.
    pub position_dims: usize,
    /// Points on the reference path: horizon + 1.
    pub reference_steps: usize,
    /// Storage convention of `reference_path_flat`.
    pub flatten_order: FlattenOrder,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            state_dim: 12,
            position_dims: 3,
            reference_steps: 41,
            flatten_order: FlattenOrder::ChannelMajor,
        }
    }
}

// ============================================================================
// Input / Scaler Config
// ============================================================================

/// `build-input` sources and destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Dataset the sample is taken from.
    pub dataset: PathBuf,
    /// Row written to the feature file.
    pub sample_index: usize,
    /// Feature file path.
    pub output: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("data/test_data.npz"),
            sample_index: 0,
            output: PathBuf::from("input.txt"),
        }
    }
}

/// Persisted normalizers and the exported parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Fitted input normalizer.
    pub scaler_x: PathBuf,
    /// Fitted output normalizer.
    pub scaler_y: PathBuf,
    /// Exported `x_mean`/`x_std`/`y_mean`/`y_std` file.
    pub output: PathBuf,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            scaler_x: PathBuf::from("scaler_X.json"),
            scaler_y: PathBuf::from("scaler_y.json"),
            output: PathBuf::from("scalers.json"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").expect("empty TOML should parse");
        assert_eq!(config.layout.state_dim, 12);
        assert_eq!(config.layout.position_dims, 3);
        assert_eq!(config.layout.reference_steps, 41);
        assert_eq!(config.dataset.session_prefix, "data_ins_");
        assert_eq!(config.dataset.session_suffix, format!(".{NPZ_EXTENSION}"));
        assert_eq!(config.merged_path(), PathBuf::from("data/merged_rows.npz"));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let toml_str = r#"
[dataset]
data_dir = "/srv/runs"
parallel_reads = true

[dataset.keys]
current_state = "x_current"
reference_path = "x_ref"
control = "u_opt"

[layout]
flatten_order = "time_major"
"#;
        let config = PipelineConfig::from_toml_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.dataset.data_dir, PathBuf::from("/srv/runs"));
        assert!(config.dataset.parallel_reads);
        assert_eq!(config.dataset.session_suffix, ".npz");
        assert_eq!(config.dataset.keys.required(), vec!["x_current", "x_ref", "u_opt"]);
        assert_eq!(config.layout.flatten_order, FlattenOrder::TimeMajor);
        assert_eq!(config.layout.reference_steps, 41);
    }

    #[test]
    fn test_rejects_position_wider_than_state() {
        let mut config = PipelineConfig::default();
        config.layout.position_dims = 12;
        config.layout.reference_steps = 0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 2, "errors: {errors:?}");
                assert!(errors[0].contains("position_dims"));
                assert!(errors[1].contains("reference_steps"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let mut config = PipelineConfig::default();
        config.dataset.keys.control = config.dataset.keys.current_state.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PipelineConfig::default();
        let toml_str = config.to_toml().expect("serialization should work");
        let roundtripped: PipelineConfig =
            toml::from_str(&toml_str).expect("deserialization should work");
        assert_eq!(roundtripped.layout.state_dim, config.layout.state_dim);
        assert_eq!(roundtripped.scalers.output, config.scalers.output);
        assert_eq!(roundtripped.dataset.merged_file, config.dataset.merged_file);
    }

    #[test]
    fn test_load_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[layout\nstate_dim = ").expect("write");
        match PipelineConfig::load_from_file(&path) {
            Err(ConfigError::Parse(p, _)) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_trajectory_layout_from_config() {
        let config = PipelineConfig::default();
        let layout = config.trajectory_layout();
        assert_eq!(layout.feature_width(), 9 + 12 * 41);
    }
}
