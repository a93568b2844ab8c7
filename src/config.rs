//! Pipeline configuration with TOML persistence.
//!
//! Holds the line catalog, the frequency axis of the full cube, observation
//! settings and the external programs to call. Loaded once and handed to the
//! sequencer; nothing reads configuration from global state.

use crate::error::ConfigError;
use crate::guard::PresenceMode;
use crate::lines::{default_catalog, LineCatalog};
use crate::tools::ToolCommand;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Input and output locations
    pub paths: PathsConfig,

    /// Frequency axis of the full spectral cube
    pub axis: AxisConfig,

    /// Settings passed to the reduction application
    pub observation: ObservationConfig,

    /// External programs
    pub tools: ToolsConfig,

    /// How step completion is detected
    pub guard: GuardConfig,

    /// Line identifier to physical constants
    pub lines: LineCatalog,
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `calibrated-<line>.ms.contsub`
    pub raw_data_dir: PathBuf,

    /// Per-line working directories are created below this
    pub output_root: PathBuf,

    /// Name of the run log written into the working directory
    pub run_log_name: String,
}

/// Frequency axis of the full spectral cube, from `listobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Number of channels
    pub channel_count: i64,

    /// Unsigned channel width in GHz; the line's `chan_dir` supplies the sign
    pub channel_width_ghz: f64,
}

/// Settings passed through to the reduction application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    pub field: String,
    pub outframe: String,
    /// Velocity frame given to the uvf-to-vis converter
    pub velocity_frame: String,
    pub datacolumn: String,
    pub keepflags: bool,
}

/// External programs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// CASA executable, run as `casa -c <script>`
    pub casa: String,

    /// MIRIAD `fits` task
    pub fits: String,

    /// Adds per-visibility variances; called with the artifact stem path
    pub variance: ToolCommand,

    /// Image reconstruction; called with the artifact stem path and line id
    pub imager: ToolCommand,
}

/// Step completion detection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    pub presence: PresenceMode,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from("raw_data"),
            output_root: PathBuf::from("data"),
            run_log_name: "file_log.txt".to_string(),
        }
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            channel_count: 3840,
            channel_width_ghz: 0.000488281,
        }
    }
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            field: "OrionField4".to_string(),
            outframe: "LSRK".to_string(),
            velocity_frame: "lsr".to_string(),
            datacolumn: "data".to_string(),
            keepflags: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            casa: "casa".to_string(),
            fits: "fits".to_string(),
            variance: ToolCommand::new("var_vis"),
            imager: ToolCommand::new("icr"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            axis: AxisConfig::default(),
            observation: ObservationConfig::default(),
            tools: ToolsConfig::default(),
            guard: GuardConfig::default(),
            lines: default_catalog(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::LoadFailed {
            path: Box::new(path.to_path_buf()),
            source,
        })?;

        let mut config: Self =
            toml::from_str(&contents).map_err(|source| ConfigError::InvalidFormat {
                path: Box::new(path.to_path_buf()),
                source,
            })?;

        // Lines not listed in the file keep their shipped constants
        for (line, params) in default_catalog() {
            config.lines.entry(line).or_insert(params);
        }
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults. A file that exists
    /// but cannot be read or parsed is an error, never a silent fallback.
    pub fn load_if_present<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::SaveFailed {
                path: Box::new(path.to_path_buf()),
                source,
            })?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|source| ConfigError::SerializationFailed { source })?;

        std::fs::write(path, contents).map_err(|source| ConfigError::SaveFailed {
            path: Box::new(path.to_path_buf()),
            source,
        })
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("line_pipeline.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axis.channel_count <= 0 {
            return Err(ConfigError::ValidationFailed {
                reason: format!("Channel count {} must be > 0", self.axis.channel_count),
            });
        }

        if !self.axis.channel_width_ghz.is_finite() || self.axis.channel_width_ghz == 0.0 {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "Channel width {} GHz must be finite and non-zero",
                    self.axis.channel_width_ghz
                ),
            });
        }

        for (line, params) in &self.lines {
            if params.chan_dir != 1 && params.chan_dir != -1 {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("{line}: chan_dir {} must be 1 or -1", params.chan_dir),
                });
            }
            if !params.restfreq.is_finite() || !params.chan0.is_finite() {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("{line}: frequencies must be finite"),
                });
            }
            if params.baseline_cutoff.is_nan() || params.baseline_cutoff < 0.0 {
                return Err(ConfigError::ValidationFailed {
                    reason: format!(
                        "{line}: baseline cutoff {} must be >= 0",
                        params.baseline_cutoff
                    ),
                });
            }
        }

        if self.tools.casa.is_empty() || self.tools.fits.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "Tool program names must not be empty".to_string(),
            });
        }

        Ok(())
    }
}
