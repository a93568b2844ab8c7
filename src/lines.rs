//! Molecular line catalog.
//!
//! Each line carries the physical constants the locator and the extraction
//! step need. The values live in [`crate::config::AppConfig`] so they can be
//! overridden per observation; [`default_catalog`] holds the shipped defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Known molecular lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralLine {
    /// HCN J=4-3
    Hcn,
    /// HCO+ J=4-3
    Hco,
    /// CS J=7-6
    Cs,
    /// CO J=3-2
    Co,
}

impl SpectralLine {
    pub const ALL: [SpectralLine; 4] = [
        SpectralLine::Hcn,
        SpectralLine::Hco,
        SpectralLine::Cs,
        SpectralLine::Co,
    ];

    /// Lower-case identifier used in file names and raw data paths
    pub fn as_str(&self) -> &'static str {
        match self {
            SpectralLine::Hcn => "hcn",
            SpectralLine::Hco => "hco",
            SpectralLine::Cs => "cs",
            SpectralLine::Co => "co",
        }
    }

    fn known_names() -> String {
        Self::ALL
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SpectralLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpectralLine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == lowered)
            .ok_or_else(|| ConfigError::UnknownLine {
                name: s.to_string(),
                known: Self::known_names(),
            })
    }
}

/// Physical constants for one line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineParams {
    /// Rest frequency in GHz
    pub restfreq: f64,

    /// +1 if frequency rises with channel index, -1 if it falls
    pub chan_dir: i8,

    /// Frequency of channel 0 in GHz
    pub chan0: f64,

    /// Minimum baseline kept when cutting, in kilo-wavelengths
    pub baseline_cutoff: f64,
}

impl LineParams {
    /// Baseline cutoff formatted the way it appears in file names and
    /// `uvrange` selections (`30` rather than `30.0`)
    pub fn baseline_cutoff_label(&self) -> String {
        format!("{}", self.baseline_cutoff)
    }
}

/// Line identifier to constants.
pub type LineCatalog = BTreeMap<SpectralLine, LineParams>;

/// Shipped defaults; override per line in the `[lines]` config section
pub fn default_catalog() -> LineCatalog {
    BTreeMap::from([
        (
            SpectralLine::Hcn,
            LineParams {
                restfreq: 354.505_477_9,
                chan_dir: -1,
                chan0: 355.437_9,
                baseline_cutoff: 30.0,
            },
        ),
        (
            SpectralLine::Hco,
            LineParams {
                restfreq: 356.734_223,
                chan_dir: -1,
                chan0: 357.665_2,
                baseline_cutoff: 30.0,
            },
        ),
        (
            SpectralLine::Cs,
            LineParams {
                restfreq: 342.882_850_3,
                chan_dir: 1,
                chan0: 341.950_3,
                baseline_cutoff: 42.0,
            },
        ),
        (
            SpectralLine::Co,
            LineParams {
                restfreq: 345.795_989_9,
                chan_dir: 1,
                chan0: 344.862_8,
                baseline_cutoff: 24.0,
            },
        ),
    ])
}

/// Look up a line, failing with a configuration error if it is absent.
pub fn lookup(catalog: &LineCatalog, line: SpectralLine) -> Result<&LineParams, ConfigError> {
    catalog.get(&line).ok_or_else(|| ConfigError::UnknownLine {
        name: line.to_string(),
        known: catalog
            .keys()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })
}
