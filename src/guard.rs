//! Skip-if-present wrapper around pipeline steps.
//!
//! A step is considered done when its output artifact is present. Presence is
//! answered by an [`ArtifactOracle`] that always asks the filesystem; there is
//! no separate state store, so resuming after a failure is just a rerun.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Answers "does this output already exist".
pub trait ArtifactOracle {
    fn is_present(&self, artifact: &Path) -> bool;

    /// Called after a guarded action returned successfully.
    fn mark_complete(&self, _artifact: &Path) -> Result<()> {
        Ok(())
    }
}

/// Presence is plain existence of the artifact (file or directory).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceOracle;

impl ArtifactOracle for ExistenceOracle {
    fn is_present(&self, artifact: &Path) -> bool {
        artifact.exists()
    }
}

/// Presence requires a `<artifact>.done` marker written after the producing
/// step succeeded, so a truncated output left by a crashed tool is redone.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerOracle;

impl MarkerOracle {
    pub fn marker_path(artifact: &Path) -> PathBuf {
        let mut name = artifact.as_os_str().to_os_string();
        name.push(".done");
        PathBuf::from(name)
    }
}

impl ArtifactOracle for MarkerOracle {
    fn is_present(&self, artifact: &Path) -> bool {
        artifact.exists() && Self::marker_path(artifact).exists()
    }

    fn mark_complete(&self, artifact: &Path) -> Result<()> {
        if artifact.exists() {
            std::fs::write(Self::marker_path(artifact), b"")?;
        } else {
            tracing::warn!(
                artifact = %artifact.display(),
                "Step finished without producing its artifact; not marking complete"
            );
        }
        Ok(())
    }
}

/// Which oracle a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    #[default]
    Exists,
    Marker,
}

impl PresenceMode {
    pub fn oracle(self) -> Box<dyn ArtifactOracle> {
        match self {
            PresenceMode::Exists => Box::new(ExistenceOracle),
            PresenceMode::Marker => Box::new(MarkerOracle),
        }
    }
}

/// What the guard did with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ran,
    Skipped,
}

/// Runs an action only if its expected artifact is absent.
pub struct StepGuard<'a> {
    oracle: &'a dyn ArtifactOracle,
}

impl<'a> StepGuard<'a> {
    pub fn new(oracle: &'a dyn ArtifactOracle) -> Self {
        Self { oracle }
    }

    /// Invoke `action` exactly once unless `artifact` is already present.
    ///
    /// The guard does not check that the action produced the artifact; a step
    /// that fails quietly is simply retried on the next run. Errors from the
    /// action are returned untouched.
    pub fn run_if_absent<F>(&self, artifact: &Path, action: F) -> Result<StepOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.oracle.is_present(artifact) {
            tracing::info!(artifact = %artifact.display(), "Already exists, skipping");
            return Ok(StepOutcome::Skipped);
        }

        action()?;
        self.oracle.mark_complete(artifact)?;
        Ok(StepOutcome::Ran)
    }
}
