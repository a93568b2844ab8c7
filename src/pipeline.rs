//! Reduction sequencer for one spectral line.
//!
//! Computes the channel window once, then drives the fixed chain
//! cvel -> split -> exportuvfits -> var_vis -> uvin -> image, each step gated
//! on the presence of its output, and finishes with an unconditional cleanup
//! of intermediates.

use crate::casa::{CasaScript, Cvel, ExportUvfits, Split};
use crate::config::AppConfig;
use crate::error::{ConfigError, PipelineError, Result};
use crate::fits::read_velocity_reference;
use crate::guard::{ArtifactOracle, StepGuard, StepOutcome};
use crate::lines::{lookup, LineParams, SpectralLine};
use crate::locator::{locate_for_line, ChannelWindow};
use crate::run_log::RunLog;
use crate::tools::{ToolInvocation, ToolRunner};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    /// Re-reference the raw measurement set to the line's rest frequency
    Cvel,
    /// Extract the channel window, optionally above a baseline cutoff
    Split,
    /// Export to UVFITS
    ExportUvfits,
    /// Add per-visibility variances
    VarVis,
    /// Convert UVFITS to a MIRIAD visibility set
    UvIn,
    /// Reconstruct the image cube
    Image,
}

impl PipelineStep {
    pub const ORDER: [PipelineStep; 6] = [
        PipelineStep::Cvel,
        PipelineStep::Split,
        PipelineStep::ExportUvfits,
        PipelineStep::VarVis,
        PipelineStep::UvIn,
        PipelineStep::Image,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::Cvel => "cvel",
            PipelineStep::Split => "split",
            PipelineStep::ExportUvfits => "exportuvfits",
            PipelineStep::VarVis => "var_vis",
            PipelineStep::UvIn => "uvin",
            PipelineStep::Image => "image",
        }
    }

    /// Appended to the artifact stem to name this step's output
    pub fn artifact_suffix(&self) -> &'static str {
        match self {
            PipelineStep::Cvel => "_cvel.ms",
            PipelineStep::Split => "_split.ms",
            PipelineStep::ExportUvfits => "_exportuvfits.uvf",
            PipelineStep::VarVis => ".uvf",
            PipelineStep::UvIn => ".vis",
            PipelineStep::Image => ".cm",
        }
    }

    /// Outputs removed by cleanup; only consumed by the following step
    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            PipelineStep::Cvel | PipelineStep::Split | PipelineStep::ExportUvfits
        )
    }

    pub fn next(&self) -> Option<PipelineStep> {
        let i = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(i + 1).copied()
    }
}

/// Per-run paths and names. The stem is fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub workdir: PathBuf,
    pub line: SpectralLine,
    pub params: LineParams,
    pub cut_baselines: bool,
    stem: String,
}

impl PipelineContext {
    pub fn new(
        config: &AppConfig,
        line: SpectralLine,
        cut_baselines: bool,
    ) -> Result<Self, ConfigError> {
        let params = *lookup(&config.lines, line)?;
        let mut stem = line.to_string();
        if cut_baselines {
            stem.push_str("-short");
            stem.push_str(&params.baseline_cutoff_label());
        }

        Ok(Self {
            workdir: config.paths.output_root.join(line.as_str()),
            line,
            params,
            cut_baselines,
            stem,
        })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// `<workdir>/<stem>`, the prefix handed to var_vis and the imager
    pub fn stem_path(&self) -> PathBuf {
        self.workdir.join(&self.stem)
    }

    pub fn artifact_name(&self, step: PipelineStep) -> String {
        format!("{}{}", self.stem, step.artifact_suffix())
    }

    pub fn artifact(&self, step: PipelineStep) -> PathBuf {
        self.workdir.join(self.artifact_name(step))
    }

    /// True if `name` is an output of this stem (`<stem>.x` or `<stem>_x`)
    fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.stem.as_str())
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('_'))
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Drop baselines shorter than the line's cutoff during split
    pub cut_baselines: bool,
    /// Delete every artifact of the stem before running
    pub remake_all: bool,
    /// Centre the window on this frequency (GHz) instead of the catalog one
    pub restfreq_override: Option<f64>,
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stem: String,
    pub window: ChannelWindow,
    pub steps: Vec<(PipelineStep, StepOutcome)>,
    pub removed: Vec<PathBuf>,
    pub log_path: PathBuf,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn ran(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, o)| *o == StepOutcome::Ran)
            .count()
    }
}

/// Drives the external tools for one line.
pub struct PipelineSequencer<R> {
    config: AppConfig,
    runner: R,
    oracle: Box<dyn ArtifactOracle>,
}

impl<R: ToolRunner> PipelineSequencer<R> {
    pub fn new(config: AppConfig, runner: R) -> Self {
        let oracle = config.guard.presence.oracle();
        Self {
            config,
            runner,
            oracle,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Channel window the run would extract, without touching the filesystem.
    pub fn window(
        &self,
        line: SpectralLine,
        restfreq_override: Option<f64>,
    ) -> Result<ChannelWindow> {
        let params = lookup(&self.config.lines, line)?;
        Ok(locate_for_line(
            params,
            self.config.axis.channel_count,
            self.config.axis.channel_width_ghz,
            restfreq_override,
        )?)
    }

    /// Run the full chain for `line`.
    ///
    /// Any tool failure aborts the run before cleanup; rerunning resumes at
    /// the first step whose output is missing.
    pub fn run(&self, line: SpectralLine, options: RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        self.config.validate()?;
        let ctx = PipelineContext::new(&self.config, line, options.cut_baselines)?;
        let window = self.window(line, options.restfreq_override)?;
        tracing::info!(stem = ctx.stem(), %window, "Split range computed");

        fs::create_dir_all(&ctx.workdir)?;

        if options.remake_all {
            let removed = remove_stem_artifacts(&ctx)?;
            tracing::info!(
                count = removed.len(),
                "Remaking everything; removed prior artifacts"
            );
        }

        let guard = StepGuard::new(self.oracle.as_ref());
        let mut steps = Vec::with_capacity(PipelineStep::ORDER.len());
        for step in PipelineStep::ORDER {
            let outcome = if self.superseded(&ctx, step) {
                tracing::info!(
                    step = step.name(),
                    "Output already consumed downstream, skipping"
                );
                StepOutcome::Skipped
            } else {
                guard.run_if_absent(&ctx.artifact(step), || {
                    tracing::info!(step = step.name(), "Running step");
                    self.execute(step, &ctx, window)
                })?
            };
            steps.push((step, outcome));
        }

        let removed = cleanup(&ctx)?;

        let log = RunLog {
            date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            stem: ctx.stem().to_string(),
            remade: options.remake_all,
            window,
            steps: steps.clone(),
            elapsed: started.elapsed(),
        };
        let log_path = ctx.workdir.join(&self.config.paths.run_log_name);
        log.write_to(&log_path)?;

        Ok(RunReport {
            stem: ctx.stem().to_string(),
            window,
            steps,
            removed,
            log_path,
            elapsed: started.elapsed(),
        })
    }

    /// An intermediate whose consumer is already done need not be rebuilt;
    /// cleanup deletes intermediates, so this is what makes reruns cheap.
    fn superseded(&self, ctx: &PipelineContext, step: PipelineStep) -> bool {
        if !step.is_intermediate() {
            return false;
        }
        match step.next() {
            Some(next) => {
                self.oracle.is_present(&ctx.artifact(next)) || self.superseded(ctx, next)
            }
            None => false,
        }
    }

    fn execute(
        &self,
        step: PipelineStep,
        ctx: &PipelineContext,
        window: ChannelWindow,
    ) -> Result<()> {
        let obs = &self.config.observation;
        let tools = &self.config.tools;

        let invocation = match step {
            PipelineStep::Cvel => CasaScript::new()
                .push(
                    Cvel {
                        vis: self
                            .config
                            .paths
                            .raw_data_dir
                            .join(format!("calibrated-{}.ms.contsub", ctx.line)),
                        outputvis: ctx.artifact(PipelineStep::Cvel),
                        field: obs.field.clone(),
                        restfreq_ghz: ctx.params.restfreq,
                        outframe: obs.outframe.clone(),
                    }
                    .into(),
                )
                .invocation(&tools.casa, &ctx.workdir),
            PipelineStep::Split => {
                if ctx.cut_baselines {
                    tracing::info!(
                        cutoff_klambda = ctx.params.baseline_cutoff,
                        "Cutting baselines during split"
                    );
                }
                CasaScript::new()
                    .push(
                        Split {
                            vis: ctx.artifact(PipelineStep::Cvel),
                            outputvis: ctx.artifact(PipelineStep::Split),
                            window,
                            min_baseline_klambda: ctx
                                .cut_baselines
                                .then(|| ctx.params.baseline_cutoff_label()),
                            datacolumn: obs.datacolumn.clone(),
                            keepflags: obs.keepflags,
                        }
                        .into(),
                    )
                    .invocation(&tools.casa, &ctx.workdir)
            }
            PipelineStep::ExportUvfits => CasaScript::new()
                .push(
                    ExportUvfits {
                        vis: ctx.artifact(PipelineStep::Split),
                        fitsfile: ctx.artifact(PipelineStep::ExportUvfits),
                    }
                    .into(),
                )
                .invocation(&tools.casa, &ctx.workdir),
            PipelineStep::VarVis => tools
                .variance
                .invocation()
                .arg(ctx.stem_path().display().to_string())
                .current_dir(&ctx.workdir),
            PipelineStep::UvIn => self.uvin_invocation(ctx)?,
            PipelineStep::Image => tools
                .imager
                .invocation()
                .arg(ctx.stem_path().display().to_string())
                .arg(ctx.line.as_str())
                .current_dir(&ctx.workdir),
        };

        tracing::debug!(step = step.name(), args = ?invocation.args, "Invoking");
        self.runner.run(&invocation)?;
        Ok(())
    }

    /// `fits op=uvin`, carrying the velocity reference from the uvf header.
    /// Names are relative to the working directory since MIRIAD truncates
    /// long path arguments.
    fn uvin_invocation(&self, ctx: &PipelineContext) -> Result<ToolInvocation> {
        let reference = read_velocity_reference(&ctx.artifact(PipelineStep::VarVis))?;
        Ok(ToolInvocation::new(&self.config.tools.fits)
            .arg("op=uvin")
            .arg(format!("in={}", ctx.artifact_name(PipelineStep::VarVis)))
            .arg(format!(
                "velocity={},{},{}",
                self.config.observation.velocity_frame, reference.crval4, reference.crpix4
            ))
            .arg(format!("out={}", ctx.artifact_name(PipelineStep::UvIn)))
            .current_dir(&ctx.workdir))
    }
}

/// Glob patterns, relative to the working directory, removed after every run
fn cleanup_patterns(stem: &str) -> Vec<String> {
    let stem = glob::Pattern::escape(stem);
    vec![
        format!("{stem}_cvel.*"),
        format!("{stem}_split.*"),
        format!("{stem}_exportuvfits.*"),
        format!("{stem}.bm"),
        format!("{stem}.cl"),
        format!("{stem}.mp"),
        "casa*.log".to_string(),
    ]
}

/// Remove intermediates and transient logs. Runs whether or not any step ran.
pub fn cleanup(ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
    let dir = glob::Pattern::escape(&ctx.workdir.display().to_string());
    let mut removed = Vec::new();

    for pattern in cleanup_patterns(ctx.stem()) {
        let full = format!("{}/{}", dir, pattern);
        let paths = glob::glob(&full)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        for entry in paths {
            match entry {
                Ok(path) => {
                    remove_path(&path)?;
                    removed.push(path);
                }
                Err(e) => tracing::warn!(
                    path = %e.path().display(),
                    error = %e.error(),
                    "Could not inspect entry during cleanup, leaving it"
                ),
            }
        }
    }

    tracing::info!(count = removed.len(), "Deleted intermediate process files");
    Ok(removed)
}

/// Remove every `<stem>.*` / `<stem>_*` entry in the working directory.
/// Other stems sharing a prefix (`hcn` vs `hcn-short30`) are left alone.
pub fn remove_stem_artifacts(ctx: &PipelineContext) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let entries = match fs::read_dir(&ctx.workdir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| ctx.owns(n)) {
            let path = entry.path();
            remove_path(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Measurement sets and MIRIAD datasets are directories
fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|source| PipelineError::Cleanup {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &Path, cut: bool) -> PipelineContext {
        let mut config = AppConfig::default();
        config.paths.output_root = dir.to_path_buf();
        PipelineContext::new(&config, SpectralLine::Hcn, cut).unwrap()
    }

    #[test]
    fn test_stem_without_cut() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), false);
        assert_eq!(ctx.stem(), "hcn");
        assert_eq!(ctx.workdir, dir.path().join("hcn"));
        assert_eq!(
            ctx.artifact(PipelineStep::ExportUvfits),
            dir.path().join("hcn").join("hcn_exportuvfits.uvf")
        );
    }

    #[test]
    fn test_stem_with_cut() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), true);
        assert_eq!(ctx.stem(), "hcn-short30");
        assert_eq!(ctx.artifact_name(PipelineStep::Image), "hcn-short30.cm");
    }

    #[test]
    fn test_unknown_line_fails_before_anything() {
        let mut config = AppConfig::default();
        config.lines.remove(&SpectralLine::Co);
        assert!(matches!(
            PipelineContext::new(&config, SpectralLine::Co, false),
            Err(ConfigError::UnknownLine { .. })
        ));
    }

    #[test]
    fn test_step_order_and_next() {
        assert_eq!(PipelineStep::Cvel.next(), Some(PipelineStep::Split));
        assert_eq!(PipelineStep::Image.next(), None);
        let intermediates: Vec<_> = PipelineStep::ORDER
            .iter()
            .filter(|s| s.is_intermediate())
            .collect();
        assert_eq!(intermediates.len(), 3);
    }

    #[test]
    fn test_owns() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), false);
        assert!(ctx.owns("hcn.uvf"));
        assert!(ctx.owns("hcn_cvel.ms"));
        assert!(!ctx.owns("hcn-short30.uvf"));
        assert!(!ctx.owns("hcnx.uvf"));
        assert!(!ctx.owns("hcn"));
    }

    #[test]
    fn test_cleanup_removes_intermediates_only() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), false);
        fs::create_dir_all(ctx.workdir.join("hcn_cvel.ms")).unwrap();
        fs::create_dir_all(ctx.workdir.join("hcn_split.ms")).unwrap();
        for name in [
            "hcn_exportuvfits.uvf",
            "hcn.bm",
            "hcn.uvf",
            "casa-20261018-101010.log",
            "file_log.txt",
        ] {
            fs::write(ctx.workdir.join(name), b"x").unwrap();
        }

        let removed = cleanup(&ctx).unwrap();
        assert_eq!(removed.len(), 5);
        assert!(ctx.workdir.join("hcn.uvf").exists());
        assert!(ctx.workdir.join("file_log.txt").exists());
        assert!(!ctx.workdir.join("hcn_cvel.ms").exists());
    }

    #[test]
    fn test_cleanup_on_missing_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), false);
        assert!(cleanup(&ctx).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_skips_unreadable_entries() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), false);
        fs::create_dir_all(ctx.workdir.join("hcn_cvel.ms")).unwrap();
        fs::set_permissions(&ctx.workdir, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind a privileged user
        let readable = fs::read_dir(&ctx.workdir).is_ok();
        let result = if readable { None } else { Some(cleanup(&ctx)) };
        fs::set_permissions(&ctx.workdir, fs::Permissions::from_mode(0o755)).unwrap();

        if let Some(result) = result {
            assert!(result.unwrap().is_empty());
            assert!(ctx.workdir.join("hcn_cvel.ms").exists());
        }
    }

    #[test]
    fn test_remake_leaves_other_stems() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), false);
        fs::create_dir_all(&ctx.workdir).unwrap();
        for name in ["hcn.uvf", "hcn.cm", "hcn-short30.uvf", "notes.txt"] {
            fs::write(ctx.workdir.join(name), b"x").unwrap();
        }
        fs::create_dir(ctx.workdir.join("hcn.vis")).unwrap();

        let removed = remove_stem_artifacts(&ctx).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(ctx.workdir.join("hcn-short30.uvf").exists());
        assert!(ctx.workdir.join("notes.txt").exists());
        assert!(ctx.workdir.exists());
    }
}
