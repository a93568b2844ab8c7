//! End-to-end sequencer tests against a fake toolchain in a temp dir.

use line_pipeline::config::AppConfig;
use line_pipeline::error::{PipelineError, ToolError};
use line_pipeline::guard::{PresenceMode, StepOutcome};
use line_pipeline::pipeline::{PipelineContext, PipelineSequencer, PipelineStep, RunOptions};
use line_pipeline::test_fixtures::FakeToolchain;
use line_pipeline::SpectralLine;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn config_in(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.paths.raw_data_dir = dir.join("raw_data");
    config.paths.output_root = dir.join("modeling");
    config
}

fn sequencer(config: AppConfig) -> PipelineSequencer<FakeToolchain> {
    let fake = FakeToolchain::new(&config.tools);
    PipelineSequencer::new(config, fake)
}

fn outcomes(steps: &[(PipelineStep, StepOutcome)]) -> Vec<StepOutcome> {
    steps.iter().map(|(_, o)| *o).collect()
}

#[test]
fn test_first_run_executes_every_step_in_order() {
    let dir = TempDir::new().unwrap();
    let seq = sequencer(config_in(dir.path()));

    let report = seq.run(SpectralLine::Hco, RunOptions::default()).unwrap();

    assert_eq!(report.ran(), 6);
    let programs: Vec<_> = seq
        .runner()
        .calls()
        .into_iter()
        .map(|c| c.program)
        .collect();
    assert_eq!(programs, ["casa", "casa", "casa", "var_vis", "fits", "icr"]);

    let workdir = dir.path().join("modeling").join("hco");
    for kept in ["hco.uvf", "hco.vis", "hco.cm", "file_log.txt"] {
        assert!(workdir.join(kept).exists(), "{kept} should survive cleanup");
    }
    for gone in [
        "hco_cvel.ms",
        "hco_split.ms",
        "hco_exportuvfits.uvf",
        "hco.bm",
        "hco.cl",
        "hco.mp",
        "casa-20261018-120000.log",
    ] {
        assert!(!workdir.join(gone).exists(), "{gone} should be cleaned up");
    }
}

#[test]
fn test_second_run_invokes_nothing_but_still_cleans_up() {
    let dir = TempDir::new().unwrap();
    let seq = sequencer(config_in(dir.path()));

    seq.run(SpectralLine::Hcn, RunOptions::default()).unwrap();
    seq.runner().clear();

    // A stray intermediate left by something else still gets removed
    let workdir = dir.path().join("modeling").join("hcn");
    fs::write(workdir.join("casa-20261019-080000.log"), b"stale").unwrap();

    let report = seq.run(SpectralLine::Hcn, RunOptions::default()).unwrap();
    assert_eq!(seq.runner().call_count(), 0);
    assert_eq!(report.ran(), 0);
    assert_eq!(report.removed.len(), 1);
    assert!(!workdir.join("casa-20261019-080000.log").exists());
}

#[test]
fn test_preexisting_artifacts_skip_their_steps() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let ctx = PipelineContext::new(&config, SpectralLine::Cs, false).unwrap();
    fs::create_dir_all(ctx.artifact(PipelineStep::Cvel)).unwrap();
    fs::create_dir_all(ctx.artifact(PipelineStep::Split)).unwrap();

    let seq = sequencer(config);
    let report = seq.run(SpectralLine::Cs, RunOptions::default()).unwrap();

    assert_eq!(
        outcomes(&report.steps),
        [
            StepOutcome::Skipped,
            StepOutcome::Skipped,
            StepOutcome::Ran,
            StepOutcome::Ran,
            StepOutcome::Ran,
            StepOutcome::Ran,
        ]
    );
    let first = &seq.runner().calls()[0];
    assert!(first.args[1].starts_with("exportuvfits("));
}

#[test]
fn test_all_outputs_present_still_runs_cleanup() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let ctx = PipelineContext::new(&config, SpectralLine::Co, false).unwrap();
    fs::create_dir_all(&ctx.workdir).unwrap();
    for step in PipelineStep::ORDER {
        fs::create_dir_all(ctx.artifact(step)).unwrap();
    }

    let seq = sequencer(config);
    let report = seq.run(SpectralLine::Co, RunOptions::default()).unwrap();

    assert_eq!(seq.runner().call_count(), 0);
    assert_eq!(report.removed.len(), 3);
    assert!(!ctx.artifact(PipelineStep::Cvel).exists());
    assert!(ctx.artifact(PipelineStep::Image).exists());
    assert!(report.log_path.exists());
}

#[test]
fn test_tool_failure_aborts_and_rerun_resumes() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let failing = FakeToolchain::failing(&config.tools, "var_vis");
    let seq = PipelineSequencer::new(config.clone(), failing);

    let err = seq.run(SpectralLine::Hcn, RunOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Tool(ToolError::NonZeroExit { ref program, .. }) if program == "var_vis"
    ));

    let ctx = PipelineContext::new(&config, SpectralLine::Hcn, false).unwrap();
    // Aborted before cleanup and before the run log
    assert!(ctx.artifact(PipelineStep::ExportUvfits).exists());
    assert!(!ctx.workdir.join("file_log.txt").exists());

    let seq = sequencer(config);
    let report = seq.run(SpectralLine::Hcn, RunOptions::default()).unwrap();
    assert_eq!(
        outcomes(&report.steps)[..3],
        [StepOutcome::Skipped; 3]
    );
    assert_eq!(seq.runner().call_count(), 3);
    assert_eq!(seq.runner().calls()[0].program, "var_vis");
}

#[test]
fn test_cut_baselines_changes_stem_and_split() {
    let dir = TempDir::new().unwrap();
    let seq = sequencer(config_in(dir.path()));
    let options = RunOptions {
        cut_baselines: true,
        ..RunOptions::default()
    };

    let report = seq.run(SpectralLine::Hcn, options).unwrap();
    assert_eq!(report.stem, "hcn-short30");

    let split = &seq.runner().calls()[1].args[1];
    assert!(split.starts_with("split("));
    assert!(split.contains("\nuvrange='>30klambda',\n"));
    assert!(split.contains(&format!("spw='{}',", report.window.spw_selection())));

    let workdir = dir.path().join("modeling").join("hcn");
    assert!(workdir.join("hcn-short30.cm").exists());
}

#[test]
fn test_uvin_carries_velocity_reference() {
    let dir = TempDir::new().unwrap();
    let seq = sequencer(config_in(dir.path()));
    seq.run(SpectralLine::Hcn, RunOptions::default()).unwrap();

    let uvin = seq
        .runner()
        .calls()
        .into_iter()
        .find(|c| c.program == "fits")
        .unwrap();
    assert_eq!(
        uvin.args,
        [
            "op=uvin",
            "in=hcn.uvf",
            "velocity=lsr,354505477900,26",
            "out=hcn.vis",
        ]
    );
    assert_eq!(
        uvin.current_dir.as_deref(),
        Some(dir.path().join("modeling").join("hcn").as_path())
    );
}

#[test]
fn test_remake_reruns_everything_for_this_stem_only() {
    let dir = TempDir::new().unwrap();
    let seq = sequencer(config_in(dir.path()));
    let cut = RunOptions {
        cut_baselines: true,
        ..RunOptions::default()
    };
    seq.run(SpectralLine::Hcn, RunOptions::default()).unwrap();
    seq.run(SpectralLine::Hcn, cut).unwrap();
    seq.runner().clear();

    let remake = RunOptions {
        remake_all: true,
        ..RunOptions::default()
    };
    let report = seq.run(SpectralLine::Hcn, remake).unwrap();
    assert_eq!(report.ran(), 6);

    let log = fs::read_to_string(&report.log_path).unwrap();
    assert!(log.contains("Full remake occurred"));

    let workdir = dir.path().join("modeling").join("hcn");
    assert!(workdir.join("hcn-short30.cm").exists());
}

#[test]
fn test_restfreq_override_moves_window() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let step = config.axis.channel_width_ghz;
    let restfreq = config.lines[&SpectralLine::Cs].restfreq;
    let seq = sequencer(config);

    let catalog = seq.window(SpectralLine::Cs, None).unwrap();
    let shifted = seq
        .window(SpectralLine::Cs, Some(restfreq + 4.0 * step))
        .unwrap();
    assert_eq!(shifted.start - catalog.start, 4);
    assert_eq!(seq.runner().call_count(), 0);
}

#[test]
fn test_marker_mode_redoes_unmarked_output() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.guard.presence = PresenceMode::Marker;
    let ctx = PipelineContext::new(&config, SpectralLine::Hco, false).unwrap();

    // Truncated leftover from a crashed imager
    fs::create_dir_all(ctx.artifact(PipelineStep::Image)).unwrap();

    let seq = sequencer(config);
    let report = seq.run(SpectralLine::Hco, RunOptions::default()).unwrap();
    assert_eq!(report.ran(), 6);

    seq.runner().clear();
    seq.run(SpectralLine::Hco, RunOptions::default()).unwrap();
    assert_eq!(seq.runner().call_count(), 0);
}

#[test]
fn test_invalid_config_fails_before_any_call() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.axis.channel_count = 0;
    let seq = sequencer(config);

    let err = seq.run(SpectralLine::Co, RunOptions::default()).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert_eq!(seq.runner().call_count(), 0);
    assert!(!dir.path().join("modeling").exists());
}
