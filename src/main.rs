use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use line_pipeline::pipeline::{PipelineSequencer, RunOptions};
use line_pipeline::tools::{DryRunner, ProcessRunner, ToolRunner};
use line_pipeline::utils::format_duration;
use line_pipeline::{AppConfig, PipelineError, SpectralLine};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "line-pipeline", version, about = "Spectral line reduction pipeline")]
struct Cli {
    /// Config file (TOML); defaults are used for anything it leaves out
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full reduction for one line
    Run {
        /// Line to process (hcn, hco, cs, co)
        #[arg(short, long)]
        line: SpectralLine,

        /// Drop baselines shorter than the line's cutoff
        #[arg(long)]
        cut_baselines: bool,

        /// Delete this line's previous products before running
        #[arg(long)]
        remake: bool,

        /// Centre the window on this rest frequency (GHz)
        #[arg(long)]
        restfreq: Option<f64>,

        /// Log the external calls instead of running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the channel window for a line
    Window {
        #[arg(short, long)]
        line: SpectralLine,

        #[arg(long)]
        restfreq: Option<f64>,
    },
    /// Write the default configuration to a file
    InitConfig { path: Option<PathBuf> },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(pe) => {
                    eprintln!("error: {}", pe.user_message());
                    eprintln!("  caused by: {:#}", e);
                    if let Some(hint) = pe.recovery_hint() {
                        eprintln!("  hint: {}", hint);
                    }
                }
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let default = AppConfig::default_path();
            AppConfig::load_if_present(&default)
                .with_context(|| format!("loading {}", default.display()))?
        }
    };
    config.validate()?;
    Ok(config)
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            line,
            cut_baselines,
            remake,
            restfreq,
            dry_run,
        } => {
            let config = load_config(cli.config)?;
            let options = RunOptions {
                cut_baselines,
                remake_all: remake,
                restfreq_override: restfreq,
            };
            if dry_run {
                run(PipelineSequencer::new(config, DryRunner), line, options)
            } else {
                run(PipelineSequencer::new(config, ProcessRunner), line, options)
            }
        }
        Command::Window { line, restfreq } => {
            let config = load_config(cli.config)?;
            let window = PipelineSequencer::new(config, DryRunner).window(line, restfreq)?;
            println!("{} {}", window.start, window.end);
            Ok(())
        }
        Command::InitConfig { path } => {
            let path = path.unwrap_or_else(AppConfig::default_path);
            AppConfig::default().save_to_file(&path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            Ok(())
        }
    }
}

fn run<R: ToolRunner>(
    sequencer: PipelineSequencer<R>,
    line: SpectralLine,
    options: RunOptions,
) -> Result<()> {
    let report = sequencer.run(line, options)?;
    tracing::info!(
        stem = %report.stem,
        window = %report.window,
        ran = report.ran(),
        skipped = report.steps.len() - report.ran(),
        log = %report.log_path.display(),
        "All done in {}",
        format_duration(report.elapsed.as_secs_f64())
    );
    Ok(())
}
