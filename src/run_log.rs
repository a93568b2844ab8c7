//! Free-text run log left next to the products of a successful run.

use crate::guard::StepOutcome;
use crate::locator::ChannelWindow;
use crate::pipeline::PipelineStep;
use crate::utils::format_minutes;
use std::path::Path;
use std::time::Duration;

/// Everything the run log reports.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub date: String,
    pub stem: String,
    pub remade: bool,
    pub window: ChannelWindow,
    pub steps: Vec<(PipelineStep, StepOutcome)>,
    pub elapsed: Duration,
}

impl RunLog {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Files created on {}", self.date),
            String::new(),
            format!("Artifact stem: {}", self.stem),
        ];

        if self.remade {
            lines.push("Full remake occurred; all files are fresh.".to_string());
        } else {
            lines.push("Some files already existed and so were not remade.".to_string());
            lines.push("Careful for inconsistencies.".to_string());
        }
        lines.push(String::new());

        lines.push(format!("Split range used: {}", self.window));
        for (step, outcome) in &self.steps {
            let status = match outcome {
                StepOutcome::Ran => "ran",
                StepOutcome::Skipped => "skipped",
            };
            lines.push(format!("  {:<12} {}", step.name(), status));
        }

        lines.push(String::new());
        lines.push(format!(
            "This processing took {}.",
            format_minutes(self.elapsed)
        ));
        lines.join("\n") + "\n"
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())?;
        tracing::info!(path = %path.display(), "Run log written");
        Ok(())
    }
}
