//! Command scripts for the CASA reduction application.
//!
//! Tasks are built as typed values and only rendered to the `casa -c` script
//! text when they are handed to a [`ToolRunner`](crate::tools::ToolRunner).

use crate::locator::ChannelWindow;
use crate::tools::ToolInvocation;
use std::fmt;
use std::path::{Path, PathBuf};

/// A task parameter value, rendered as a Python literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            ParamValue::Bool(true) => f.write_str("True"),
            ParamValue::Bool(false) => f.write_str("False"),
        }
    }
}

/// One task call with ordered named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCall {
    pub task: &'static str,
    pub params: Vec<(&'static str, ParamValue)>,
}

impl TaskCall {
    fn new(task: &'static str) -> Self {
        Self {
            task,
            params: Vec::new(),
        }
    }

    fn param(mut self, name: &'static str, value: ParamValue) -> Self {
        self.params.push((name, value));
        self
    }

    fn path(self, name: &'static str, path: &Path) -> Self {
        self.param(name, ParamValue::Str(path.display().to_string()))
    }

    fn text(self, name: &'static str, value: impl Into<String>) -> Self {
        self.param(name, ParamValue::Str(value.into()))
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for TaskCall {
    /// One statement per line: `task(`, then `name=value,` lines, the last
    /// parameter closing the call.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.task)?;
        let last = self.params.len().saturating_sub(1);
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == last { ")" } else { "," };
            write!(f, "\n{}={}{}", name, value, sep)?;
        }
        if self.params.is_empty() {
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Ordered list of task calls sent to CASA in a single invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CasaScript {
    calls: Vec<TaskCall>,
}

impl CasaScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, call: TaskCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn calls(&self) -> &[TaskCall] {
        &self.calls
    }

    /// Script text passed to `casa -c`
    pub fn render(&self) -> String {
        self.calls
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Blocking invocation of `program -c <script>` in `workdir`.
    pub fn invocation(&self, program: &str, workdir: &Path) -> ToolInvocation {
        ToolInvocation::new(program)
            .arg("-c")
            .arg(self.render())
            .current_dir(workdir)
    }
}

/// `cvel`: regrid the contsub'd measurement set onto a rest-frequency frame.
#[derive(Debug, Clone)]
pub struct Cvel {
    pub vis: PathBuf,
    pub outputvis: PathBuf,
    pub field: String,
    pub restfreq_ghz: f64,
    pub outframe: String,
}

impl From<Cvel> for TaskCall {
    fn from(c: Cvel) -> Self {
        TaskCall::new("cvel")
            .path("vis", &c.vis)
            .path("outputvis", &c.outputvis)
            .text("field", c.field)
            .text("restfreq", format!("{}GHz", c.restfreq_ghz))
            .text("outframe", c.outframe)
    }
}

/// `split`: extract a channel window, optionally dropping short baselines.
#[derive(Debug, Clone)]
pub struct Split {
    pub vis: PathBuf,
    pub outputvis: PathBuf,
    pub window: ChannelWindow,
    /// Minimum baseline in kilo-wavelengths
    pub min_baseline_klambda: Option<String>,
    pub datacolumn: String,
    pub keepflags: bool,
}

impl From<Split> for TaskCall {
    fn from(s: Split) -> Self {
        let mut call = TaskCall::new("split")
            .path("vis", &s.vis)
            .path("outputvis", &s.outputvis)
            .text("spw", s.window.spw_selection());
        if let Some(cutoff) = s.min_baseline_klambda {
            call = call.text("uvrange", format!(">{}klambda", cutoff));
        }
        call.text("datacolumn", s.datacolumn)
            .param("keepflags", ParamValue::Bool(s.keepflags))
    }
}

/// `exportuvfits`: write the extracted data as UVFITS.
#[derive(Debug, Clone)]
pub struct ExportUvfits {
    pub vis: PathBuf,
    pub fitsfile: PathBuf,
}

impl From<ExportUvfits> for TaskCall {
    fn from(e: ExportUvfits) -> Self {
        TaskCall::new("exportuvfits")
            .path("vis", &e.vis)
            .path("fitsfile", &e.fitsfile)
    }
}
