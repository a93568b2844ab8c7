//! External tool invocation.
//!
//! Every call blocks until the child has exited and its status is known, so a
//! later step (or cleanup) never races a still-running tool.

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines of stderr kept in a [`ToolError::NonZeroExit`] or logged on success
const STDERR_TAIL_LINES: usize = 20;

/// A program with its arguments and working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

/// A configured external command: program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Start an invocation carrying the configured leading arguments
    pub fn invocation(&self) -> ToolInvocation {
        ToolInvocation::new(&self.program).args(self.args.iter().cloned())
    }
}

/// Runs external tools. Implementations must not return before the tool exits.
pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError>;
}

/// Spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError> {
        tracing::debug!(
            program = %invocation.program,
            args = ?invocation.args,
            cwd = ?invocation.current_dir,
            "Running external tool"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|source| ToolError::SpawnFailed {
            program: invocation.program.clone(),
            source,
        })?;

        if output.status.success() {
            let tail = stderr_tail(&output.stderr);
            if !tail.is_empty() {
                tracing::debug!(
                    program = %invocation.program,
                    stderr = %tail,
                    "Tool wrote to stderr"
                );
            }
            return Ok(());
        }

        match output.status.code() {
            Some(code) => Err(ToolError::NonZeroExit {
                program: invocation.program.clone(),
                code,
                stderr: stderr_tail(&output.stderr),
            }),
            None => Err(ToolError::Terminated {
                program: invocation.program.clone(),
            }),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Logs each invocation instead of running it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunner;

impl ToolRunner for DryRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError> {
        tracing::info!(
            program = %invocation.program,
            args = ?invocation.args,
            cwd = ?invocation.current_dir,
            "Dry run, not executing"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let inv = ToolInvocation::new("fits")
            .arg("op=uvin")
            .args(["in=hcn.uvf", "out=hcn.vis"])
            .current_dir("/data/hcn");
        assert_eq!(inv.args, ["op=uvin", "in=hcn.uvf", "out=hcn.vis"]);
        assert_eq!(inv.current_dir, Some(PathBuf::from("/data/hcn")));
    }

    #[test]
    fn test_tool_command_prepends_args() {
        let cmd = ToolCommand {
            program: "python".to_string(),
            args: vec!["var_vis.py".to_string()],
        };
        let inv = cmd.invocation().arg("/data/hcn/hcn");
        assert_eq!(inv.program, "python");
        assert_eq!(inv.args, ["var_vis.py", "/data/hcn/hcn"]);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(text.as_bytes());
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line 29"));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let inv = ToolInvocation::new("definitely-not-a-real-program-4f1a");
        assert!(matches!(
            ProcessRunner.run(&inv),
            Err(ToolError::SpawnFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_reported() {
        let inv = ToolInvocation::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        match ProcessRunner.run(&inv) {
            Err(ToolError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_of_successful_tool_is_logged() {
        use std::io::Write;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let inv = ToolInvocation::new("sh").args(["-c", "echo 'WARN: 3 rows flagged' >&2"]);
        let result = tracing::subscriber::with_default(subscriber, || ProcessRunner.run(&inv));
        assert!(result.is_ok());

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("WARN: 3 rows flagged"));
    }

    #[cfg(unix)]
    #[test]
    fn test_success_blocks_until_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = ToolInvocation::new("sh")
            .args(["-c", "sleep 0.1; touch done"])
            .current_dir(dir.path());
        ProcessRunner.run(&inv).unwrap();
        assert!(dir.path().join("done").exists());
    }
}
