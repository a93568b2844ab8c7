//! Stand-ins for the external toolchain, used by unit and integration tests.
//!
//! [`FakeToolchain`] records every invocation and produces the files the real
//! tools would, so the sequencer can be driven end to end in a temp dir.

use crate::config::ToolsConfig;
use crate::error::ToolError;
use crate::fits::{BLOCK_LEN, CARD_LEN};
use crate::tools::{ToolInvocation, ToolRunner};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Write a header-only FITS file with the given `(keyword, value)` cards.
pub fn write_uvf_header(path: &Path, cards: &[(&str, &str)]) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(BLOCK_LEN);
    for (keyword, value) in cards {
        out.extend_from_slice(format!("{:<8}= {:>20}", keyword, value).as_bytes());
        out.resize(out.len().div_ceil(CARD_LEN) * CARD_LEN, b' ');
    }
    out.extend_from_slice(format!("{:<80}", "END").as_bytes());
    out.resize(out.len().div_ceil(BLOCK_LEN) * BLOCK_LEN, b' ');
    std::fs::write(path, out)
}

/// Records invocations and creates the artifacts each tool would produce.
#[derive(Debug)]
pub struct FakeToolchain {
    tools: ToolsConfig,
    calls: RefCell<Vec<ToolInvocation>>,
    /// Program that exits non-zero instead of producing output
    pub fail_program: Option<String>,
}

impl FakeToolchain {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            tools: tools.clone(),
            calls: RefCell::new(Vec::new()),
            fail_program: None,
        }
    }

    pub fn failing(tools: &ToolsConfig, program: &str) -> Self {
        Self {
            fail_program: Some(program.to_string()),
            ..Self::new(tools)
        }
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn cwd(invocation: &ToolInvocation) -> PathBuf {
        invocation.current_dir.clone().unwrap_or_default()
    }

    /// CASA: create whatever `outputvis=` or `fitsfile=` names, plus a log
    fn casa(invocation: &ToolInvocation) -> std::io::Result<()> {
        let script = invocation.args.last().map(String::as_str).unwrap_or("");
        for line in script.lines() {
            if let Some(rest) = line
                .strip_prefix("outputvis='")
                .or_else(|| line.strip_prefix("fitsfile='"))
            {
                let target = rest.trim_end_matches([',', ')']).trim_end_matches('\'');
                if target.ends_with(".ms") {
                    std::fs::create_dir_all(target)?;
                } else {
                    std::fs::write(target, b"SIMPLE")?;
                }
            }
        }
        std::fs::write(
            Self::cwd(invocation).join("casa-20261018-120000.log"),
            b"casa log",
        )
    }

    /// var_vis: `<stem>.uvf` with a velocity reference in its header
    fn variance(invocation: &ToolInvocation) -> std::io::Result<()> {
        let stem = invocation.args.last().map(String::as_str).unwrap_or("");
        write_uvf_header(
            Path::new(&format!("{stem}.uvf")),
            &[
                ("SIMPLE", "T"),
                ("CRVAL4", "3.5450547790E+11"),
                ("CRPIX4", "26.0"),
            ],
        )
    }

    /// fits op=uvin: the `out=` dataset relative to the working directory
    fn fits(invocation: &ToolInvocation) -> std::io::Result<()> {
        if let Some(out) = invocation.args.iter().find_map(|a| a.strip_prefix("out=")) {
            std::fs::create_dir_all(Self::cwd(invocation).join(out))?;
        }
        Ok(())
    }

    /// Imager: `<stem>.cm` plus beam, clean and map by-products
    fn imager(invocation: &ToolInvocation) -> std::io::Result<()> {
        let stem = invocation
            .args
            .iter()
            .rev()
            .nth(1)
            .map(String::as_str)
            .unwrap_or("");
        for ext in ["cm", "bm", "cl", "mp"] {
            std::fs::create_dir_all(format!("{stem}.{ext}"))?;
        }
        Ok(())
    }
}

impl ToolRunner for FakeToolchain {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError> {
        self.calls.borrow_mut().push(invocation.clone());

        let program = invocation.program.as_str();
        if self.fail_program.as_deref() == Some(program) {
            return Err(ToolError::NonZeroExit {
                program: program.to_string(),
                code: 1,
                stderr: "simulated failure".to_string(),
            });
        }

        let produced = if program == self.tools.casa {
            Self::casa(invocation)
        } else if program == self.tools.variance.program {
            Self::variance(invocation)
        } else if program == self.tools.fits {
            Self::fits(invocation)
        } else if program == self.tools.imager.program {
            Self::imager(invocation)
        } else {
            Ok(())
        };

        produced.map_err(|source| ToolError::SpawnFailed {
            program: program.to_string(),
            source,
        })
    }
}
