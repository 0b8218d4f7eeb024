// Ghostscript による PDF/A-2 変換

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::info;

use super::Conformer;
use super::process::{RunError, describe_status, run_with_timeout};
use crate::error::PdfShrinkError;

/// Converts documents to PDF/A-2b with Ghostscript's `pdfwrite` device.
#[derive(Debug, Clone)]
pub struct GhostscriptConformer {
    program: PathBuf,
    timeout: Duration,
}

impl GhostscriptConformer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("gs"),
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-dPDFA=2")
            .arg("-dBATCH")
            .arg("-dNOPAUSE")
            .arg("-dQUIET")
            .arg("-sDEVICE=pdfwrite")
            .arg("-sColorConversionStrategy=RGB")
            .arg("-dPDFACompatibilityPolicy=1")
            .arg(format!("-sOutputFile={}", output.display()))
            .arg(input);
        command
    }
}

impl Conformer for GhostscriptConformer {
    fn to_conformant(&self, input: &Path, output: &Path) -> crate::error::Result<()> {
        info!(input = %input.display(), "converting to PDF/A");
        let result = run_with_timeout(self.command(input, output), self.timeout);
        match result {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                let detail = match out.stderr.trim() {
                    "" => describe_status(&out.status),
                    s => s.to_string(),
                };
                return Err(PdfShrinkError::conformance(format!("gs failed: {detail}")));
            }
            Err(RunError::TimedOut) => {
                return Err(PdfShrinkError::conformance(format!(
                    "gs timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
            Err(e) => return Err(PdfShrinkError::conformance(format!("gs {e}"))),
        }

        if !output.exists() {
            return Err(PdfShrinkError::conformance("gs produced no output"));
        }
        Ok(())
    }
}
