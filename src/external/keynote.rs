// osascript 経由でプレゼンテーションエディタに PDF を書き出させる

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::Exporter;
use super::process::{RunError, describe_status, run_with_timeout};
use crate::error::ExportFailure;

/// The marker the export script prints when the editor finished.
const SUCCESS_MARKER: &str = "success";

/// Exports presentation decks by scripting the editor with `osascript`.
#[derive(Debug, Clone)]
pub struct KeynoteExporter {
    program: PathBuf,
    timeout: Duration,
}

impl KeynoteExporter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("osascript"),
            timeout,
        }
    }

    /// Use a different script runner (mainly for tests).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Exporter for KeynoteExporter {
    fn export(&self, source: &Path, dest: &Path) -> Result<(), ExportFailure> {
        let source = absolute(source);
        let dest = absolute(dest);
        info!(source = %source.display(), dest = %dest.display(), "exporting deck");

        let mut command = Command::new(&self.program);
        command.arg("-e").arg(export_script(&source, &dest));

        let output = match run_with_timeout(command, self.timeout) {
            Ok(output) => output,
            Err(RunError::Spawn(e)) => {
                return Err(ExportFailure::Unavailable(format!(
                    "{}: {e}",
                    self.program.display()
                )));
            }
            Err(RunError::TimedOut) => {
                warn!(source = %source.display(), "export timed out");
                return Err(ExportFailure::TimedOut(self.timeout.as_secs()));
            }
            Err(RunError::Wait(e)) => return Err(ExportFailure::ToolFailed(e.to_string())),
        };
        debug!(stdout = %output.stdout.trim(), stderr = %output.stderr.trim(), "osascript finished");

        if output.status.success() && reports_success(&output.stdout) {
            return Ok(());
        }

        let message = [output.stderr.trim(), output.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("osascript exited with {}", describe_status(&output.status)));
        Err(ExportFailure::ToolFailed(message))
    }
}

fn reports_success(stdout: &str) -> bool {
    stdout.trim().to_lowercase().contains(SUCCESS_MARKER)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// AppleScript 文字列リテラル用のエスケープ。
fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the script that opens `source`, exports it to `dest` and closes it.
pub fn export_script(source: &Path, dest: &Path) -> String {
    let source = escape_applescript(&source.to_string_lossy());
    let dest = escape_applescript(&dest.to_string_lossy());
    format!(
        r#"tell application "Keynote"
    set keyFile to (POSIX file "{source}") as alias
    set pdfFile to "{dest}"
    try
        open keyFile
        delay 1
        tell front document
            export to (POSIX file pdfFile) as PDF
            close saving no
        end tell
        return "{SUCCESS_MARKER}"
    on error errMsg number errNum
        try
            if front document exists then
                close front document saving no
            end if
        end try
        error "Error: " & errMsg number errNum
    end try
end tell"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_escapes_quotes() {
        let script = export_script(Path::new("/tmp/a \"b\".key"), Path::new("/tmp/out.pdf"));
        assert!(script.contains(r#"POSIX file "/tmp/a \"b\".key""#));
        assert!(script.contains(r#"set pdfFile to "/tmp/out.pdf""#));
    }

    #[test]
    fn test_success_marker_is_case_insensitive() {
        assert!(reports_success("Success\n"));
        assert!(!reports_success(""));
    }

    #[test]
    fn test_missing_runner_is_unavailable() {
        let exporter = KeynoteExporter::new(Duration::from_secs(1))
            .with_program("definitely-not-a-real-program-xyz");
        let err = exporter
            .export(Path::new("/tmp/in.key"), Path::new("/tmp/out.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExportFailure::Unavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_runner_without_marker_is_tool_failure() {
        // `false` accepts any arguments and exits 1 without output
        let exporter = KeynoteExporter::new(Duration::from_secs(5)).with_program("false");
        let err = exporter
            .export(Path::new("/tmp/in.key"), Path::new("/tmp/out.pdf"))
            .unwrap_err();
        assert_eq!(
            err,
            ExportFailure::ToolFailed("osascript exited with exit code 1".to_string())
        );
    }
}
