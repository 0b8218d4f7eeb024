//! Converted-document directory management.
//!
//! Every name that reaches the filesystem from a caller goes through
//! [`secure_filename`], so a selection can never point outside the
//! convert directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use serde::Serialize;
use tracing::info;

use crate::error::PdfShrinkError;
use crate::pipeline::artifacts::JobId;

const FALLBACK_NAME: &str = "document";

/// ファイル名をASCII英数字と `-_.` のみに制限する。
///
/// パス区切りと空白は `_` に置き換え、先頭・末尾の `.` と `_` は落とす。
/// 何も残らなければ `document` を返す。
pub fn secure_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// 拡張子が許可リストに含まれるか（大文字小文字は区別しない）。
pub fn is_allowed_source(path: &Path, allowed_extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            allowed_extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

/// Output name for a converted source: `<sanitised stem>_<job id>.pdf`.
pub fn converted_name(source: &Path, job_id: &JobId) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}.pdf", secure_filename(&stem), job_id)
}

/// Output name for a merge: `merged_<YYYYmmdd_HHMMSS>_<job id>.pdf`.
pub fn merged_name<Tz: TimeZone>(at: &DateTime<Tz>, job_id: &JobId) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("merged_{}_{}.pdf", at.format("%Y%m%d_%H%M%S"), job_id)
}

/// 変換ディレクトリ内のファイル名を安全なパスに解決する。
///
/// `.pdf` 以外は拒否する。ファイルの存在は確認しない。
pub fn resolve_converted(convert_dir: &Path, name: &str) -> crate::error::Result<PathBuf> {
    let safe = secure_filename(name);
    let is_pdf = Path::new(&safe)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(PdfShrinkError::config(format!(
            "not a converted document: {name}"
        )));
    }
    Ok(convert_dir.join(safe))
}

/// Converted PDFs in `convert_dir`, sorted by name.
///
/// A missing directory is an empty library.
pub fn list_converted(convert_dir: &Path) -> crate::error::Result<Vec<String>> {
    if !convert_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(convert_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if name.to_ascii_lowercase().ends_with(".pdf") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Result of a delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    /// Names that resolved to no existing file.
    pub missing: Vec<String>,
    /// Names that are not converted documents.
    pub rejected: Vec<String>,
}

/// Delete the selected converted documents.
///
/// Missing and rejected names are reported, not raised; an I/O failure while
/// removing an existing file is an error.
pub fn delete_converted(convert_dir: &Path, names: &[String]) -> crate::error::Result<DeleteReport> {
    if names.is_empty() {
        return Err(PdfShrinkError::config("No files selected for deletion"));
    }
    let mut report = DeleteReport::default();
    for name in names {
        let path = match resolve_converted(convert_dir, name) {
            Ok(path) => path,
            Err(_) => {
                report.rejected.push(name.clone());
                continue;
            }
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted converted document");
                report.deleted.push(name.clone());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.missing.push(name.clone()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(report)
}
