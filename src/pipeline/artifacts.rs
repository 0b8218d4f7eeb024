// ジョブ識別子と一時ファイルの後始末

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-job unique identifier, 8 lowercase hex characters.
///
/// Embedded in every temporary and output filename so concurrent jobs
/// writing into the same directory never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub const LEN: usize = 8;

    /// プロセスID・時刻・プロセス内カウンタのSHA-256から生成する。
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let count = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(count.to_le_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scoped owner of a job's temporary files.
///
/// Every path handed out by [`TempArtifacts::stage_path`] is removed when
/// the guard is dropped. A pending output registered with
/// [`TempArtifacts::set_output`] is removed too unless [`TempArtifacts::commit`]
/// was called, so a failed job never leaves a partial output behind.
#[derive(Debug)]
pub struct TempArtifacts {
    dir: PathBuf,
    prefix: String,
    registered: Vec<PathBuf>,
    pending_output: Option<PathBuf>,
}

impl TempArtifacts {
    /// `dir` must be the directory the final output is written to.
    pub fn new(dir: impl Into<PathBuf>, stem: &str, job_id: &JobId) -> Self {
        Self {
            dir: dir.into(),
            prefix: format!("{}_{}", stem, job_id),
            registered: Vec::new(),
            pending_output: None,
        }
    }

    /// `{stem}_{job id}.{stage}.tmp` を登録して返す。
    pub fn stage_path(&mut self, stage: &str) -> PathBuf {
        let path = self.dir.join(format!("{}.{}.tmp", self.prefix, stage));
        if !self.registered.contains(&path) {
            self.registered.push(path.clone());
        }
        path
    }

    pub fn set_output(&mut self, path: impl Into<PathBuf>) {
        self.pending_output = Some(path.into());
    }

    /// Keep the pending output on drop.
    pub fn commit(&mut self) {
        self.pending_output = None;
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for path in self.registered.iter().chain(self.pending_output.iter()) {
            remove_quietly(path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary file"),
    }
}
