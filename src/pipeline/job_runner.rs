// ジョブ単位: エクスポート -> 画像縮小 -> 構造圧縮/フォールバック -> 確定
// 結合ジョブ: 選択ファイル読込 -> ページ連結 -> 構造圧縮 -> 出力

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::Document;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::codec::{ImageCodec, JpegCodec};
use crate::config::job::validate_merge_selection;
use crate::config::merged::MergedConfig;
use crate::external::{Conformer, Exporter};
use crate::error::ExportFailure;
use crate::library::{converted_name, is_allowed_source, merged_name, resolve_converted, secure_filename};
use crate::pdf::merger::concatenate;
use crate::pdf::optimizer::{CompactionStats, compact};
use crate::pdf::reader::PdfReader;
use crate::pdf::writer::{copy_verbatim, write_document};
use crate::pipeline::artifacts::{JobId, TempArtifacts};
use crate::pipeline::reducer::{Emission, RasterReducer, ReductionParameters, ReductionReport};

/// Configuration for conversion jobs, passed explicitly at construction.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Directory receiving outputs and all temporary files.
    pub convert_dir: PathBuf,
    pub params: ReductionParameters,
    /// Run the PDF/A collaborator after finalisation.
    pub pdfa: bool,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl From<&MergedConfig> for ConverterConfig {
    fn from(merged: &MergedConfig) -> Self {
        ConverterConfig {
            convert_dir: merged.convert_dir.clone(),
            params: merged.params,
            pdfa: merged.pdfa,
            max_upload_bytes: merged.max_upload_bytes,
            allowed_extensions: merged.allowed_extensions.clone(),
        }
    }
}

/// States a job passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Exported,
    Reduced,
    ReductionFailed,
    FallbackCopied,
    Finalized,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Exported => "exported",
            PipelineState::Reduced => "reduced",
            PipelineState::ReductionFailed => "reduction failed",
            PipelineState::FallbackCopied => "fallback copied",
            PipelineState::Finalized => "finalized",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Size accounting for a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub pages: u32,
}

impl MergeStats {
    /// Output size relative to the summed input size. `0.0` for empty input.
    pub fn compression_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            0.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}

/// Outcome of one job, surfaced to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub success: bool,
    pub message: String,
    pub output_path: Option<PathBuf>,
    pub job_id: JobId,
    /// States visited, in order. The last one is terminal.
    pub states: Vec<PipelineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReductionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_stats: Option<MergeStats>,
}

impl JobOutcome {
    /// Terminal state of the job.
    pub fn state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Failed)
    }

    /// Whether the output is the unreduced export copied as-is.
    pub fn fell_back(&self) -> bool {
        self.states.contains(&PipelineState::FallbackCopied)
    }
}

/// Bookkeeping for a running job.
struct Run {
    job_id: JobId,
    states: Vec<PipelineState>,
    report: Option<ReductionReport>,
}

impl Run {
    fn new() -> Self {
        Self {
            job_id: JobId::generate(),
            states: Vec::new(),
            report: None,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        info!(job = %self.job_id, state = %state, "job state");
        self.states.push(state);
    }

    fn fail(mut self, message: impl Into<String>) -> JobOutcome {
        let message = message.into();
        error!(job = %self.job_id, %message, "job failed");
        self.states.push(PipelineState::Failed);
        JobOutcome {
            success: false,
            message,
            output_path: None,
            job_id: self.job_id,
            states: self.states,
            report: self.report,
            merge_stats: None,
        }
    }

    fn succeed(mut self, message: String, output: PathBuf) -> JobOutcome {
        self.enter(PipelineState::Finalized);
        JobOutcome {
            success: true,
            message,
            output_path: Some(output),
            job_id: self.job_id,
            states: self.states,
            report: self.report,
            merge_stats: None,
        }
    }
}

/// Conversion orchestrator: export, reduce, compact or fall back, finalise.
pub struct Converter {
    config: ConverterConfig,
    exporter: Arc<dyn Exporter>,
    conformer: Option<Arc<dyn Conformer>>,
    codec: Arc<dyn ImageCodec>,
}

impl Converter {
    pub fn new(config: ConverterConfig, exporter: Arc<dyn Exporter>) -> Self {
        Self {
            config,
            exporter,
            conformer: None,
            codec: Arc::new(JpegCodec),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_conformer(mut self, conformer: Arc<dyn Conformer>) -> Self {
        self.conformer = Some(conformer);
        self
    }

    /// Convert one source file into a reduced PDF in the convert directory.
    ///
    /// Never panics and never returns an error: every failure is reported in
    /// the outcome, and no temporary file survives the call.
    pub fn convert(&self, source: &Path) -> JobOutcome {
        let mut run = Run::new();
        let display_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());

        if let Err(message) = self.check_source(source, &display_name) {
            return run.fail(message);
        }
        if let Err(e) = std::fs::create_dir_all(&self.config.convert_dir) {
            return run.fail(format!(
                "Cannot create output directory {}: {e}",
                self.config.convert_dir.display()
            ));
        }

        let output_name = converted_name(source, &run.job_id);
        let output = self.config.convert_dir.join(&output_name);
        let stem = source
            .file_stem()
            .map(|s| secure_filename(&s.to_string_lossy()))
            .unwrap_or_else(|| secure_filename(""));
        let mut artifacts = TempArtifacts::new(&self.config.convert_dir, &stem, &run.job_id);

        // --- Export ---
        let exported = artifacts.stage_path("export");
        if let Err(failure) = self.export(source, &exported) {
            return run.fail(format!("Export of {display_name} failed: {failure}"));
        }
        run.enter(PipelineState::Exported);

        // --- Reduce, or fall back to the export ---
        artifacts.set_output(&output);
        let reduced = artifacts.stage_path("reduce");
        let reducer = RasterReducer::new(self.config.params, self.codec.as_ref());
        let stage = reducer
            .reduce_file(&exported, &reduced)
            .and_then(|stage| {
                std::fs::rename(&reduced, &output)?;
                Ok(stage)
            });

        let mut message = match stage {
            Ok(stage) => {
                run.enter(PipelineState::Reduced);
                let text = describe_reduction(&display_name, &output_name, &stage.report, &stage.emission);
                run.report = Some(stage.report);
                text
            }
            Err(reduce_err) => {
                run.enter(PipelineState::ReductionFailed);
                warn!(job = %run.job_id, error = %reduce_err, "reduction failed; copying export unchanged");
                match copy_verbatim(&exported, &output) {
                    Ok(_) => {
                        run.enter(PipelineState::FallbackCopied);
                        format!(
                            "Converted {display_name} -> {output_name} without reduction (reduction failed: {reduce_err})"
                        )
                    }
                    Err(copy_err) => {
                        return run.fail(format!(
                            "Reduction of {display_name} failed ({reduce_err}) and fallback copy failed ({copy_err})"
                        ));
                    }
                }
            }
        };

        match std::fs::metadata(&output) {
            Ok(meta) if meta.len() > 0 => {}
            _ => return run.fail(format!("Output {output_name} missing after finalisation")),
        }

        // --- PDF/A (optional) ---
        if self.config.pdfa {
            let Some(conformer) = &self.conformer else {
                return run.fail("PDF/A requested but no PDF/A converter is configured");
            };
            let conformant = artifacts.stage_path("pdfa");
            if let Err(e) = conformer
                .to_conformant(&output, &conformant)
                .and_then(|()| Ok(std::fs::rename(&conformant, &output)?))
            {
                return run.fail(format!("PDF/A conversion of {output_name} failed: {e}"));
            }
            message.push_str(" [PDF/A]");
        }

        artifacts.commit();
        info!(job = %run.job_id, output = %output.display(), "conversion finished");
        run.succeed(message, output)
    }

    /// 入力ファイルの存在・拡張子・サイズを確認する。
    fn check_source(&self, source: &Path, display_name: &str) -> Result<(), String> {
        let meta = match std::fs::metadata(source) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(format!("Input file not found: {display_name}")),
        };
        if !is_allowed_source(source, &self.config.allowed_extensions) {
            return Err(format!(
                "Unsupported file type: {display_name} (allowed: {})",
                self.config.allowed_extensions.join(", ")
            ));
        }
        if meta.len() > self.config.max_upload_bytes {
            return Err(format!(
                "Input file too large: {display_name} ({} bytes, limit {})",
                meta.len(),
                self.config.max_upload_bytes
            ));
        }
        Ok(())
    }

    fn export(&self, source: &Path, dest: &Path) -> Result<(), ExportFailure> {
        self.exporter.export(source, dest)?;
        match std::fs::metadata(dest) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(ExportFailure::NoOutput),
        }
    }
}

fn describe_reduction(
    source: &str,
    output: &str,
    report: &ReductionReport,
    emission: &Emission,
) -> String {
    let mut text = format!(
        "Converted {source} -> {output} ({} of {} images reduced, {} -> {} image bytes)",
        report.processed, report.found, report.bytes_before, report.bytes_after
    );
    if let Emission::Rewritten { compaction: Err(reason) } = emission {
        text.push_str(&format!("; compaction skipped: {reason}"));
    }
    text
}

/// Merge converted documents from `convert_dir`, in selection order.
///
/// Every selected file must exist and load before anything is written.
/// Compaction failure fails the merge; no partial output is left behind.
pub fn run_merge(convert_dir: &Path, selection: &[String]) -> JobOutcome {
    merge_with(convert_dir, selection, compact)
}

fn merge_with(
    convert_dir: &Path,
    selection: &[String],
    compactor: impl FnOnce(&mut Document) -> crate::error::Result<CompactionStats>,
) -> JobOutcome {
    let run = Run::new();

    if let Err(e) = validate_merge_selection(selection) {
        return run.fail(e.to_string());
    }

    let mut paths = Vec::with_capacity(selection.len());
    for name in selection {
        match resolve_converted(convert_dir, name) {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => return run.fail(format!("File not found: {name}")),
            Err(e) => return run.fail(e.to_string()),
        }
    }

    let mut input_bytes = 0u64;
    let mut documents = Vec::with_capacity(paths.len());
    for (name, path) in selection.iter().zip(&paths) {
        match std::fs::metadata(path) {
            Ok(meta) => input_bytes += meta.len(),
            Err(e) => return run.fail(format!("Cannot read {name}: {e}")),
        }
        match PdfReader::open(path) {
            Ok(reader) => documents.push(reader.into_document()),
            Err(e) => return run.fail(format!("Cannot read {name}: {e}")),
        }
    }

    let mut merged = match concatenate(documents) {
        Ok(doc) => doc,
        Err(e) => return run.fail(e.to_string()),
    };
    if let Err(e) = compactor(&mut merged) {
        return run.fail(format!("Compaction failed after merge: {e}"));
    }
    let pages = merged.get_pages().len() as u32;

    let output_name = merged_name(&chrono::Local::now(), &run.job_id);
    let output = convert_dir.join(&output_name);
    let mut artifacts = TempArtifacts::new(convert_dir, "merged", &run.job_id);
    let staged = artifacts.stage_path("merge");
    artifacts.set_output(&output);

    let output_bytes = match write_document(&mut merged, &staged)
        .and_then(|bytes| Ok(std::fs::rename(&staged, &output).map(|()| bytes)?))
    {
        Ok(bytes) => bytes,
        Err(e) => return run.fail(format!("Cannot write {output_name}: {e}")),
    };
    artifacts.commit();

    let stats = MergeStats {
        input_bytes,
        output_bytes,
        pages,
    };
    info!(
        job = %run.job_id,
        files = selection.len(),
        pages,
        input_bytes,
        output_bytes,
        ratio = stats.compression_ratio(),
        "merge finished"
    );

    let message = format!(
        "Merged {} files into {output_name} ({pages} pages, {input_bytes} -> {output_bytes} bytes)",
        selection.len()
    );
    let mut outcome = run.succeed(message, output);
    outcome.merge_stats = Some(stats);
    outcome
}
