// 全ジョブ実行

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use crate::codec::{ImageCodec, JpegCodec};
use crate::external::{Conformer, Exporter, GhostscriptConformer, KeynoteExporter};
use crate::pipeline::job_runner::{Converter, ConverterConfig, JobOutcome, run_merge};

/// One independent unit of work.
#[derive(Debug, Clone)]
pub enum JobSpec {
    Convert {
        source: PathBuf,
        config: ConverterConfig,
    },
    Merge {
        convert_dir: PathBuf,
        files: Vec<String>,
    },
}

/// External collaborators shared by every job in a batch.
#[derive(Clone)]
pub struct Collaborators {
    pub exporter: Arc<dyn Exporter>,
    pub conformer: Option<Arc<dyn Conformer>>,
    pub codec: Arc<dyn ImageCodec>,
}

impl Collaborators {
    /// `osascript` export, Ghostscript PDF/A, JPEG codec.
    pub fn system(export_timeout: Duration, pdfa_timeout: Duration) -> Self {
        Self {
            exporter: Arc::new(KeynoteExporter::new(export_timeout)),
            conformer: Some(Arc::new(GhostscriptConformer::new(pdfa_timeout))),
            codec: Arc::new(JpegCodec),
        }
    }

    /// Custom exporter, no PDF/A converter, JPEG codec.
    pub fn with_exporter(exporter: Arc<dyn Exporter>) -> Self {
        Self {
            exporter,
            conformer: None,
            codec: Arc::new(JpegCodec),
        }
    }
}

/// Run a single job to completion.
pub fn run_job(spec: &JobSpec, collaborators: &Collaborators) -> JobOutcome {
    match spec {
        JobSpec::Convert { source, config } => {
            let mut converter = Converter::new(config.clone(), Arc::clone(&collaborators.exporter))
                .with_codec(Arc::clone(&collaborators.codec));
            if let Some(conformer) = &collaborators.conformer {
                converter = converter.with_conformer(Arc::clone(conformer));
            }
            converter.convert(source)
        }
        JobSpec::Merge { convert_dir, files } => run_merge(convert_dir, files),
    }
}

/// Run multiple jobs in parallel, collecting outcomes in input order.
/// One job failure does NOT prevent other jobs from running.
pub fn run_all_jobs(jobs: &[JobSpec], collaborators: &Collaborators) -> Vec<JobOutcome> {
    jobs.par_iter()
        .map(|job| run_job(job, collaborators))
        .collect()
}
