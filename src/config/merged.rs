use std::path::PathBuf;

use super::job::ConversionJob;
use super::settings::Settings;
use crate::pipeline::reducer::ReductionParameters;

#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub convert_dir: PathBuf,
    pub params: ReductionParameters,
    pub pdfa: bool,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl MergedConfig {
    /// JobのOption値がSomeならJobの値を、NoneならSettingsの値を使用する。
    ///
    /// ジョブ側の上書き値もSettingsと同じ値域で検証する。
    pub fn new(settings: &Settings, job: &ConversionJob) -> crate::error::Result<Self> {
        let merged = MergedConfig {
            convert_dir: settings.convert_dir.clone(),
            params: ReductionParameters {
                target_dpi: job.dpi.unwrap_or(settings.dpi),
                quality: job.quality.unwrap_or(settings.quality),
                min_image_bytes: job.min_image_bytes.unwrap_or(settings.min_image_bytes),
            },
            pdfa: job.pdfa.unwrap_or(settings.pdfa),
            max_upload_bytes: settings.max_upload_bytes,
            allowed_extensions: settings.allowed_extensions.clone(),
        };
        merged.params.validate()?;
        Ok(merged)
    }
}
