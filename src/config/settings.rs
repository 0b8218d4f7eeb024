use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::pipeline::reducer::ReductionParameters;

/// プロセス全体の設定。`settings.yaml` から読み込む。
///
/// 省略されたキーはデフォルト値で補う。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub convert_dir: PathBuf,
    pub dpi: u32,
    pub quality: u8,
    pub min_image_bytes: usize,
    pub export_timeout_secs: u64,
    pub pdfa: bool,
    pub pdfa_timeout_secs: u64,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            convert_dir: PathBuf::from("converted"),
            dpi: 150,
            quality: 60,
            min_image_bytes: 5 * 1024,
            export_timeout_secs: 120,
            pdfa: false,
            pdfa_timeout_secs: 120,
            max_upload_bytes: 300 * 1024 * 1024,
            allowed_extensions: vec!["key".to_string()],
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        let settings: Settings = serde_yml::from_str(yaml).map_err(|e| {
            crate::error::PdfShrinkError::config(format!("Failed to parse settings YAML: {e}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 値域外の設定を拒否する。
    pub fn validate(&self) -> crate::error::Result<()> {
        ReductionParameters {
            target_dpi: self.dpi,
            quality: self.quality,
            min_image_bytes: self.min_image_bytes,
        }
        .validate()?;
        if self.export_timeout_secs == 0 || self.pdfa_timeout_secs == 0 {
            return Err(crate::error::PdfShrinkError::config(
                "timeouts must be at least one second",
            ));
        }
        Ok(())
    }
}
