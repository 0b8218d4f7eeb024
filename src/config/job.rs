use std::path::Path;

use serde::Deserialize;

/// ジョブファイル。変換要求・結合要求・削除要求の一覧を持つ。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobFile {
    pub conversions: Vec<ConversionJob>,
    pub merges: Vec<MergeJob>,
    /// 全ジョブ完了後に削除する変換済みファイル名。
    pub deletes: Vec<String>,
}

impl JobFile {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yml::from_str(yaml).map_err(|e| {
            crate::error::PdfShrinkError::config(format!("Failed to parse job YAML: {e}"))
        })
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty() && self.merges.is_empty() && self.deletes.is_empty()
    }
}

/// 単一ファイルの変換要求。`None` の項目は settings の値を使う。
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionJob {
    pub source: String,
    pub dpi: Option<u32>,
    pub quality: Option<u8>,
    pub min_image_bytes: Option<usize>,
    pub pdfa: Option<bool>,
}

/// 変換済みPDFの結合要求。
///
/// `files` は変換ディレクトリ内のファイル名で、指定順に結合される。
#[derive(Debug, Clone, Deserialize)]
pub struct MergeJob {
    #[serde(deserialize_with = "deserialize_files")]
    pub files: Vec<String>,
}

/// 結合対象のファイル名リストを検証する。
///
/// 空リストと空文字列の要素は拒否する。
pub fn validate_merge_selection(files: &[String]) -> crate::error::Result<()> {
    if files.is_empty() {
        return Err(crate::error::PdfShrinkError::config(
            "No files selected for merging",
        ));
    }
    if let Some(pos) = files.iter().position(|f| f.trim().is_empty()) {
        return Err(crate::error::PdfShrinkError::config(format!(
            "Empty file name at position {} in merge selection",
            pos + 1
        )));
    }
    Ok(())
}

/// serdeのdeserialize_withで使用する結合対象デシリアライザ
fn deserialize_files<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let files = Vec::<String>::deserialize(deserializer)?;
    validate_merge_selection(&files).map_err(serde::de::Error::custom)?;
    Ok(files)
}
