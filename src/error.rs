use thiserror::Error;

/// 外部エクスポートツールの失敗種別。
///
/// ツール自身が失敗を報告した場合と、成功を報告したのに何も
/// 出力しなかった場合は別の失敗として扱う。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportFailure {
    #[error("export tool unavailable: {0}")]
    Unavailable(String),

    #[error("export timed out after {0} seconds")]
    TimedOut(u64),

    #[error("export tool reported failure: {0}")]
    ToolFailed(String),

    #[error("export tool reported success but produced no output")]
    NoOutput,
}

#[derive(Debug, Error)]
pub enum PdfShrinkError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("PDF read error: {0}")]
    PdfReadError(String),

    #[error("PDF write error: {0}")]
    PdfWriteError(String),

    #[error("Image decode error: {0}")]
    DecodeError(String),

    #[error("Image encode error: {0}")]
    EncodeError(String),

    #[error("Compaction error: {0}")]
    CompactionError(String),

    #[error("Merge error: {0}")]
    MergeError(String),

    #[error("Export error: {0}")]
    ExportError(#[from] ExportFailure),

    #[error("PDF/A conversion error: {0}")]
    ConformanceError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Generates factory methods for [`PdfShrinkError`] variants that wrap a `String`.
macro_rules! error_constructors {
    ($(
        $(#[doc = $doc:expr])*
        $method:ident => $variant:ident
    ),* $(,)?) => {
        impl PdfShrinkError {
            $(
                $(#[doc = $doc])*
                pub fn $method(msg: impl Into<String>) -> Self {
                    Self::$variant(msg.into())
                }
            )*
        }
    };
}

error_constructors! {
    /// Create a configuration error.
    config => ConfigError,
    /// Create a PDF read error.
    pdf_read => PdfReadError,
    /// Create a PDF write error.
    pdf_write => PdfWriteError,
    /// Create an image decode error.
    decode => DecodeError,
    /// Create an image encode error.
    encode => EncodeError,
    /// Create a compaction error.
    compaction => CompactionError,
    /// Create a merge error.
    merge => MergeError,
    /// Create a PDF/A conversion error.
    conformance => ConformanceError,
}

impl From<lopdf::Error> for PdfShrinkError {
    fn from(e: lopdf::Error) -> Self {
        Self::PdfReadError(e.to_string())
    }
}

impl From<serde_json::Error> for PdfShrinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<serde_yml::Error> for PdfShrinkError {
    fn from(e: serde_yml::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<image::ImageError> for PdfShrinkError {
    fn from(e: image::ImageError) -> Self {
        Self::EncodeError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PdfShrinkError>;
