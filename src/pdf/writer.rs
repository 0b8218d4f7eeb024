// 文書のシリアライズとバイト単位コピー

use std::path::Path;

use lopdf::Document;

use crate::error::PdfShrinkError;

/// PDFドキュメントをバイト列として出力する。
pub fn save_to_bytes(doc: &mut Document) -> crate::error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| PdfShrinkError::pdf_write(e.to_string()))?;
    Ok(buf)
}

/// PDFドキュメントを指定パスに書き出す。
///
/// 書き出したバイト数を返す。
pub fn write_document(doc: &mut Document, path: &Path) -> crate::error::Result<u64> {
    let bytes = save_to_bytes(doc)?;
    std::fs::write(path, &bytes).map_err(|e| {
        PdfShrinkError::pdf_write(format!("failed to write {}: {e}", path.display()))
    })?;
    Ok(bytes.len() as u64)
}

/// ファイルをバイト単位でそのままコピーする。
///
/// 再シリアライズを避けたい場合（変更なし・フォールバック）に使う。
pub fn copy_verbatim(src: &Path, dst: &Path) -> crate::error::Result<u64> {
    Ok(std::fs::copy(src, dst)?)
}
