// 構造圧縮: FlateDecode圧縮、孤立オブジェクト除去

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use crate::error::PdfShrinkError;

/// 圧縮パスの結果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub streams_compressed: usize,
    pub objects_removed: usize,
}

/// 圧縮対象外のストリーム種別。
const UNCOMPRESSIBLE_TYPES: &[&[u8]] = &[b"XRef", b"ObjStm"];

/// ドキュメント内の未圧縮ストリームにFlateDecode圧縮を適用する。
///
/// 既にフィルターが設定されているストリームはスキップする（二重圧縮防止）。
/// 圧縮後のほうが大きくなるストリームは元のまま残す。
/// 戻り値は圧縮したストリーム数。
pub fn compress_streams(doc: &mut Document) -> usize {
    let ids: Vec<ObjectId> = doc.objects.keys().copied().collect();
    let mut compressed_count = 0;

    for id in ids {
        let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) else {
            continue;
        };
        // Skip streams that already have a filter
        if stream.dict.get(b"Filter").is_ok() || stream.content.is_empty() {
            continue;
        }
        if let Ok(kind) = stream.dict.get(b"Type").and_then(Object::as_name)
            && UNCOMPRESSIBLE_TYPES.contains(&kind)
        {
            continue;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        if encoder.write_all(&stream.content).is_err() {
            continue;
        }
        let Ok(compressed) = encoder.finish() else {
            continue;
        };
        if compressed.len() >= stream.content.len() {
            continue;
        }

        stream.dict.set("Filter", "FlateDecode");
        stream.set_content(compressed);
        compressed_count += 1;
    }

    compressed_count
}

/// 孤立オブジェクト（どこからも参照されていないオブジェクト）を除去する。
///
/// 戻り値は除去したオブジェクト数。
pub fn delete_unused_objects(doc: &mut Document) -> usize {
    doc.prune_objects().len()
}

/// 構造圧縮の全パスを順序通りに実行する。
///
/// 1. 未圧縮ストリームを圧縮
/// 2. 孤立オブジェクトを除去
///
/// ページ数が変化した場合、またはページツリーが読めない場合は
/// `CompactionError` を返す。その場合 `doc` は途中まで変更されているので、
/// 呼び出し側は圧縮前の文書に差し替えること。
pub fn compact(doc: &mut Document) -> crate::error::Result<CompactionStats> {
    let pages_before = doc.get_pages().len();
    if pages_before == 0 {
        return Err(PdfShrinkError::compaction(
            "document has no reachable pages",
        ));
    }

    let streams_compressed = compress_streams(doc);
    let objects_removed = delete_unused_objects(doc);

    let pages_after = doc.get_pages().len();
    if pages_after != pages_before {
        return Err(PdfShrinkError::compaction(format!(
            "page count changed during compaction ({} -> {})",
            pages_before, pages_after
        )));
    }

    debug!(
        streams_compressed,
        objects_removed, "structural compaction finished"
    );

    Ok(CompactionStats {
        streams_compressed,
        objects_removed,
    })
}
