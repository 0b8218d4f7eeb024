// 複数PDFのページ連結

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::PdfShrinkError;

/// ページツリーから継承される属性。連結時に各ページへ複写する。
const INHERITABLE_KEYS: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// ページツリーとアウトラインは連結後の文書で作り直すため持ち込まない。
const DROPPED_TYPES: &[&[u8]] = &[b"Catalog", b"Pages", b"Outlines", b"Outline"];

/// 親ノードから継承属性を探す。ページ自身が持つ値が優先される。
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // 深さ制限で循環するページツリーを打ち切る
    for _ in 0..64 {
        let id = parent?;
        let node = doc.get_dictionary(id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// 文書のページを順序通りに取り出し、継承属性を平坦化した辞書を返す。
fn flattened_pages(doc: &Document) -> crate::error::Result<Vec<(ObjectId, Dictionary)>> {
    let mut pages = Vec::new();
    for (page_num, page_id) in doc.get_pages() {
        let page = doc.get_dictionary(page_id).map_err(|e| {
            PdfShrinkError::merge(format!("page {} is not a dictionary: {}", page_num, e))
        })?;
        let mut flat = page.clone();
        for key in INHERITABLE_KEYS {
            if !flat.has(key)
                && let Some(value) = inherited_attribute(doc, page, key)
            {
                flat.set(key.to_vec(), value);
            }
        }
        pages.push((page_id, flat));
    }
    Ok(pages)
}

/// 複数の文書のページを入力順に連結した新しい文書を作る。
///
/// 各文書のオブジェクト番号を重ならないように振り直してから、
/// ページ以外のオブジェクトをそのまま移し、新しいページツリーと
/// Catalogを作成する。構造圧縮は呼び出し側で行う。
pub fn concatenate(sources: Vec<Document>) -> crate::error::Result<Document> {
    if sources.is_empty() {
        return Err(PdfShrinkError::merge("no documents to merge"));
    }

    let mut max_id: u32 = 1;
    let mut ordered_pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut merged = Document::with_version("1.5");

    for (i, mut doc) in sources.into_iter().enumerate() {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let pages = flattened_pages(&doc)?;
        if pages.is_empty() {
            return Err(PdfShrinkError::merge(format!(
                "document {} has no pages",
                i + 1
            )));
        }
        ordered_pages.extend(pages);

        for (object_id, object) in doc.objects {
            let kind = object.type_name().unwrap_or(b"");
            if !DROPPED_TYPES.contains(&kind) && kind != b"Page" {
                objects.insert(object_id, object);
            }
        }
    }

    merged.objects.extend(objects);
    merged.max_id = max_id;

    let pages_id = merged.new_object_id();

    let mut kids = Vec::with_capacity(ordered_pages.len());
    for (page_id, mut dict) in ordered_pages {
        dict.set("Parent", Object::Reference(pages_id));
        merged.objects.insert(page_id, Object::Dictionary(dict));
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Kids", Object::Array(kids));
    pages_dict.set("Count", Object::Integer(count));
    merged.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = merged.add_object(Object::Dictionary(catalog));
    merged.trailer.set("Root", Object::Reference(catalog_id));

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// 継承属性（MediaBox）をPagesノードにだけ持つ文書
    fn doc_with_inherited_mediabox(pages: usize) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 100.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_concatenate_empty_is_error() {
        assert!(concatenate(Vec::new()).is_err());
    }

    #[test]
    fn test_concatenate_flattens_inherited_mediabox() {
        let merged = concatenate(vec![
            doc_with_inherited_mediabox(1),
            doc_with_inherited_mediabox(2),
        ])
        .expect("merge");

        let pages = merged.get_pages();
        assert_eq!(pages.len(), 3);
        for page_id in pages.values() {
            let page = merged.get_dictionary(*page_id).expect("page dict");
            assert!(page.get(b"MediaBox").is_ok(), "MediaBox must be flattened");
        }
    }

    #[test]
    fn test_concatenate_rejects_pageless_document() {
        let mut empty = Document::with_version("1.5");
        let pages_id = empty.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog_id = empty.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        empty.trailer.set("Root", catalog_id);

        let err = concatenate(vec![doc_with_inherited_mediabox(1), empty]).unwrap_err();
        assert!(matches!(err, PdfShrinkError::MergeError(_)));
    }
}
