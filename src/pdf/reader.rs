use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::pdf::image_xobject::is_image_stream;

/// 画像オブジェクトと、それを参照するページ番号(1-indexed)の一覧。
///
/// 同一オブジェクトを複数ページが参照する場合も1エントリにまとまる。
pub type ImageTable = BTreeMap<ObjectId, Vec<u32>>;

pub struct PdfReader {
    doc: Document,
}

impl PdfReader {
    /// PDFファイルを開いてPdfReaderを作成する。
    pub fn open(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let doc = Document::load(path)?;
        Ok(Self { doc })
    }

    /// 内部のlopdf Documentを取り出す。
    pub fn into_document(self) -> Document {
        self.doc
    }

    /// ページ数を返す。
    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }
}

/// 指定ページが参照する画像XObjectのObjectId一覧を返す。
///
/// Form XObject内の画像も再帰的にたどる。直接埋め込み（非参照）の
/// 画像ストリームはオブジェクトテーブル上で置換できないため含めない。
fn page_image_ids(doc: &Document, page_id: ObjectId) -> crate::error::Result<Vec<ObjectId>> {
    let (resource_dict, resource_ids) = doc.get_page_resources(page_id)?;

    let mut found = BTreeSet::new();
    let mut visited_forms = BTreeSet::new();

    // ページ辞書に直接埋め込まれたResources
    if let Some(dict) = resource_dict {
        collect_images_from_resources(doc, dict, &mut found, &mut visited_forms);
    }

    // 参照されているResources（親ページツリーから継承されたものも含む）
    for res_id in resource_ids {
        let dict = doc.get_dictionary(res_id)?;
        collect_images_from_resources(doc, dict, &mut found, &mut visited_forms);
    }

    Ok(found.into_iter().collect())
}

/// 文書全体の画像テーブルを構築する。
///
/// キーは画像オブジェクトのID、値は参照元のページ番号（昇順、重複なし）。
pub fn image_table(doc: &Document) -> crate::error::Result<ImageTable> {
    let mut table = ImageTable::new();
    for (page_num, page_id) in doc.get_pages() {
        for id in page_image_ids(doc, page_id)? {
            let pages = table.entry(id).or_default();
            if pages.last() != Some(&page_num) {
                pages.push(page_num);
            }
        }
    }
    Ok(table)
}

/// リソース辞書のXObjectエントリから画像を収集し、Form XObjectは再帰する。
fn collect_images_from_resources(
    doc: &Document,
    resources: &Dictionary,
    found: &mut BTreeSet<ObjectId>,
    visited_forms: &mut BTreeSet<ObjectId>,
) {
    let xobject_dict = match resources.get(b"XObject") {
        Ok(Object::Dictionary(d)) => d,
        Ok(Object::Reference(id)) => match doc.get_dictionary(*id) {
            Ok(d) => d,
            Err(_) => return,
        },
        _ => return, // XObjectエントリがない場合は何もしない
    };

    for (_name, value) in xobject_dict.iter() {
        let Object::Reference(id) = value else {
            continue;
        };
        let Ok(stream) = doc.get_object(*id).and_then(Object::as_stream) else {
            continue;
        };

        if is_image_stream(stream) {
            found.insert(*id);
            continue;
        }

        let is_form = matches!(
            stream.dict.get(b"Subtype").and_then(Object::as_name),
            Ok(subtype) if subtype == b"Form"
        );
        // 循環参照対策: 一度たどったFormは再訪しない
        if is_form && visited_forms.insert(*id) {
            let form_resources = match stream.dict.get(b"Resources") {
                Ok(Object::Dictionary(d)) => Some(d),
                Ok(Object::Reference(res_id)) => doc.get_dictionary(*res_id).ok(),
                _ => None,
            };
            if let Some(res) = form_resources {
                collect_images_from_resources(doc, res, found, visited_forms);
            }
        }
    }
}
