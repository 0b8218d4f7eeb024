// テスト用PDF・画像の生成ヘルパー

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, RgbImage};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

/// 擬似乱数のノイズ画像。JPEGでよく圧縮されないので大きなペイロードになる。
pub fn noise_rgb(width: u32, height: u32, seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        image::Rgb([next(), next(), next()])
    })
}

pub fn jpeg_bytes(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    DynamicImage::ImageRgb8(img.clone())
        .write_with_encoder(encoder)
        .expect("encode test jpeg");
    buf.into_inner()
}

/// 5 KiB を大きく超えるJPEG。
pub fn large_jpeg(width: u32, height: u32) -> Vec<u8> {
    jpeg_bytes(&noise_rgb(width, height, width ^ height), 95)
}

/// 5 KiB 未満の単色JPEG。
pub fn tiny_jpeg() -> Vec<u8> {
    let img = RgbImage::from_pixel(16, 16, image::Rgb([10, 120, 200]));
    let bytes = jpeg_bytes(&img, 80);
    assert!(bytes.len() < 5 * 1024);
    bytes
}

/// Image XObject stream for a JPEG payload.
pub fn jpeg_stream(data: Vec<u8>, width: u32, height: u32) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        data,
    )
    .with_compression(false)
}

/// Image XObject stream for raw (unfiltered) 8-bit RGB samples.
pub fn raw_rgb_stream(img: &RgbImage) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img.width() as i64,
            "Height" => img.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        img.as_raw().clone(),
    )
    .with_compression(false)
}

/// `page_count` pages, each drawing every image in `images` and showing `label`
/// followed by its page number. Images are shared objects, not copies.
pub fn build_pdf(label: &str, page_count: usize, images: Vec<Stream>) -> (Document, Vec<ObjectId>) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_ids: Vec<ObjectId> = images.into_iter().map(|s| doc.add_object(s)).collect();
    let mut xobjects = lopdf::Dictionary::new();
    for (i, id) in image_ids.iter().enumerate() {
        xobjects.set(format!("Im{i}"), Object::Reference(*id));
    }

    let mut kids = Vec::new();
    for page in 1..=page_count {
        let mut ops = format!("BT /F1 12 Tf 72 720 Td ({label}P{page}) Tj ET\n");
        for i in 0..image_ids.len() {
            ops.push_str(&format!("q 200 0 0 150 72 {} cm /Im{i} Do Q\n", 100 + i * 160));
        }
        let content_id = doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! {
                    "F1" => dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => "Helvetica",
                    },
                },
                "XObject" => xobjects.clone(),
            },
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    (doc, image_ids)
}

pub fn save(doc: &mut Document, path: &Path) {
    doc.save(path).expect("save test pdf");
}

pub fn page_count(path: &Path) -> usize {
    Document::load(path).expect("load pdf").get_pages().len()
}

/// Concatenated content of every page, in page order.
pub fn page_texts(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .values()
        .map(|id| String::from_utf8_lossy(&doc.get_page_content(*id).expect("content")).into_owned())
        .collect()
}

pub fn stream_content(doc: &Document, id: ObjectId) -> Vec<u8> {
    doc.get_object(id)
        .and_then(Object::as_stream)
        .expect("image stream")
        .content
        .clone()
}
