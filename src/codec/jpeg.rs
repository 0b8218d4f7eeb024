// image crate: 正規化済みピクセル -> JPEG bytes

use image::{GrayImage, RgbImage};
use std::io::Cursor;

/// JPEGエンコーダが受け付ける品質に丸める。
///
/// 入力は 0-100 を受け付け、0 は最低品質の 1 として扱う。
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(1, 100)
}

/// Encode an already-converted RGB image to JPEG bytes.
pub(crate) fn encode_rgb_to_jpeg(rgb: &RgbImage, quality: u8) -> crate::error::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, clamp_quality(quality));
    rgb.write_with_encoder(encoder)?;

    Ok(buf.into_inner())
}

/// Encode a grayscale image to JPEG bytes.
pub(crate) fn encode_gray_to_jpeg(gray: &GrayImage, quality: u8) -> crate::error::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, clamp_quality(quality));
    gray.write_with_encoder(encoder)?;

    Ok(buf.into_inner())
}
