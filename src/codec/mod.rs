//! Image codec adapter.
//!
//! Decodes embedded raster payloads into pixels and re-encodes pixels as
//! baseline JPEG. Decoding failures are reported as
//! [`PdfShrinkError::DecodeError`](crate::error::PdfShrinkError::DecodeError)
//! and mean "skip this image", never "stop the document".

pub mod jpeg;

use image::DynamicImage;
use image::imageops::FilterType;
use lopdf::Stream;

use crate::pdf::image_xobject::{ImageMeta, decode_image_stream};

/// 再エンコード結果。
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub filter: &'static str,
}

/// Decode/encode seam used by the raster reduction engine.
///
/// Implementations must be stateless with respect to a document so the
/// same codec can be shared across concurrent jobs.
pub trait ImageCodec: Send + Sync {
    /// Decode an image XObject stream into pixels.
    fn decode(&self, stream: &Stream, meta: &ImageMeta) -> crate::error::Result<DynamicImage>;

    /// Encode pixels with the given lossy quality (0-100).
    fn encode(&self, pixels: &DynamicImage, quality: u8) -> crate::error::Result<EncodedImage>;
}

/// Baseline JPEG codec backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn decode(&self, stream: &Stream, meta: &ImageMeta) -> crate::error::Result<DynamicImage> {
        decode_image_stream(stream, meta)
    }

    fn encode(&self, pixels: &DynamicImage, quality: u8) -> crate::error::Result<EncodedImage> {
        let normalized = normalize_color(pixels);
        let (width, height) = (normalized.width(), normalized.height());
        let (data, color_space) = match &normalized {
            DynamicImage::ImageLuma8(gray) => (jpeg::encode_gray_to_jpeg(gray, quality)?, "DeviceGray"),
            DynamicImage::ImageRgb8(rgb) => (jpeg::encode_rgb_to_jpeg(rgb, quality)?, "DeviceRGB"),
            _ => (jpeg::encode_rgb_to_jpeg(&normalized.to_rgb8(), quality)?, "DeviceRGB"),
        };
        Ok(EncodedImage {
            data,
            width,
            height,
            color_space,
            filter: "DCTDecode",
        })
    }
}

/// JPEGにはアルファもパレットもないため、エンコード前に色を正規化する。
///
/// グレースケール系は8bitグレーに、それ以外（アルファ付き、16bit、浮動小数）は
/// 8bit RGBに変換する。
pub fn normalize_color(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img.clone(),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLuma8(img.to_luma8())
        }
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Lanczos3 で指定サイズにリサンプルする。
pub fn resample(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_exact(width, height, FilterType::Lanczos3)
}
