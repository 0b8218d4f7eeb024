// 画像XObjectのメタデータ読み取りとピクセルデコード

use std::io::Read;

use crate::error::PdfShrinkError;
use flate2::read::ZlibDecoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, dictionary};

/// 画像の色モード。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorMode {
    Gray,
    Rgb,
    Cmyk,
    /// Indexed色空間。`base` はパレットの1色あたりの成分数に対応する。
    Palette(Palette),
}

/// Indexed色空間のパレット。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub base: Box<ColorMode>,
    pub hival: u8,
    pub lookup: Vec<u8>,
}

impl ColorMode {
    /// 1ピクセルあたりの成分数。
    pub fn components(&self) -> usize {
        match self {
            ColorMode::Gray | ColorMode::Palette(_) => 1,
            ColorMode::Rgb => 3,
            ColorMode::Cmyk => 4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ColorMode::Gray => "gray",
            ColorMode::Rgb => "rgb",
            ColorMode::Cmyk => "cmyk",
            ColorMode::Palette(_) => "palette",
        }
    }
}

/// 画像XObjectのメタデータ
#[derive(Debug, Clone)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color_mode: Option<ColorMode>,
    /// フィルタ連鎖。空なら非圧縮。
    pub filters: Vec<String>,
    /// 単一フィルタの DecodeParms。
    pub decode_parms: DecodeParms,
    pub image_mask: bool,
    /// `/Mask` がカラーキー配列。サンプル値の完全一致が前提になる。
    pub color_key_mask: bool,
    /// `/SMask` に `Matte` がある。マスクと同じ寸法が前提になる。
    pub matte_smask: bool,
    pub has_decode_array: bool,
    /// エンコード済みストリームのバイト数
    pub encoded_len: usize,
}

/// FlateDecode / LZWDecode の DecodeParms。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParms {
    pub predictor: i64,
    pub colors: i64,
    pub bits_per_component: i64,
    pub columns: i64,
    pub early_change: bool,
}

impl Default for DecodeParms {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
            early_change: true,
        }
    }
}

impl ImageMeta {
    /// 単一フィルタの名前を返す。フィルタ連鎖の場合は `None`。
    pub fn single_filter(&self) -> Option<&str> {
        match self.filters.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// `DCTDecode` 単独でエンコードされているか。
    pub fn is_jpeg(&self) -> bool {
        self.single_filter() == Some("DCTDecode")
    }
}

/// ストリームが画像XObjectかどうかを判定する。
pub fn is_image_stream(stream: &lopdf::Stream) -> bool {
    matches!(
        stream.dict.get(b"Subtype").and_then(Object::as_name),
        Ok(subtype) if subtype == b"Image"
    )
}

/// 参照を解決する。解決できない場合は元のオブジェクトを返す。
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// 画像XObjectのストリームから画像メタデータを読み取る。
pub fn read_image_meta(doc: &Document, stream: &lopdf::Stream) -> crate::error::Result<ImageMeta> {
    let dict = &stream.dict;

    let width = dict_get_u32(dict, b"Width")?;
    let height = dict_get_u32(dict, b"Height")?;
    if width == 0 || height == 0 {
        return Err(PdfShrinkError::decode(format!(
            "Invalid image dimensions: {}x{}",
            width, height
        )));
    }

    let image_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));

    // BitsPerComponent: missing keyの場合のみデフォルト8（ImageMaskは1）、型エラーは伝播
    let bits_per_component = match dict.get(b"BitsPerComponent") {
        Ok(_) => {
            let bpc = dict_get_u32(dict, b"BitsPerComponent")?;
            u8::try_from(bpc).map_err(|_| {
                PdfShrinkError::decode(format!("Invalid BitsPerComponent: {}", bpc))
            })?
        }
        Err(_) if image_mask => 1,
        Err(_) => 8,
    };
    if !matches!(bits_per_component, 1 | 2 | 4 | 8 | 16) {
        return Err(PdfShrinkError::decode(format!(
            "Invalid BitsPerComponent: {}",
            bits_per_component
        )));
    }

    let color_mode = match dict.get(b"ColorSpace") {
        Ok(obj) => parse_color_space(doc, resolve(doc, obj)),
        Err(_) => None,
    };

    let filters = match dict.get(b"Filter").map(|obj| resolve(doc, obj)) {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).to_string()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|obj| match obj {
                Object::Name(name) => Some(String::from_utf8_lossy(name).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let decode_parms = if filters.is_empty() {
        DecodeParms::default()
    } else {
        read_decode_parms(doc, dict, 0)?
    };

    let color_key_mask = matches!(
        dict.get(b"Mask").map(|obj| resolve(doc, obj)),
        Ok(Object::Array(_))
    );
    let matte_smask = match dict.get(b"SMask").map(|obj| resolve(doc, obj)) {
        Ok(Object::Stream(smask)) => smask.dict.has(b"Matte"),
        _ => false,
    };

    Ok(ImageMeta {
        width,
        height,
        bits_per_component,
        color_mode,
        filters,
        decode_parms,
        image_mask,
        color_key_mask,
        matte_smask,
        has_decode_array: dict.has(b"Decode"),
        encoded_len: stream.content.len(),
    })
}

/// ColorSpaceオブジェクトを解釈する。未対応の色空間は `None`。
fn parse_color_space(doc: &Document, obj: &Object) -> Option<ColorMode> {
    match obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(ColorMode::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorMode::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(ColorMode::Cmyk),
            _ => None,
        },
        Object::Array(arr) => {
            let family = arr.first()?.as_name().ok()?;
            match family {
                b"ICCBased" => {
                    let profile = resolve(doc, arr.get(1)?).as_stream().ok()?;
                    match profile.dict.get(b"N").and_then(Object::as_i64).ok()? {
                        1 => Some(ColorMode::Gray),
                        3 => Some(ColorMode::Rgb),
                        4 => Some(ColorMode::Cmyk),
                        _ => None,
                    }
                }
                b"CalGray" => Some(ColorMode::Gray),
                b"CalRGB" => Some(ColorMode::Rgb),
                b"Indexed" | b"I" => {
                    let base = parse_color_space(doc, resolve(doc, arr.get(1)?))?;
                    if matches!(base, ColorMode::Palette(_)) {
                        return None;
                    }
                    let hival = resolve(doc, arr.get(2)?).as_i64().ok()?;
                    let hival = u8::try_from(hival).ok()?;
                    let lookup = match resolve(doc, arr.get(3)?) {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(s) => s
                            .decompressed_content()
                            .unwrap_or_else(|_| s.content.clone()),
                        _ => return None,
                    };
                    Some(ColorMode::Palette(Palette {
                        base: Box::new(base),
                        hival,
                        lookup,
                    }))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// `index` 番目のフィルタに対応する DecodeParms を読む。
///
/// 単独の辞書・配列・間接参照のいずれの形式も受け付ける。
/// 配列要素が `null` または欠けている場合は既定値。
fn read_decode_parms(doc: &Document, dict: &Dictionary, index: usize) -> crate::error::Result<DecodeParms> {
    let entry = match dict.get(b"DecodeParms").map(|obj| resolve(doc, obj)) {
        Err(_) | Ok(Object::Null) => None,
        Ok(Object::Dictionary(parms)) => (index == 0).then_some(parms),
        Ok(Object::Array(arr)) => match arr.get(index).map(|obj| resolve(doc, obj)) {
            None | Some(Object::Null) => None,
            Some(Object::Dictionary(parms)) => Some(parms),
            Some(other) => {
                return Err(PdfShrinkError::decode(format!(
                    "Invalid DecodeParms entry: {:?}",
                    other
                )));
            }
        },
        Ok(other) => {
            return Err(PdfShrinkError::decode(format!(
                "Invalid DecodeParms: {:?}",
                other
            )));
        }
    };

    let defaults = DecodeParms::default();
    let Some(parms) = entry else {
        return Ok(defaults);
    };
    let int = |key: &[u8], default: i64| -> crate::error::Result<i64> {
        match parms.get(key).map(|obj| resolve(doc, obj)) {
            Err(_) => Ok(default),
            Ok(Object::Integer(v)) => Ok(*v),
            Ok(other) => Err(PdfShrinkError::decode(format!(
                "Expected integer for DecodeParms {:?}, got {:?}",
                String::from_utf8_lossy(key),
                other
            ))),
        }
    };
    Ok(DecodeParms {
        predictor: int(b"Predictor", defaults.predictor)?,
        colors: int(b"Colors", defaults.colors)?,
        bits_per_component: int(b"BitsPerComponent", defaults.bits_per_component)?,
        columns: int(b"Columns", defaults.columns)?,
        early_change: int(b"EarlyChange", 1)? != 0,
    })
}

/// 辞書からu32値を取得するヘルパー（負の値はエラー）
fn dict_get_u32(dict: &lopdf::Dictionary, key: &[u8]) -> crate::error::Result<u32> {
    match dict.get(key) {
        Ok(Object::Integer(i)) => {
            let val = *i;
            if val < 0 || val > u32::MAX as i64 {
                Err(PdfShrinkError::decode(format!(
                    "Value out of u32 range for {:?}: {}",
                    String::from_utf8_lossy(key),
                    val
                )))
            } else {
                Ok(val as u32)
            }
        }
        Ok(Object::Real(f)) => {
            let val = *f;
            if val < 0.0 || val > u32::MAX as f32 {
                Err(PdfShrinkError::decode(format!(
                    "Value out of u32 range for {:?}: {}",
                    String::from_utf8_lossy(key),
                    val
                )))
            } else {
                Ok(val as u32)
            }
        }
        Ok(other) => Err(PdfShrinkError::decode(format!(
            "Expected integer for {:?}, got {:?}",
            String::from_utf8_lossy(key),
            other
        ))),
        Err(_) => Err(PdfShrinkError::decode(format!(
            "Missing required key: {:?}",
            String::from_utf8_lossy(key),
        ))),
    }
}

/// 画像XObjectのストリームデータをデコードしてDynamicImageに変換する。
///
/// 対応フィルタ:
/// - DCTDecode (JPEG, Gray/RGB)
/// - FlateDecode / LZWDecode (TIFF/PNG predictorは自前で復元)
/// - 非圧縮 (raw pixels)
///
/// 未対応の形式はすべて `DecodeError` を返す。呼び出し側はスキップの合図として扱う。
pub fn decode_image_stream(
    stream: &lopdf::Stream,
    meta: &ImageMeta,
) -> crate::error::Result<DynamicImage> {
    if meta.image_mask {
        return Err(PdfShrinkError::decode("Stencil masks are not re-encoded"));
    }
    if meta.has_decode_array {
        return Err(PdfShrinkError::decode("Decode arrays are not supported"));
    }
    let Some(mode) = meta.color_mode.as_ref() else {
        return Err(PdfShrinkError::decode("Unsupported or missing color space"));
    };

    match meta.filters.as_slice() {
        [] => decode_raw(&stream.content, meta, mode),
        [f] if f == "DCTDecode" => decode_jpeg(&stream.content, meta, mode),
        [f] if f == "FlateDecode" || f == "LZWDecode" => {
            let data = decompress(&stream.content, f, &meta.decode_parms)?;
            let data = undo_predictor(data, meta, mode)?;
            decode_raw(&data, meta, mode)
        }
        [other] => Err(PdfShrinkError::decode(format!(
            "Unsupported image filter: {}",
            other
        ))),
        chain => Err(PdfShrinkError::decode(format!(
            "Unsupported filter chain: {}",
            chain.join(", ")
        ))),
    }
}

/// フィルタを展開する。predictorはここでは適用しない。
fn decompress(data: &[u8], filter: &str, parms: &DecodeParms) -> crate::error::Result<Vec<u8>> {
    if filter == "FlateDecode" {
        let mut out = Vec::with_capacity(data.len() * 2);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| PdfShrinkError::decode(format!("FlateDecode error: {}", e)))?;
        return Ok(out);
    }

    // predictorを持たないDecodeParmsで展開させる
    let bare = lopdf::Stream::new(
        dictionary! {
            "Filter" => "LZWDecode",
            "DecodeParms" => dictionary! { "EarlyChange" => parms.early_change as i64 },
        },
        data.to_vec(),
    );
    bare.decompressed_content()
        .map_err(|e| PdfShrinkError::decode(format!("LZWDecode error: {}", e)))
}

/// DecodeParms の predictor を復元する。
///
/// Columns/Colors/BitsPerComponent が画像辞書と食い違う場合は
/// サンプル配置が確定できないのでエラーにする。
fn undo_predictor(data: Vec<u8>, meta: &ImageMeta, mode: &ColorMode) -> crate::error::Result<Vec<u8>> {
    let parms = &meta.decode_parms;
    if parms.predictor == 1 {
        return Ok(data);
    }
    if parms.columns != meta.width as i64
        || parms.colors != mode.components() as i64
        || parms.bits_per_component != meta.bits_per_component as i64
    {
        return Err(PdfShrinkError::decode(format!(
            "DecodeParms (Columns {}, Colors {}, BitsPerComponent {}) do not match the image",
            parms.columns, parms.colors, parms.bits_per_component
        )));
    }

    let components = mode.components();
    let bits_per_pixel = components * meta.bits_per_component as usize;
    let row_bytes = (meta.width as usize * bits_per_pixel).div_ceil(8);
    let height = meta.height as usize;
    match parms.predictor {
        2 => undo_tiff_predictor(data, row_bytes, height, components, meta.bits_per_component),
        10..=15 => undo_png_predictor(&data, row_bytes, height, bits_per_pixel.div_ceil(8)),
        other => Err(PdfShrinkError::decode(format!("Unsupported predictor: {}", other))),
    }
}

/// TIFF predictor 2（水平差分）。8bitサンプルのみ対応。
fn undo_tiff_predictor(
    mut data: Vec<u8>,
    row_bytes: usize,
    height: usize,
    components: usize,
    bpc: u8,
) -> crate::error::Result<Vec<u8>> {
    if bpc != 8 {
        return Err(PdfShrinkError::decode(format!(
            "TIFF predictor with {} bits per component is not supported",
            bpc
        )));
    }
    let expected = row_bytes * height;
    if data.len() < expected {
        return Err(PdfShrinkError::decode(format!(
            "Image data too short: expected {}, got {}",
            expected,
            data.len()
        )));
    }
    data.truncate(expected);
    for row in data.chunks_exact_mut(row_bytes) {
        for i in components..row.len() {
            row[i] = row[i].wrapping_add(row[i - components]);
        }
    }
    Ok(data)
}

/// PNG predictor（行ごとのフィルタ種別バイト付き）を復元する。
fn undo_png_predictor(
    data: &[u8],
    row_bytes: usize,
    height: usize,
    bpp: usize,
) -> crate::error::Result<Vec<u8>> {
    let stride = row_bytes + 1;
    if data.len() < stride * height {
        return Err(PdfShrinkError::decode(format!(
            "Predicted image data too short: expected {}, got {}",
            stride * height,
            data.len()
        )));
    }

    let mut out = vec![0u8; row_bytes * height];
    let mut previous = vec![0u8; row_bytes];
    for (y, encoded) in data.chunks_exact(stride).take(height).enumerate() {
        let (filter, encoded) = (encoded[0], &encoded[1..]);
        let row = &mut out[y * row_bytes..(y + 1) * row_bytes];
        for i in 0..row_bytes {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let upper_left = if i >= bpp { previous[i - bpp] } else { 0 };
            let predicted = match filter {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, upper_left),
                other => {
                    return Err(PdfShrinkError::decode(format!(
                        "Invalid PNG filter type: {}",
                        other
                    )));
                }
            };
            row[i] = encoded[i].wrapping_add(predicted);
        }
        previous.copy_from_slice(row);
    }
    Ok(out)
}

fn paeth(left: u8, up: u8, upper_left: u8) -> u8 {
    let p = left as i16 + up as i16 - upper_left as i16;
    let (pa, pb, pc) = (
        (p - left as i16).abs(),
        (p - up as i16).abs(),
        (p - upper_left as i16).abs(),
    );
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        upper_left
    }
}

/// JPEGデータをデコード
fn decode_jpeg(data: &[u8], meta: &ImageMeta, mode: &ColorMode) -> crate::error::Result<DynamicImage> {
    // CMYK JPEG は Adobe の反転規約があり色が保証できない
    if !matches!(mode, ColorMode::Gray | ColorMode::Rgb) {
        return Err(PdfShrinkError::decode(format!(
            "Unsupported JPEG color mode: {}",
            mode.name()
        )));
    }
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| PdfShrinkError::decode(format!("JPEG decode error: {}", e)))?;
    if img.width() != meta.width || img.height() != meta.height {
        return Err(PdfShrinkError::decode(format!(
            "JPEG dimensions {}x{} do not match dictionary {}x{}",
            img.width(),
            img.height(),
            meta.width,
            meta.height
        )));
    }
    Ok(img)
}

/// 行単位（バイト境界揃え）でサンプル値を取り出す。
///
/// 16bitサンプルは上位バイトのみを使う。BitsPerComponentは1/2/4/8/16のみ。
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bpc: u8,
) -> crate::error::Result<Vec<u8>> {
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(PdfShrinkError::decode(format!(
            "Unsupported BitsPerComponent: {}",
            bpc
        )));
    }
    let samples_per_row = (width as usize)
        .checked_mul(components)
        .ok_or_else(|| PdfShrinkError::decode("Image row size overflow"))?;
    let row_bytes = (samples_per_row * bpc as usize).div_ceil(8);
    let expected = row_bytes
        .checked_mul(height as usize)
        .ok_or_else(|| PdfShrinkError::decode("Image size overflow"))?;
    if data.len() < expected {
        return Err(PdfShrinkError::decode(format!(
            "Image data too short: expected {}, got {}",
            expected,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(samples_per_row * height as usize);
    for row in data[..expected].chunks_exact(row_bytes) {
        match bpc {
            8 => out.extend_from_slice(&row[..samples_per_row]),
            16 => out.extend(row.chunks_exact(2).take(samples_per_row).map(|b| b[0])),
            _ => {
                let per_byte = 8 / bpc as usize;
                let mask = (1u8 << bpc) - 1;
                for i in 0..samples_per_row {
                    let byte = row[i / per_byte];
                    let shift = 8 - bpc as usize * (i % per_byte + 1);
                    out.push((byte >> shift) & mask);
                }
            }
        }
    }
    Ok(out)
}

/// 1-4bitのサンプル値を0-255に伸張する。
fn scale_to_u8(value: u8, bpc: u8) -> u8 {
    match bpc {
        1 | 2 | 4 => {
            let max = (1u16 << bpc) - 1;
            (value as u16 * 255 / max) as u8
        }
        _ => value,
    }
}

/// CMYK → RGB の単純変換
fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let k = 255 - k as u16;
    [
        ((255 - c as u16) * k / 255) as u8,
        ((255 - m as u16) * k / 255) as u8,
        ((255 - y as u16) * k / 255) as u8,
    ]
}

/// Raw pixelデータからDynamicImageを構築
fn decode_raw(data: &[u8], meta: &ImageMeta, mode: &ColorMode) -> crate::error::Result<DynamicImage> {
    let (w, h) = (meta.width, meta.height);
    let bpc = meta.bits_per_component;
    let samples = unpack_samples(data, w, h, mode.components(), bpc)?;

    match mode {
        ColorMode::Gray => {
            let pixels = samples.iter().map(|&v| scale_to_u8(v, bpc)).collect();
            let img = GrayImage::from_raw(w, h, pixels).ok_or_else(|| {
                PdfShrinkError::decode("Failed to create Gray image from raw data")
            })?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        ColorMode::Rgb => {
            let pixels = samples.iter().map(|&v| scale_to_u8(v, bpc)).collect();
            let img = RgbImage::from_raw(w, h, pixels).ok_or_else(|| {
                PdfShrinkError::decode("Failed to create RGB image from raw data")
            })?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        ColorMode::Cmyk => {
            let pixels = samples
                .chunks_exact(4)
                .flat_map(|p| {
                    let [c, m, y, k] = [p[0], p[1], p[2], p[3]].map(|v| scale_to_u8(v, bpc));
                    cmyk_to_rgb(c, m, y, k)
                })
                .collect();
            let img = RgbImage::from_raw(w, h, pixels).ok_or_else(|| {
                PdfShrinkError::decode("Failed to create RGB image from CMYK data")
            })?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        ColorMode::Palette(palette) => expand_palette(&samples, w, h, palette),
    }
}

/// インデックスに対応するパレット色。範囲外はhivalに丸める。
fn palette_entry(palette: &Palette, components: usize, idx: u8) -> &[u8] {
    let i = (idx as usize).min(palette.hival as usize) * components;
    &palette.lookup[i..i + components]
}

/// パレットインデックスをRGB（またはGray）に展開する。
fn expand_palette(
    indices: &[u8],
    width: u32,
    height: u32,
    palette: &Palette,
) -> crate::error::Result<DynamicImage> {
    let base_components = palette.base.components();
    let entries = palette.hival as usize + 1;
    if palette.lookup.len() < entries * base_components {
        return Err(PdfShrinkError::decode(format!(
            "Palette lookup too short: expected {}, got {}",
            entries * base_components,
            palette.lookup.len()
        )));
    }

    let entry = |idx: u8| palette_entry(palette, base_components, idx);

    match palette.base.as_ref() {
        ColorMode::Gray => {
            let pixels = indices.iter().map(|&i| entry(i)[0]).collect();
            let img = GrayImage::from_raw(width, height, pixels).ok_or_else(|| {
                PdfShrinkError::decode("Failed to create Gray image from palette")
            })?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        ColorMode::Rgb => {
            let pixels = indices.iter().flat_map(|&i| entry(i).to_vec()).collect();
            let img = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
                PdfShrinkError::decode("Failed to create RGB image from palette")
            })?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        ColorMode::Cmyk => {
            let pixels = indices
                .iter()
                .flat_map(|&i| {
                    let p = entry(i);
                    cmyk_to_rgb(p[0], p[1], p[2], p[3])
                })
                .collect();
            let img = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
                PdfShrinkError::decode("Failed to create RGB image from CMYK palette")
            })?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        ColorMode::Palette(_) => Err(PdfShrinkError::decode("Nested Indexed color space")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::jpeg;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use lopdf::{Stream, StringFormat, dictionary};
    use std::io::Write;

    fn flate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("compress");
        encoder.finish().expect("finish")
    }

    /// テスト用: 指定サイズのRGB画像データを持つJPEGストリームを作成
    fn make_jpeg_stream(width: u32, height: u32, color: [u8; 3]) -> Stream {
        let mut rgb = RgbImage::new(width, height);
        for pixel in rgb.pixels_mut() {
            *pixel = image::Rgb(color);
        }
        let jpeg_data = jpeg::encode_rgb_to_jpeg(&rgb, 85).expect("encode test JPEG");

        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        Stream::new(dict, jpeg_data)
    }

    /// テスト用: Flate圧縮されたRaw RGB画像ストリームを作成
    fn make_flate_rgb_stream(width: u32, height: u32, color: [u8; 3]) -> Stream {
        let pixel_count = (width as usize) * (height as usize);
        let mut raw = Vec::with_capacity(pixel_count * 3);
        for _ in 0..pixel_count {
            raw.extend_from_slice(&color);
        }

        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        };
        Stream::new(dict, flate(&raw))
    }

    #[test]
    fn test_read_image_meta_jpeg() {
        let doc = Document::with_version("1.5");
        let stream = make_jpeg_stream(50, 30, [0, 0, 0]);
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        assert_eq!(meta.width, 50);
        assert_eq!(meta.height, 30);
        assert_eq!(meta.bits_per_component, 8);
        assert_eq!(meta.color_mode, Some(ColorMode::Rgb));
        assert!(meta.is_jpeg());
        assert_eq!(meta.encoded_len, stream.content.len());
    }

    #[test]
    fn test_read_image_meta_icc_based() {
        let mut doc = Document::with_version("1.5");
        let icc_id = doc.add_object(Stream::new(dictionary! { "N" => 3 }, vec![0; 16]));
        let mut stream = make_flate_rgb_stream(4, 4, [1, 2, 3]);
        stream.dict.set(
            "ColorSpace",
            vec![Object::Name(b"ICCBased".to_vec()), Object::Reference(icc_id)],
        );
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        assert_eq!(meta.color_mode, Some(ColorMode::Rgb));
    }

    #[test]
    fn test_read_image_meta_rejects_zero_width() {
        let doc = Document::with_version("1.5");
        let mut stream = make_jpeg_stream(10, 10, [0, 0, 0]);
        stream.dict.set("Width", 0);
        assert!(read_image_meta(&doc, &stream).is_err());
    }

    #[test]
    fn test_decode_jpeg_roundtrip() {
        let doc = Document::with_version("1.5");
        let stream = make_jpeg_stream(20, 20, [128, 64, 32]);
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        let img = decode_image_stream(&stream, &meta).expect("decode");
        assert_eq!(img.width(), 20);
        assert_eq!(img.height(), 20);
    }

    #[test]
    fn test_decode_flate_preserves_pixels() {
        let doc = Document::with_version("1.5");
        let stream = make_flate_rgb_stream(30, 30, [100, 150, 200]);
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        let img = decode_image_stream(&stream, &meta).expect("decode");
        let rgb = img.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [100, 150, 200]);
    }

    #[test]
    fn test_decode_indexed_palette() {
        let doc = Document::with_version("1.5");
        // 2色パレット、1bit/px、幅3 → 各行1バイト
        let lookup = vec![255, 0, 0, 0, 0, 255];
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 3,
            "Height" => 2,
            "ColorSpace" => vec![
                Object::Name(b"Indexed".to_vec()),
                Object::Name(b"DeviceRGB".to_vec()),
                Object::Integer(1),
                Object::String(lookup, StringFormat::Hexadecimal),
            ],
            "BitsPerComponent" => 1,
        };
        // 行1: 0,1,0 / 行2: 1,1,1
        let stream = Stream::new(dict, vec![0b0100_0000, 0b1110_0000]);
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        assert!(matches!(meta.color_mode, Some(ColorMode::Palette(_))));

        let img = decode_image_stream(&stream, &meta).expect("decode").to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 255]);
        assert_eq!(img.get_pixel(0, 1).0, [0, 0, 255]);
    }

    #[test]
    fn test_decode_cmyk_raw() {
        let doc = Document::with_version("1.5");
        let dict = dictionary! {
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceCMYK",
            "BitsPerComponent" => 8,
        };
        let stream = Stream::new(dict, vec![0, 255, 255, 0]);
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        let img = decode_image_stream(&stream, &meta).expect("decode").to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_decode_short_data_is_error() {
        let doc = Document::with_version("1.5");
        let dict = dictionary! {
            "Subtype" => "Image",
            "Width" => 10,
            "Height" => 10,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        let stream = Stream::new(dict, vec![0; 10]);
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        let err = decode_image_stream(&stream, &meta).unwrap_err();
        assert!(matches!(err, PdfShrinkError::DecodeError(_)));
    }

    #[test]
    fn test_decode_unsupported_filter_is_error() {
        let doc = Document::with_version("1.5");
        let mut stream = make_jpeg_stream(8, 8, [0, 0, 0]);
        stream.dict.set("Filter", "JPXDecode");
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        assert!(decode_image_stream(&stream, &meta).is_err());
    }

    #[test]
    fn test_decode_malformed_jpeg_is_error() {
        let doc = Document::with_version("1.5");
        let mut stream = make_jpeg_stream(8, 8, [0, 0, 0]);
        stream.set_content(b"not a jpeg at all".to_vec());
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        assert!(decode_image_stream(&stream, &meta).is_err());
    }

    #[test]
    fn test_read_image_meta_rejects_invalid_bits_per_component() {
        let doc = Document::with_version("1.5");
        for bpc in [0, 3, 12] {
            let mut stream = make_flate_rgb_stream(4, 4, [0, 0, 0]);
            stream.dict.set("BitsPerComponent", bpc);
            let err = read_image_meta(&doc, &stream).unwrap_err();
            assert!(matches!(err, PdfShrinkError::DecodeError(_)), "bpc {bpc}");
        }
    }

    #[test]
    fn test_decode_parms_forms() {
        let mut doc = Document::with_version("1.5");

        let mut direct = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        direct.dict.set("DecodeParms", dictionary! { "Predictor" => 12, "Columns" => 4 });
        let meta = read_image_meta(&doc, &direct).expect("direct");
        assert_eq!(meta.decode_parms.predictor, 12);
        assert_eq!(meta.decode_parms.columns, 4);

        let mut array = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        array.dict.set("Filter", vec![Object::Name(b"FlateDecode".to_vec())]);
        array.dict.set("DecodeParms", vec![Object::Dictionary(dictionary! { "Predictor" => 15 })]);
        assert_eq!(read_image_meta(&doc, &array).expect("array").decode_parms.predictor, 15);

        let parms_id = doc.add_object(dictionary! { "Predictor" => 2, "Colors" => 3 });
        let mut indirect = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        indirect.dict.set("DecodeParms", parms_id);
        let meta = read_image_meta(&doc, &indirect).expect("indirect");
        assert_eq!(meta.decode_parms.predictor, 2);
        assert_eq!(meta.decode_parms.colors, 3);

        let mut null_entry = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        null_entry.dict.set("DecodeParms", vec![Object::Null]);
        let meta = read_image_meta(&doc, &null_entry).expect("null entry");
        assert_eq!(meta.decode_parms, DecodeParms::default());

        let mut bogus = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        bogus.dict.set("DecodeParms", 7);
        assert!(read_image_meta(&doc, &bogus).is_err());
    }

    #[test]
    fn test_png_predictor_sub_and_average() {
        // 1バイト/画素、幅2、2行: Sub行 [10, 5] -> [10, 15]、Avg行 [1, 2] -> [6, 12]
        let encoded = [1, 10, 5, 3, 1, 2];
        let decoded = undo_png_predictor(&encoded, 2, 2, 1).expect("decode");
        assert_eq!(decoded, vec![10, 15, 6, 12]);
    }

    #[test]
    fn test_png_predictor_rejects_unknown_filter_type() {
        assert!(undo_png_predictor(&[9, 0, 0], 2, 1, 1).is_err());
    }

    #[test]
    fn test_tiff_predictor_on_flate_gray() {
        let doc = Document::with_version("1.5");
        // 元の行: [10, 20, 30] -> 差分 [10, 10, 10]
        let dict = dictionary! {
            "Subtype" => "Image",
            "Width" => 3,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
            "DecodeParms" => dictionary! { "Predictor" => 2, "Columns" => 3 },
        };
        let stream = Stream::new(dict, flate(&[10, 10, 10]));
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        let img = decode_image_stream(&stream, &meta).expect("decode").to_luma8();
        assert_eq!(img.as_raw(), &vec![10, 20, 30]);
    }

    #[test]
    fn test_unsupported_predictor_is_error() {
        let doc = Document::with_version("1.5");
        let mut stream = make_flate_rgb_stream(4, 4, [1, 2, 3]);
        stream.dict.set(
            "DecodeParms",
            dictionary! { "Predictor" => 3, "Colors" => 3, "Columns" => 4 },
        );
        let meta = read_image_meta(&doc, &stream).expect("read meta");
        assert!(decode_image_stream(&stream, &meta).is_err());
    }

    #[test]
    fn test_masks_are_recorded() {
        let mut doc = Document::with_version("1.5");
        let mut keyed = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        keyed.dict.set("Mask", vec![Object::Integer(0); 6]);
        let meta = read_image_meta(&doc, &keyed).expect("keyed");
        assert!(meta.color_key_mask);
        assert!(!meta.matte_smask);

        let smask = doc.add_object(Stream::new(
            dictionary! { "Subtype" => "Image", "Matte" => vec![Object::Real(1.0); 3] },
            vec![0; 16],
        ));
        let mut matted = make_flate_rgb_stream(4, 4, [0, 0, 0]);
        matted.dict.set("SMask", smask);
        let meta = read_image_meta(&doc, &matted).expect("matted");
        assert!(meta.matte_smask);
        assert!(!meta.color_key_mask);
    }

    #[test]
    fn test_is_image_stream() {
        let stream = make_jpeg_stream(2, 2, [0, 0, 0]);
        assert!(is_image_stream(&stream));
        let form = Stream::new(dictionary! { "Subtype" => "Form" }, vec![]);
        assert!(!is_image_stream(&form));
    }
}
