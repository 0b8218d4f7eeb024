// 画像縮小: 画像テーブル走査 -> 判定 -> 置換 -> 出力

use std::collections::BTreeMap;
use std::path::Path;

use lopdf::{Document, Object, ObjectId, Stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{EncodedImage, ImageCodec, resample};
use crate::error::PdfShrinkError;
use crate::pdf::image_xobject::read_image_meta;
use crate::pdf::optimizer::{CompactionStats, compact};
use crate::pdf::reader::{PdfReader, image_table};
use crate::pdf::writer::{copy_verbatim, write_document};

/// Resolution that a target DPI is measured against.
pub const REFERENCE_DPI: f64 = 300.0;

/// Images whose encoded payload is below this size are never touched.
pub const DEFAULT_MIN_IMAGE_BYTES: usize = 5 * 1024;

/// Caller-supplied knobs for raster reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReductionParameters {
    /// Target resolution; the linear scale factor is `target_dpi / 300`.
    pub target_dpi: u32,
    /// JPEG quality, 0-100.
    pub quality: u8,
    /// Minimum encoded size for an image to be considered.
    pub min_image_bytes: usize,
}

impl Default for ReductionParameters {
    fn default() -> Self {
        Self {
            target_dpi: 150,
            quality: 60,
            min_image_bytes: DEFAULT_MIN_IMAGE_BYTES,
        }
    }
}

impl ReductionParameters {
    /// 値域外のパラメータを拒否する。
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.target_dpi == 0 {
            return Err(PdfShrinkError::config("dpi must be positive"));
        }
        if self.quality > 100 {
            return Err(PdfShrinkError::config(format!(
                "quality must be 0-100, got {}",
                self.quality
            )));
        }
        Ok(())
    }

    /// Linear scale factor relative to [`REFERENCE_DPI`].
    pub fn scale(&self) -> f64 {
        self.target_dpi as f64 / REFERENCE_DPI
    }

    /// Pixel dimensions after scaling. Never returns a zero dimension.
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = self.scale();
        let scaled = |v: u32| -> u32 {
            let s = (v as f64 * scale).round();
            if s >= u32::MAX as f64 {
                u32::MAX
            } else {
                (s as u32).max(1)
            }
        };
        (scaled(width), scaled(height))
    }
}

/// Why an image was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SkipReason {
    /// Encoded payload below the minimum size.
    TooSmall,
    /// Payload could not be decoded (unsupported or malformed).
    Undecodable,
    /// A colour-key mask or a matted soft mask depends on the exact samples
    /// or dimensions of the image.
    MaskDependent,
    /// Target dimensions would not be smaller than the source.
    NoReduction,
    /// Re-encoded payload was not strictly smaller.
    NotSmaller,
    /// Re-encoding failed.
    EncodeFailed,
    /// The image object could not be read or updated.
    Unexpected,
}

/// Per-document accounting for one reduction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReductionReport {
    pub found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
    /// Encoded bytes of all found images before the pass.
    pub bytes_before: usize,
    /// Encoded bytes of all found images after the pass.
    pub bytes_after: usize,
}

impl ReductionReport {
    fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_insert(0) += 1;
    }

    /// Number of images skipped for `reason`.
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skip_reasons.get(&reason).copied().unwrap_or(0)
    }

    /// Whether the document needs to be re-serialized.
    ///
    /// A document without any raster images is still rewritten so that
    /// compaction applies to it.
    pub fn needs_rewrite(&self) -> bool {
        self.processed > 0 || self.found == 0
    }
}

/// Decision for a single image object.
enum ImageDecision {
    Replace(EncodedImage),
    Skip(SkipReason),
}

/// How the reduced document reached disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Re-serialized. `compaction` is `Err` with the reason when compaction
    /// failed and the uncompacted document was written instead.
    Rewritten {
        compaction: std::result::Result<CompactionStats, String>,
    },
    /// Written as a byte-for-byte copy of the source.
    CopiedUnchanged,
}

/// Result of running the whole reduction stage on a file.
#[derive(Debug, Clone)]
pub struct ReductionStage {
    pub report: ReductionReport,
    pub emission: Emission,
    pub pages: u32,
    pub bytes_written: u64,
}

/// Raster reduction engine.
pub struct RasterReducer<'a> {
    params: ReductionParameters,
    codec: &'a dyn ImageCodec,
}

impl<'a> RasterReducer<'a> {
    pub fn new(params: ReductionParameters, codec: &'a dyn ImageCodec) -> Self {
        Self { params, codec }
    }

    /// Reduce every distinct image object in `doc` in place.
    ///
    /// Per-image failures are recorded in the report and never returned as
    /// errors. Replacement happens at the object-table level, so every page
    /// referencing an image sees the new payload.
    pub fn reduce_document(&self, doc: &mut Document) -> crate::error::Result<ReductionReport> {
        let table = image_table(doc)?;
        let mut report = ReductionReport {
            found: table.len(),
            ..ReductionReport::default()
        };

        for (&id, pages) in &table {
            let original_len = match doc.get_object(id).and_then(Object::as_stream) {
                Ok(stream) => stream.content.len(),
                Err(_) => {
                    report.record_skip(SkipReason::Unexpected);
                    continue;
                }
            };
            report.bytes_before += original_len;

            let decision = match doc.get_object(id).and_then(Object::as_stream) {
                Ok(stream) => self.evaluate(doc, stream),
                Err(_) => ImageDecision::Skip(SkipReason::Unexpected),
            };

            match decision {
                ImageDecision::Replace(encoded) => {
                    let new_len = encoded.data.len();
                    match replace_image(doc, id, encoded) {
                        Ok(()) => {
                            debug!(
                                object = ?id,
                                pages = ?pages,
                                original_len,
                                new_len,
                                "image replaced"
                            );
                            report.processed += 1;
                            report.bytes_after += new_len;
                        }
                        Err(e) => {
                            warn!(object = ?id, error = %e, "image replacement failed");
                            report.record_skip(SkipReason::Unexpected);
                            report.bytes_after += original_len;
                        }
                    }
                }
                ImageDecision::Skip(reason) => {
                    debug!(object = ?id, ?reason, original_len, "image skipped");
                    report.record_skip(reason);
                    report.bytes_after += original_len;
                }
            }
        }

        info!(
            found = report.found,
            processed = report.processed,
            skipped = report.skipped,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "raster reduction finished"
        );
        Ok(report)
    }

    /// Decide what to do with one image stream.
    fn evaluate(&self, doc: &Document, stream: &Stream) -> ImageDecision {
        let original_len = stream.content.len();
        if original_len < self.params.min_image_bytes {
            return ImageDecision::Skip(SkipReason::TooSmall);
        }

        let meta = match read_image_meta(doc, stream) {
            Ok(meta) => meta,
            Err(_) => return ImageDecision::Skip(SkipReason::Undecodable),
        };
        if meta.color_key_mask || meta.matte_smask {
            return ImageDecision::Skip(SkipReason::MaskDependent);
        }
        let pixels = match self.codec.decode(stream, &meta) {
            Ok(pixels) => pixels,
            Err(e) => {
                debug!(
                    error = %e,
                    jpeg = meta.is_jpeg(),
                    filter = meta.single_filter().unwrap_or("-"),
                    "image not decodable"
                );
                return ImageDecision::Skip(SkipReason::Undecodable);
            }
        };

        let (width, height) = (pixels.width(), pixels.height());
        let (new_w, new_h) = self.params.target_dimensions(width, height);
        if new_w >= width && new_h >= height {
            return ImageDecision::Skip(SkipReason::NoReduction);
        }

        let resampled = resample(&pixels, new_w, new_h);
        let encoded = match self.codec.encode(&resampled, self.params.quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!(error = %e, "image re-encode failed");
                return ImageDecision::Skip(SkipReason::EncodeFailed);
            }
        };

        if encoded.data.len() >= original_len {
            return ImageDecision::Skip(SkipReason::NotSmaller);
        }
        ImageDecision::Replace(encoded)
    }

    /// Load `source`, reduce it, and write the result to `dest`.
    ///
    /// Loading and final emission failures are returned as errors; they are
    /// fatal for this stage only.
    pub fn reduce_file(&self, source: &Path, dest: &Path) -> crate::error::Result<ReductionStage> {
        let reader = PdfReader::open(source)?;
        let pages = reader.page_count();
        let mut doc = reader.into_document();
        let report = self.reduce_document(&mut doc)?;

        if !report.needs_rewrite() {
            let bytes_written = copy_verbatim(source, dest)?;
            info!(dest = %dest.display(), "no image reduced; copied source unchanged");
            return Ok(ReductionStage {
                report,
                emission: Emission::CopiedUnchanged,
                pages,
                bytes_written,
            });
        }

        let (mut doc, compaction) = compact_or_keep(doc);
        let bytes_written = write_document(&mut doc, dest)?;
        Ok(ReductionStage {
            report,
            emission: Emission::Rewritten { compaction },
            pages,
            bytes_written,
        })
    }
}

/// Compact a document, keeping the uncompacted version if compaction fails.
fn compact_or_keep(doc: Document) -> (Document, std::result::Result<CompactionStats, String>) {
    let mut candidate = doc.clone();
    match compact(&mut candidate) {
        Ok(stats) => (candidate, Ok(stats)),
        Err(e) => {
            warn!(error = %e, "compaction failed; writing uncompacted document");
            (doc, Err(e.to_string()))
        }
    }
}

/// Swap an image object's payload and dictionary in one step.
///
/// The stream is looked up before any mutation, so a failure leaves the
/// original object untouched.
fn replace_image(doc: &mut Document, id: ObjectId, encoded: EncodedImage) -> crate::error::Result<()> {
    let stream = doc
        .get_object_mut(id)
        .and_then(Object::as_stream_mut)
        .map_err(|e| PdfShrinkError::pdf_write(format!("image {:?} not writable: {}", id, e)))?;

    let dict = &mut stream.dict;
    dict.set("Width", encoded.width as i64);
    dict.set("Height", encoded.height as i64);
    dict.set("ColorSpace", Object::Name(encoded.color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", 8);
    dict.set("Filter", Object::Name(encoded.filter.as_bytes().to_vec()));
    dict.remove(b"DecodeParms");
    dict.remove(b"Decode");
    stream.set_content(encoded.data);
    Ok(())
}
