use anyhow::{Context, Result};
use lopdf::{Document, Object, ObjectId};
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, info};

use crate::pdf;

#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// JPEG quality for re-encoded images; None leaves images untouched
    pub jpeg_quality: Option<u8>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: Some(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressReport {
    pub bytes: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub images_recompressed: usize,
}

impl CompressReport {
    /// fraction of the input saved, negative when the output grew
    pub fn savings(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        1.0 - self.compressed_size as f64 / self.original_size as f64
    }
}

/// an 8-bit baseline JPEG image XObject we know how to re-encode
struct JpegImage {
    id: ObjectId,
    gray: bool,
    data: Vec<u8>,
}

fn name_is(obj: Option<&Object>, name: &[u8]) -> bool {
    match obj {
        Some(Object::Name(n)) => n == name,
        Some(Object::Array(items)) if items.len() == 1 => name_is(items.first(), name),
        _ => false,
    }
}

fn find_jpeg_images(doc: &Document) -> Vec<JpegImage> {
    doc.objects
        .iter()
        .filter_map(|(&id, obj)| {
            let stream = obj.as_stream().ok()?;
            let dict = &stream.dict;
            if !name_is(dict.get(b"Subtype").ok(), b"Image")
                || !name_is(dict.get(b"Filter").ok(), b"DCTDecode")
                || dict.get(b"BitsPerComponent").and_then(Object::as_i64).ok() != Some(8)
                // custom Decode arrays and parms tie pixel values to the original encoding
                || dict.has(b"Decode")
                || dict.has(b"DecodeParms")
            {
                return None;
            }
            let color_space = dict.get(b"ColorSpace").ok();
            let gray = if name_is(color_space, b"DeviceGray") {
                true
            } else if name_is(color_space, b"DeviceRGB") {
                false
            } else {
                return None;
            };
            Some(JpegImage {
                id,
                gray,
                data: stream.content.clone(),
            })
        })
        .collect()
}

fn reencode_jpeg(data: &[u8], gray: bool, quality: u8) -> Result<Vec<u8>> {
    let format = if gray {
        turbojpeg::PixelFormat::GRAY
    } else {
        turbojpeg::PixelFormat::RGB
    };
    let mut decompressor = turbojpeg::Decompressor::new()?;
    let header = decompressor.read_header(data)?;
    let pitch = header.width * format.size();
    let mut image = turbojpeg::Image {
        pixels: vec![0u8; pitch * header.height],
        width: header.width,
        pitch,
        height: header.height,
        format,
    };
    decompressor.decompress(data, image.as_deref_mut())?;

    let mut compressor = turbojpeg::Compressor::new()?;
    compressor.set_quality(quality as i32)?;
    compressor.set_subsamp(if gray {
        turbojpeg::Subsamp::Gray
    } else {
        turbojpeg::Subsamp::Sub2x2
    })?;
    Ok(compressor.compress_to_vec(image.as_deref())?)
}

/// shrink a PDF: drop unreachable objects, deflate plain streams, and
/// re-encode JPEG images when that makes them smaller
pub fn compress_pdf(bytes: &[u8], options: &CompressOptions) -> Result<CompressReport> {
    let mut doc = pdf::load(bytes)?;
    let pruned = doc.prune_objects();
    debug!(pruned = pruned.len(), "pruned unreachable objects");

    let mut images_recompressed = 0;
    if let Some(quality) = options.jpeg_quality {
        let candidates = find_jpeg_images(&doc);
        debug!(candidates = candidates.len(), quality, "re-encoding images");
        // decode/encode is the slow part, keep it off the document
        let smaller: Vec<(ObjectId, Vec<u8>)> = candidates
            .par_iter()
            .filter_map(|img| match reencode_jpeg(&img.data, img.gray, quality) {
                Ok(out) if out.len() < img.data.len() => Some((img.id, out)),
                Ok(_) => None,
                Err(e) => {
                    debug!(id = ?img.id, error = %e, "image left as is");
                    None
                }
            })
            .collect();
        for (id, data) in smaller {
            if let Ok(Object::Stream(stream)) = doc.get_object_mut(id) {
                stream.set_content(data);
                stream.allows_compression = false;
                images_recompressed += 1;
            }
        }
    }

    doc.compress();
    doc.renumber_objects();
    let out = pdf::save(&mut doc)?;
    Ok(CompressReport {
        original_size: bytes.len(),
        compressed_size: out.len(),
        bytes: out,
        images_recompressed,
    })
}

pub fn compress_file(input: &Path, options: &CompressOptions, output: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    info!("Compressing {} -> {}", input.display(), output.display());
    let start = std::time::Instant::now();
    let report = compress_pdf(&bytes, options)
        .with_context(|| format!("Failed to compress {}", input.display()))?;
    pdf::write_output(&report.bytes, output)?;
    info!(
        "Done. {} -> {} bytes ({:.1}% saved, {} image{} re-encoded) in {:.2}s",
        report.original_size,
        report.compressed_size,
        report.savings() * 100.0,
        report.images_recompressed,
        if report.images_recompressed == 1 { "" } else { "s" },
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
