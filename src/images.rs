use anyhow::{Context, Result};
use lopdf::content::Operation;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::layout::{compute_fit, Orientation, PageFitRect, PageSize};
use crate::parse::parse_jpeg_header;
use crate::pdf::{self, Metadata, PageTreeBuilder};

const DEFAULT_DPI: u32 = 300;

#[derive(Debug, Clone, Default)]
pub struct ImageLayout {
    /// fixed paper size; None sizes each page to its image
    pub page_size: Option<PageSize>,
    pub orientation: Orientation,
    /// blank border in points on every side
    pub margin: f32,
    /// overrides the DPI recorded in the image
    pub dpi: Option<u32>,
}

/// image data ready for PDF insertion
enum PreparedImage {
    /// JPEG bytes embedded as-is
    Jpeg {
        width: u32,
        height: u32,
        components: u8,
        /// true if CMYK values need inversion
        invert_cmyk: bool,
        data: Vec<u8>,
        dpi: Option<u32>,
    },
    /// decoded pixels, deflated, with alpha split out
    Deflated {
        width: u32,
        height: u32,
        color_channels: u8,
        color: Vec<u8>,
        alpha: Option<Vec<u8>>,
    },
}

impl PreparedImage {
    fn pixel_size(&self) -> (u32, u32) {
        match self {
            PreparedImage::Jpeg { width, height, .. }
            | PreparedImage::Deflated { width, height, .. } => (*width, *height),
        }
    }

    fn dpi(&self) -> Option<u32> {
        match self {
            PreparedImage::Jpeg { dpi, .. } => *dpi,
            PreparedImage::Deflated { .. } => None,
        }
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn prepare_image(path: &Path) -> Result<PreparedImage> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    anyhow::ensure!(data.len() >= 4, "File too small: {}", path.display());

    // JPEG: passthrough
    if data[0] == 0xFF && data[1] == 0xD8 {
        let info = parse_jpeg_header(&data)
            .with_context(|| format!("Failed to parse JPEG header: {}", path.display()))?;
        anyhow::ensure!(
            matches!(info.components, 1 | 3 | 4),
            "Unsupported JPEG component count {} in {}",
            info.components,
            path.display()
        );
        // Adobe CMYK is stored inverted unless the transform flag says plain
        let invert_cmyk = info.components == 4 && info.adobe_transform != Some(0);
        return Ok(PreparedImage::Jpeg {
            width: info.width,
            height: info.height,
            components: info.components,
            invert_cmyk,
            data,
            dpi: info.dpi,
        });
    }

    decode_image(&data, path)
}

/// decode any other format via the image crate and deflate for embedding
fn decode_image(data: &[u8], path: &Path) -> Result<PreparedImage> {
    use image::GenericImageView;

    let img = image::load_from_memory(data)
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;
    let (width, height) = img.dimensions();
    let color = img.color();

    if color.has_alpha() {
        let rgba = img.into_rgba8();
        let pixel_count = (width as usize) * (height as usize);
        let mut rgb = Vec::with_capacity(pixel_count * 3);
        let mut alpha = Vec::with_capacity(pixel_count);
        for px in rgba.as_raw().chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }
        // fully opaque images don't need a mask
        let alpha = if alpha.iter().all(|&a| a == 255) {
            None
        } else {
            Some(deflate(&alpha)?)
        };
        return Ok(PreparedImage::Deflated {
            width,
            height,
            color_channels: 3,
            color: deflate(&rgb)?,
            alpha,
        });
    }

    if color.channel_count() == 1 {
        let gray = img.into_luma8();
        return Ok(PreparedImage::Deflated {
            width,
            height,
            color_channels: 1,
            color: deflate(gray.as_raw())?,
            alpha: None,
        });
    }

    let rgb = img.into_rgb8();
    Ok(PreparedImage::Deflated {
        width,
        height,
        color_channels: 3,
        color: deflate(rgb.as_raw())?,
        alpha: None,
    })
}

fn device_space(channels: u8) -> Object {
    match channels {
        1 => "DeviceGray".into(),
        4 => "DeviceCMYK".into(),
        _ => "DeviceRGB".into(),
    }
}

/// add the image XObject (and its soft mask) to the document
fn embed_image(doc: &mut Document, img: PreparedImage) -> ObjectId {
    match img {
        PreparedImage::Jpeg {
            width,
            height,
            components,
            invert_cmyk,
            data,
            ..
        } => {
            let mut dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => device_space(components),
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            };
            if invert_cmyk {
                dict.set(
                    "Decode",
                    [1, 0, 1, 0, 1, 0, 1, 0]
                        .into_iter()
                        .map(Object::Integer)
                        .collect::<Vec<_>>(),
                );
            }
            let mut stream = Stream::new(dict, data);
            stream.allows_compression = false;
            doc.add_object(stream)
        }
        PreparedImage::Deflated {
            width,
            height,
            color_channels,
            color,
            alpha,
        } => {
            let mut dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => device_space(color_channels),
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            };
            if let Some(alpha) = alpha {
                let mut smask = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => width as i64,
                        "Height" => height as i64,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                        "Filter" => "FlateDecode",
                    },
                    alpha,
                );
                smask.allows_compression = false;
                let smask_id = doc.add_object(smask);
                dict.set("SMask", smask_id);
            }
            let mut stream = Stream::new(dict, color);
            stream.allows_compression = false;
            doc.add_object(stream)
        }
    }
}

/// page size and image placement for one image, in points
pub fn place_image(
    pixel_width: u32,
    pixel_height: u32,
    dpi: u32,
    layout: &ImageLayout,
) -> Result<((f32, f32), PageFitRect)> {
    let img_w = pixel_width as f32 * 72.0 / dpi as f32;
    let img_h = pixel_height as f32 * 72.0 / dpi as f32;
    match layout.page_size {
        Some(ps) => {
            let (pw, ph) = ps.oriented(layout.orientation, img_w, img_h);
            let rect = compute_fit(img_w, img_h, pw, ph, layout.margin)?;
            Ok(((pw, ph), rect))
        }
        None => {
            anyhow::ensure!(layout.margin >= 0.0, "Margin must not be negative");
            let m = layout.margin;
            let rect = PageFitRect {
                x: m,
                y: m,
                width: img_w,
                height: img_h,
            };
            Ok(((img_w + 2.0 * m, img_h + 2.0 * m), rect))
        }
    }
}

/// one page per image, in the order given
pub fn images_to_pdf(images: &[PathBuf], layout: &ImageLayout, meta: &Metadata) -> Result<Vec<u8>> {
    anyhow::ensure!(!images.is_empty(), "No input images provided");
    if let Some(dpi) = layout.dpi {
        anyhow::ensure!(dpi > 0, "DPI must be positive");
    }

    // phase 1 - parallel image processing (file I/O + decode + compress)
    let prepared: Vec<Result<PreparedImage>> = images
        .par_iter()
        .map(|path| prepare_image(path))
        .collect();

    // phase 2 - sequential PDF assembly
    let mut builder = PageTreeBuilder::new();
    for (i, result) in prepared.into_iter().enumerate() {
        let img = result?;
        let path = &images[i];
        let (pixel_w, pixel_h) = img.pixel_size();
        let dpi = layout.dpi.or(img.dpi()).unwrap_or(DEFAULT_DPI);
        let ((page_w, page_h), rect) = place_image(pixel_w, pixel_h, dpi, layout)
            .with_context(|| format!("Cannot place {}", path.display()))?;

        let image_id = embed_image(&mut builder.doc, img);
        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        };
        builder.add_page(
            page_w,
            page_h,
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(rect.width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(rect.height),
                        Object::Real(rect.x),
                        Object::Real(rect.y),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
            resources.into(),
        )?;
        info!("  [{}/{}] {}", i + 1, images.len(), path.display());
    }

    builder.finish(meta)
}

pub fn images_file(images: &[PathBuf], layout: &ImageLayout, meta: &Metadata, output: &Path) -> Result<()> {
    info!("Converting {} image(s) -> {}", images.len(), output.display());
    let start = std::time::Instant::now();
    let bytes = images_to_pdf(images, layout, meta)?;
    pdf::write_output(&bytes, output)?;
    info!("Done. PDF saved in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
