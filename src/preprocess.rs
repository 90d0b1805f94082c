//! Turning files on disk into staged work items.
//!
//! Raster images are downscaled twice: a thumbnail for listings and a larger
//! payload for the model. PNG stays PNG so transparency survives; everything
//! else is flattened onto white and re-encoded as JPEG. SVG is rendered at
//! its intrinsic size onto white and then treated like any other raster.
//! Vector documents (EPS/AI/PDF) are sent as a small blank placeholder.
//! Video needs a frame decoder and is rejected.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};
use resvg::tiny_skia::{Color, Pixmap, Transform};
use resvg::usvg;

use crate::error::{GenerationError, Result};
use crate::store::StagingArea;
use crate::types::{EncodedPayload, WorkItem, WorkItemStatus};

pub const THUMBNAIL_WIDTH: u32 = 300;
pub const PAYLOAD_WIDTH: u32 = 800;
const JPEG_QUALITY: u8 = 70;
const PLACEHOLDER_SIZE: u32 = 100;
const PLACEHOLDER_QUALITY: u8 = 50;

/// Source kinds recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Jpeg,
    Png,
    Gif,
    /// EPS, AI or PDF.
    Vector,
    Svg,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "png" => Some(MediaKind::Png),
            "gif" => Some(MediaKind::Gif),
            "eps" | "ai" | "ps" | "pdf" => Some(MediaKind::Vector),
            "svg" => Some(MediaKind::Svg),
            "mp4" | "mov" | "webm" | "avi" | "mkv" | "m4v" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Preview and model payload for one file.
#[derive(Debug, Clone)]
pub struct PreparedMedia {
    pub thumbnail: EncodedPayload,
    pub payload: EncodedPayload,
}

/// Read and encode `path`.
pub fn prepare_file(path: &Path) -> Result<PreparedMedia> {
    let kind = MediaKind::from_path(path)
        .ok_or_else(|| GenerationError::UnsupportedMedia(path.display().to_string()))?;

    match kind {
        MediaKind::Jpeg | MediaKind::Png | MediaKind::Gif => {
            let bytes = std::fs::read(path)?;
            prepare_image(&bytes, kind == MediaKind::Png)
        }
        MediaKind::Vector => {
            let placeholder = placeholder()?;
            Ok(PreparedMedia {
                thumbnail: placeholder.clone(),
                payload: placeholder,
            })
        }
        MediaKind::Svg => {
            let bytes = std::fs::read(path)?;
            prepare_svg(&bytes)
        }
        MediaKind::Video => Err(GenerationError::UnsupportedMedia(format!(
            "{} (video frames cannot be extracted)",
            path.display()
        ))),
    }
}

/// Encode raw image bytes at thumbnail and payload sizes.
pub fn prepare_image(bytes: &[u8], keep_png: bool) -> Result<PreparedMedia> {
    let img = image::load_from_memory(bytes)?;
    Ok(PreparedMedia {
        thumbnail: encode(&fit_width(&img, THUMBNAIL_WIDTH), keep_png)?,
        payload: encode(&fit_width(&img, PAYLOAD_WIDTH), keep_png)?,
    })
}

/// Render an SVG document onto white and encode it as JPEG.
pub fn prepare_svg(bytes: &[u8]) -> Result<PreparedMedia> {
    let img = rasterize_svg(bytes)?;
    Ok(PreparedMedia {
        thumbnail: encode(&fit_width(&img, THUMBNAIL_WIDTH), false)?,
        payload: encode(&fit_width(&img, PAYLOAD_WIDTH), false)?,
    })
}

fn rasterize_svg(bytes: &[u8]) -> Result<DynamicImage> {
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())?;
    let size = tree.size().to_int_size();
    let mut pixmap = Pixmap::new(size.width(), size.height()).ok_or_else(|| {
        GenerationError::UnsupportedMedia(format!(
            "SVG has no drawable area ({}x{})",
            size.width(),
            size.height()
        ))
    })?;
    // opaque background, so the premultiplied buffer is plain RGBA
    pixmap.fill(Color::WHITE);
    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

    let (width, height) = (pixmap.width(), pixmap.height());
    RgbaImage::from_raw(width, height, pixmap.take())
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| GenerationError::Other("SVG pixel buffer size mismatch".to_string()))
}

fn fit_width(img: &DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img.clone();
    }
    let height = ((max_width as f64 / img.width() as f64) * img.height() as f64).round() as u32;
    img.resize_exact(max_width, height.max(1), FilterType::Triangle)
}

fn encode(img: &DynamicImage, keep_png: bool) -> Result<EncodedPayload> {
    let mut buf = Vec::new();
    if keep_png {
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        return Ok(EncodedPayload::new(STANDARD.encode(&buf), "image/png"));
    }
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(&flatten_on_white(img))?;
    Ok(EncodedPayload::new(STANDARD.encode(&buf), "image/jpeg"))
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn placeholder() -> Result<EncodedPayload> {
    let canvas = RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, Rgb([255, 255, 255]));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, PLACEHOLDER_QUALITY).encode_image(&canvas)?;
    Ok(EncodedPayload::new(STANDARD.encode(&buf), "image/jpeg"))
}

/// Stage every file in `paths` and preprocess it.
///
/// Files already staged (same name, size and modification time) are
/// skipped. A file that cannot be prepared stays staged with an `Error`
/// status. Returns the ids of newly staged items.
pub async fn stage_files(staging: &StagingArea, paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut staged = Vec::new();

    for path in paths {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let meta = tokio::fs::metadata(path).await?;
        let mut item = WorkItem::new(filename.clone());
        item.size = meta.len();
        item.modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        let id = item.id.clone();

        if !staging.add(item)? {
            tracing::debug!(file = %filename, "Already staged, skipping");
            continue;
        }

        let source = path.clone();
        let prepared = tokio::task::spawn_blocking(move || prepare_file(&source))
            .await
            .map_err(|e| GenerationError::Other(format!("preprocessing task failed: {}", e)))?;

        match prepared {
            Ok(media) => {
                staging.mark_ready(&id, media.thumbnail, media.payload)?;
                tracing::debug!(file = %filename, "File ready");
            }
            Err(e) => {
                tracing::warn!(file = %filename, error = %e, "Could not prepare file");
                staging.set_status(&id, WorkItemStatus::Error, Some(e.to_string()))?;
            }
        }
        staged.push(id);
    }

    Ok(staged)
}
