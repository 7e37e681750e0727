use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
pub const MIN_FILE_BYTES: u64 = 1_000;
pub const MAX_FILE_BYTES: u64 = 50_000_000;
pub const MIN_PIXEL_DIMENSION: u32 = 100;
const JPEG_QUALITY: u8 = 95;

/// Pixel-level capability of the runtime, fixed at startup. The preparer
/// never branches on codec presence mid-call; a disabled codec simply turns
/// deep inspection and resizing off.
pub trait ImageCodec: Send + Sync {
    fn enabled(&self) -> bool;
    /// Pixel dimensions, or `None` when the file cannot be parsed as an image.
    fn inspect(&self, path: &Path) -> Option<(u32, u32)>;
    fn resample(&self, source: &Path, target: &Path, width: u32, height: u32) -> Result<()>;
}

/// Full-featured codec backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn enabled(&self) -> bool {
        true
    }

    fn inspect(&self, path: &Path) -> Option<(u32, u32)> {
        image::image_dimensions(path).ok()
    }

    fn resample(&self, source: &Path, target: &Path, width: u32, height: u32) -> Result<()> {
        let decoded = image::open(source)
            .with_context(|| format!("failed to decode {}", source.display()))?;
        let resized = decoded.resize_exact(width, height, FilterType::Lanczos3);

        let extension = lowercase_extension(target);
        if matches!(extension.as_str(), "jpg" | "jpeg") {
            // JPEG carries no alpha channel; flatten onto white first.
            let flattened = flatten_alpha(&resized);
            let mut out = fs::File::create(target)
                .with_context(|| format!("failed to create {}", target.display()))?;
            let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(flattened))
                .with_context(|| format!("failed to encode {}", target.display()))?;
        } else {
            resized
                .save(target)
                .with_context(|| format!("failed to save {}", target.display()))?;
        }
        Ok(())
    }
}

/// Degraded codec for runtimes without image support: no inspection, no
/// resizing. The preparer falls back to shipping originals untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl ImageCodec for PassthroughCodec {
    fn enabled(&self) -> bool {
        false
    }

    fn inspect(&self, _path: &Path) -> Option<(u32, u32)> {
        None
    }

    fn resample(&self, source: &Path, _target: &Path, _width: u32, _height: u32) -> Result<()> {
        anyhow::bail!("image codec unavailable for {}", source.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCheck {
    pub ok: bool,
    pub message: String,
}

impl ImageCheck {
    fn pass() -> Self {
        Self {
            ok: true,
            message: "Image is valid".to_string(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Result of preparing an image for transmission. `path` is either the
/// original file or a freshly written `processed_` derivative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub path: PathBuf,
    pub source_dimensions: Option<(u32, u32)>,
    pub output_dimensions: Option<(u32, u32)>,
    pub resized: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub dimensions: Option<(u32, u32)>,
}

/// Validates snapshot images and downsamples oversized ones into the
/// resolution band the vision model handles best.
pub struct ImagePreparer {
    codec: Box<dyn ImageCodec>,
}

impl ImagePreparer {
    pub fn new(codec: Box<dyn ImageCodec>) -> Self {
        Self { codec }
    }

    pub fn with_raster_codec() -> Self {
        Self::new(Box::new(RasterCodec))
    }

    /// Check that a file is present, a supported format, inside the size
    /// band, and (when the codec allows) a parseable image of usable
    /// dimensions. Total over its input domain.
    pub fn validate(&self, path: &Path) -> ImageCheck {
        if !path.exists() {
            return ImageCheck::fail(format!("Image not found: {}", path.display()));
        }
        if !path.is_file() {
            return ImageCheck::fail(format!("Not a file: {}", path.display()));
        }

        let extension = lowercase_extension(path);
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return ImageCheck::fail(format!("Unsupported format: .{extension}"));
        }

        let size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        if size < MIN_FILE_BYTES {
            return ImageCheck::fail("Image file too small, might be corrupted");
        }
        if size > MAX_FILE_BYTES {
            return ImageCheck::fail("Image file too large for processing");
        }

        if self.codec.enabled() {
            match self.codec.inspect(path) {
                Some((width, height)) => {
                    if width < MIN_PIXEL_DIMENSION || height < MIN_PIXEL_DIMENSION {
                        return ImageCheck::fail("Image dimensions too small");
                    }
                }
                None => return ImageCheck::fail("Invalid image file"),
            }
        }

        ImageCheck::pass()
    }

    /// Validate and, when the longer side exceeds `max_dimension`, write an
    /// aspect-preserving `processed_` derivative next to the source. Images
    /// already inside the envelope are returned untouched, so no redundant
    /// file is written.
    pub fn prepare_for_model(
        &self,
        path: &Path,
        max_dimension: u32,
    ) -> Result<PreparedImage, String> {
        let check = self.validate(path);
        if !check.ok {
            return Err(check.message);
        }

        if !self.codec.enabled() {
            return Ok(PreparedImage {
                path: path.to_path_buf(),
                source_dimensions: None,
                output_dimensions: None,
                resized: false,
                message: "Image codec unavailable, using original image".to_string(),
            });
        }

        let Some((width, height)) = self.codec.inspect(path) else {
            return Err("Invalid image file".to_string());
        };

        if width <= max_dimension && height <= max_dimension {
            return Ok(PreparedImage {
                path: path.to_path_buf(),
                source_dimensions: Some((width, height)),
                output_dimensions: Some((width, height)),
                resized: false,
                message: "Image already optimal size".to_string(),
            });
        }

        let (new_width, new_height) = scaled_dimensions(width, height, max_dimension);
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("snapshot.png");
        let target = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("processed_{filename}"));

        self.codec
            .resample(path, &target, new_width, new_height)
            .map_err(|err| format!("Processing failed: {err:#}"))?;

        Ok(PreparedImage {
            path: target,
            source_dimensions: Some((width, height)),
            output_dimensions: Some((new_width, new_height)),
            resized: true,
            message: format!("Resized from {width}x{height} to {new_width}x{new_height}"),
        })
    }

    /// Most recently modified supported image in `directory`, non-recursive.
    /// Equal mtimes fall back to filename order so the result is stable.
    pub fn find_latest(&self, directory: &Path) -> Option<PathBuf> {
        self.list_snapshots(directory)
            .into_iter()
            .next()
            .map(|(path, _)| path)
    }

    /// Supported images in `directory` with their mtimes, newest first.
    pub fn list_snapshots(&self, directory: &Path) -> Vec<(PathBuf, SystemTime)> {
        let Ok(entries) = fs::read_dir(directory) else {
            return Vec::new();
        };

        let mut snapshots: Vec<(PathBuf, SystemTime)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if !path.is_file() {
                    return None;
                }
                let extension = lowercase_extension(&path);
                if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
                    return None;
                }
                let modified = entry.metadata().and_then(|meta| meta.modified()).ok()?;
                Some((path, modified))
            })
            .collect();

        snapshots.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        snapshots
    }

    pub fn image_info(&self, path: &Path) -> Option<ImageInfo> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(ImageInfo {
            path: path.to_path_buf(),
            filename: path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string(),
            size_bytes: meta.len(),
            dimensions: self.codec.inspect(path),
        })
    }
}

fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width > height {
        let scaled = (f64::from(height) * (f64::from(max_dimension) / f64::from(width))) as u32;
        (max_dimension, scaled.max(1))
    } else {
        let scaled = (f64::from(width) * (f64::from(max_dimension) / f64::from(height))) as u32;
        (scaled.max(1), max_dimension)
    }
}

fn flatten_alpha(image: &DynamicImage) -> image::RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = image::RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    flattened
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    use super::{
        scaled_dimensions, ImageCodec, ImagePreparer, PassthroughCodec, RasterCodec,
        MIN_FILE_BYTES,
    };

    // Incompressible pixel noise so even small test images clear the minimum
    // file size.
    fn write_noisy_png(path: &Path, width: u32, height: u32) {
        let mut seed: u32 = 0x2545_f491;
        let mut noise = || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 24) as u8
        };
        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([noise(), noise(), noise()]);
        }
        img.save(path).expect("write png fixture");
    }

    #[test]
    fn validate_accepts_a_healthy_snapshot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("snapshot.png");
        write_noisy_png(&path, 800, 600);

        let preparer = ImagePreparer::with_raster_codec();
        let check = preparer.validate(&path);
        assert!(check.ok, "unexpected rejection: {}", check.message);
        assert_eq!(check.message, "Image is valid");
        Ok(())
    }

    #[test]
    fn validate_rejects_missing_unsupported_and_undersized_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let preparer = ImagePreparer::with_raster_codec();

        let missing = temp.path().join("nope.png");
        assert!(!preparer.validate(&missing).ok);

        let wrong_ext = temp.path().join("snapshot.gif");
        fs::write(&wrong_ext, vec![0u8; 2_000])?;
        let check = preparer.validate(&wrong_ext);
        assert!(!check.ok);
        assert_eq!(check.message, "Unsupported format: .gif");

        let tiny = temp.path().join("tiny.png");
        fs::write(&tiny, b"x")?;
        let check = preparer.validate(&tiny);
        assert!(!check.ok);
        assert!(check.message.contains("too small"));
        assert!(fs::metadata(&tiny)?.len() < MIN_FILE_BYTES);
        Ok(())
    }

    #[test]
    fn validate_rejects_corrupt_bytes_and_small_dimensions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let preparer = ImagePreparer::with_raster_codec();

        let corrupt = temp.path().join("corrupt.png");
        fs::write(&corrupt, vec![7u8; 5_000])?;
        let check = preparer.validate(&corrupt);
        assert!(!check.ok);
        assert_eq!(check.message, "Invalid image file");

        let narrow = temp.path().join("narrow.png");
        write_noisy_png(&narrow, 80, 400);
        let check = preparer.validate(&narrow);
        assert!(!check.ok);
        assert_eq!(check.message, "Image dimensions too small");
        Ok(())
    }

    #[test]
    fn prepare_keeps_images_inside_the_envelope_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("snapshot.png");
        write_noisy_png(&path, 800, 600);

        let preparer = ImagePreparer::with_raster_codec();
        let prepared = preparer
            .prepare_for_model(&path, 1024)
            .expect("prepare should succeed");

        assert_eq!(prepared.path, path);
        assert!(!prepared.resized);
        assert_eq!(prepared.message, "Image already optimal size");
        assert!(!temp.path().join("processed_snapshot.png").exists());
        Ok(())
    }

    #[test]
    fn prepare_downsamples_oversized_images_preserving_aspect() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wide.png");
        write_noisy_png(&path, 1600, 900);

        let preparer = ImagePreparer::with_raster_codec();
        let prepared = preparer
            .prepare_for_model(&path, 1024)
            .expect("prepare should succeed");

        assert!(prepared.resized);
        assert_eq!(prepared.source_dimensions, Some((1600, 900)));
        let (width, height) = prepared.output_dimensions.expect("output dimensions");
        assert_eq!(width, 1024);
        // Aspect ratio held to within a pixel of the exact scale.
        let expected = f64::from(900) * (1024.0 / 1600.0);
        assert!((f64::from(height) - expected).abs() <= 1.0);

        assert!(prepared
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .starts_with("processed_"));
        let on_disk = image::image_dimensions(&prepared.path)?;
        assert_eq!(on_disk, (width, height));
        // The original stays behind untouched.
        assert_eq!(image::image_dimensions(&path)?, (1600, 900));
        Ok(())
    }

    #[test]
    fn prepare_handles_tall_images_too() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("tall.png");
        write_noisy_png(&path, 500, 2000);

        let preparer = ImagePreparer::with_raster_codec();
        let prepared = preparer
            .prepare_for_model(&path, 1024)
            .expect("prepare should succeed");
        assert_eq!(prepared.output_dimensions, Some((256, 1024)));
        Ok(())
    }

    #[test]
    fn prepare_propagates_validation_failures() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("tiny.png");
        fs::write(&path, b"too small")?;

        let preparer = ImagePreparer::with_raster_codec();
        let err = preparer
            .prepare_for_model(&path, 1024)
            .expect_err("undersized file must be rejected");
        assert!(err.contains("too small"));
        Ok(())
    }

    #[test]
    fn passthrough_codec_ships_the_original() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("snapshot.png");
        // Not a real image; the passthrough codec never looks inside.
        fs::write(&path, vec![1u8; 4_096])?;

        let preparer = ImagePreparer::new(Box::new(PassthroughCodec));
        assert!(preparer.validate(&path).ok);

        let prepared = preparer
            .prepare_for_model(&path, 1024)
            .expect("degraded prepare should succeed");
        assert_eq!(prepared.path, path);
        assert!(!prepared.resized);
        assert!(prepared.message.contains("using original image"));
        Ok(())
    }

    #[test]
    fn jpeg_resample_flattens_alpha() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("overlay.png");
        let mut img = RgbaImage::new(1200, 600);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([200, 40, 40, 128]);
        }
        img.save(&source)?;

        let target = temp.path().join("processed_overlay.jpg");
        RasterCodec.resample(&source, &target, 600, 300)?;
        assert_eq!(image::image_dimensions(&target)?, (600, 300));
        Ok(())
    }

    #[test]
    fn find_latest_prefers_newest_mtime_then_filename() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let older = temp.path().join("a_old.png");
        let newer = temp.path().join("b_new.png");
        write_noisy_png(&older, 120, 120);
        write_noisy_png(&newer, 120, 120);
        fs::write(temp.path().join("notes.txt"), b"ignored")?;

        let past = SystemTime::now() - Duration::from_secs(600);
        fs::OpenOptions::new()
            .append(true)
            .open(&older)?
            .set_modified(past)?;

        let preparer = ImagePreparer::with_raster_codec();
        assert_eq!(preparer.find_latest(temp.path()), Some(newer.clone()));

        // Equal mtimes: filename order decides, descending.
        fs::OpenOptions::new()
            .append(true)
            .open(&older)?
            .set_modified(fs::metadata(&newer)?.modified()?)?;
        assert_eq!(preparer.find_latest(temp.path()), Some(newer));

        assert_eq!(preparer.find_latest(&temp.path().join("missing")), None);
        Ok(())
    }

    #[test]
    fn image_info_reports_dimensions_and_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("snapshot.png");
        write_noisy_png(&path, 320, 240);

        let preparer = ImagePreparer::with_raster_codec();
        let info = preparer.image_info(&path).expect("info should load");
        assert_eq!(info.dimensions, Some((320, 240)));
        assert_eq!(info.filename, "snapshot.png");
        assert!(info.size_bytes >= MIN_FILE_BYTES);
        Ok(())
    }

    #[test]
    fn scaled_dimensions_pin_the_long_side() {
        assert_eq!(scaled_dimensions(2048, 1024, 1024), (1024, 512));
        assert_eq!(scaled_dimensions(1024, 2048, 1024), (512, 1024));
        assert_eq!(scaled_dimensions(3000, 10, 1024), (1024, 3));
    }
}
