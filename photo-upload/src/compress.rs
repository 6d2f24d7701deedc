use crate::models::{CompressionConfig, PhotoFile};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;

/// Lowest JPEG quality tried while shrinking towards the size bound
const MIN_QUALITY: u8 = 40;
const QUALITY_STEP: u8 = 10;

/// Error type for compression
#[derive(Debug)]
pub enum CompressError {
    Decode(String),
    Encode(String),
    Task(String),
}

impl std::fmt::Display for CompressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressError::Decode(msg) => write!(f, "Image decode error: {}", msg),
            CompressError::Encode(msg) => write!(f, "Image encode error: {}", msg),
            CompressError::Task(msg) => write!(f, "Compression task error: {}", msg),
        }
    }
}

impl std::error::Error for CompressError {}

/// Scale dimensions down to fit `max_width` x `max_height`, keeping the aspect ratio.
/// Images already inside the bounds are left alone.
pub fn calculate_resize_dimensions(
    original_width: u32,
    original_height: u32,
    max_width: u32,
    max_height: u32,
) -> (u32, u32) {
    let ratio =
        (original_width as f32 / max_width as f32).max(original_height as f32 / max_height as f32);

    if ratio > 1.0 {
        let new_width = ((original_width as f32 / ratio) as u32).max(1);
        let new_height = ((original_height as f32 / ratio) as u32).max(1);
        (new_width, new_height)
    } else {
        (original_width, original_height)
    }
}

/// Compresses a photo: downscale to `max_dimension`, re-encode as JPEG and
/// lower the quality until the result fits `max_size_bytes` (or the quality floor is hit).
///
/// Files already inside both bounds are returned untouched, and so is the
/// original when re-encoding would make it bigger.
pub fn compress_photo_blocking(
    file: &PhotoFile,
    config: &CompressionConfig,
) -> Result<PhotoFile, CompressError> {
    let img = image::load_from_memory(&file.data)
        .map_err(|e| CompressError::Decode(format!("Failed to load image: {}", e)))?;

    let (width, height) = img.dimensions();
    let (target_w, target_h) = calculate_resize_dimensions(
        width,
        height,
        config.max_dimension,
        config.max_dimension,
    );

    if (target_w, target_h) == (width, height) && file.len() <= config.max_size_bytes {
        log::debug!("{} already within bounds ({}x{}, {} bytes)", file.name, width, height, file.len());
        return Ok(file.clone());
    }

    let resized = if (target_w, target_h) != (width, height) {
        img.resize_exact(target_w, target_h, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = resized.to_rgb8();

    let mut quality = config.quality.clamp(1, 100);
    let mut encoded = encode_jpeg(&rgb, quality)?;
    while encoded.len() > config.max_size_bytes && quality > MIN_QUALITY {
        quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
        encoded = encode_jpeg(&rgb, quality)?;
    }

    log::debug!(
        "Compressed {}: {}x{} -> {}x{}, {} -> {} bytes (quality {})",
        file.name,
        width,
        height,
        target_w,
        target_h,
        file.len(),
        encoded.len(),
        quality
    );

    if encoded.len() >= file.len() && (target_w, target_h) == (width, height) {
        return Ok(file.clone());
    }

    Ok(PhotoFile::new(jpeg_name(&file.name), "image/jpeg", encoded))
}

/// Runs [`compress_photo_blocking`] on the blocking pool so the caller is never stalled
pub async fn compress_photo(
    file: PhotoFile,
    config: CompressionConfig,
) -> Result<PhotoFile, CompressError> {
    tokio::task::spawn_blocking(move || compress_photo_blocking(&file, &config))
        .await
        .map_err(|e| CompressError::Task(format!("Task join error: {}", e)))?
}

fn encode_jpeg(rgb: &image::RgbImage, quality: u8) -> Result<Vec<u8>, CompressError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode_image(rgb)
        .map_err(|e| CompressError::Encode(format!("Failed to write JPEG: {}", e)))?;
    Ok(buffer)
}

fn jpeg_name(name: &str) -> String {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    format!("{}.jpg", stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        });
        encode_jpeg(&img, 95).unwrap()
    }

    #[test]
    fn test_resize_dimensions() {
        let (w, h) = calculate_resize_dimensions(4000, 3000, 1920, 1920);
        assert_eq!(w, 1920);
        assert_eq!(h, 1440);

        let (w, h) = calculate_resize_dimensions(800, 600, 1920, 1920);
        assert_eq!((w, h), (800, 600));
    }

    #[test]
    fn test_large_photo_is_downscaled() {
        let file = PhotoFile::new("big.jpg", "image/jpeg", noisy_jpeg(2400, 1200));
        let config = CompressionConfig {
            max_dimension: 1200,
            ..Default::default()
        };

        let out = compress_photo_blocking(&file, &config).unwrap();
        let img = image::load_from_memory(&out.data).unwrap();
        assert_eq!(img.dimensions(), (1200, 600));
        assert_eq!(out.mime, "image/jpeg");
    }

    #[test]
    fn test_small_photo_is_untouched() {
        let data = noisy_jpeg(64, 48);
        let file = PhotoFile::new("small.jpg", "image/jpeg", data.clone());

        let out = compress_photo_blocking(&file, &CompressionConfig::default()).unwrap();
        assert_eq!(out.data.as_ref(), data.as_slice());
        assert_eq!(out.name, "small.jpg");
    }

    #[test]
    fn test_png_is_renamed_to_jpg() {
        let img = image::RgbImage::from_pixel(3000, 10, image::Rgb([10, 200, 30]));
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        let file = PhotoFile::new("scan.png", "image/png", png.into_inner());

        let out = compress_photo_blocking(&file, &CompressionConfig::default()).unwrap();
        assert_eq!(out.name, "scan.jpg");
        assert_eq!(out.mime, "image/jpeg");
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let file = PhotoFile::new("broken.jpg", "image/jpeg", vec![0u8, 1, 2, 3]);
        let err = compress_photo_blocking(&file, &CompressionConfig::default()).unwrap_err();
        assert!(matches!(err, CompressError::Decode(_)));
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let file = PhotoFile::new("big.jpg", "image/jpeg", noisy_jpeg(500, 100));
        let config = CompressionConfig {
            max_dimension: 250,
            ..Default::default()
        };
        let out = compress_photo(file, config).await.unwrap();
        let img = image::load_from_memory(&out.data).unwrap();
        assert_eq!(img.dimensions(), (250, 50));
    }
}
