use image::{DynamicImage, GrayImage, ImageBuffer, ImageReader, Luma};
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("Failed to read image file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image is {width}x{height}; at most {max_pixels} pixels are accepted")]
    TooLarge { width: u32, height: u32, max_pixels: u64 },
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessOptions {
    /// Longest side allowed before downscaling (Tesseract works best at ~300 DPI / ~2000 px).
    pub max_dimension: u32,
    /// Median filter radius applied after binarization; 0 disables denoising.
    pub denoise_radius: u32,
    /// Largest decoded area accepted, checked from the header before decoding.
    pub max_pixels: u64,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self { max_dimension: 2800, denoise_radius: 1, max_pixels: 50_000_000 }
    }
}

/// Load an image file, clean it up, and return PNG bytes ready for OCR.
pub fn prepare_for_ocr(path: &Path, options: &PreprocessOptions) -> Result<Vec<u8>, PreprocessError> {
    let data = std::fs::read(path)?;
    prepare_for_ocr_from_bytes(&data, options)
}

/// Process raw image bytes (JPEG / PNG / WEBP / …) and return cleaned PNG bytes.
pub fn prepare_for_ocr_from_bytes(
    data: &[u8],
    options: &PreprocessOptions,
) -> Result<Vec<u8>, PreprocessError> {
    let img = decode(data, options)?;
    encode_as_png(&prepare(img, options))
}

/// Decode, refusing images whose header declares more than
/// `options.max_pixels` pixels. Small files can declare huge canvases.
pub fn decode(data: &[u8], options: &PreprocessOptions) -> Result<DynamicImage, PreprocessError> {
    let (width, height) = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()?;
    if u64::from(width) * u64::from(height) > options.max_pixels {
        return Err(PreprocessError::TooLarge { width, height, max_pixels: options.max_pixels });
    }
    Ok(ImageReader::new(Cursor::new(data)).with_guessed_format()?.decode()?)
}

/// Downscale → grayscale → Otsu binarize → median denoise.
/// The output is single-channel and every pixel is either 0 or 255.
pub fn prepare(img: DynamicImage, options: &PreprocessOptions) -> GrayImage {
    let start = Instant::now();
    let (orig_w, orig_h) = (img.width(), img.height());

    let img = if img.width() > options.max_dimension || img.height() > options.max_dimension {
        img.resize(
            options.max_dimension,
            options.max_dimension,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    let gray = to_grayscale(&img);
    let (binary, level) = binarize(&gray);
    let cleaned = denoise(&binary, options.denoise_radius);

    tracing::debug!(
        original = %format!("{orig_w}x{orig_h}"),
        processed = %format!("{}x{}", cleaned.width(), cleaned.height()),
        otsu_level = level,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "receipt image preprocessed"
    );

    cleaned
}

/// Single-channel luminance. Already-gray input is copied through unchanged.
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

/// Global binarization at the Otsu level. Pixels strictly above the level
/// become white (255), the rest black (0). Returns the level used.
pub fn binarize(gray: &GrayImage) -> (GrayImage, u8) {
    let level = imageproc::contrast::otsu_level(gray);
    let binary = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level { Luma([255u8]) } else { Luma([0u8]) }
    });
    (binary, level)
}

/// Median filter to drop speckle noise left by binarization. A median over
/// {0, 255} values is itself 0 or 255, so binary input stays binary.
pub fn denoise(binary: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return binary.clone();
    }
    imageproc::filter::median_filter(binary, radius, radius)
}

pub fn is_binary(img: &GrayImage) -> bool {
    img.pixels().all(|p| p[0] == 0 || p[0] == 255)
}

fn encode_as_png(img: &GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
