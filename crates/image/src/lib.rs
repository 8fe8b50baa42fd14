//! Frame decoding, encoding and colour conversion for the video upscaler.
//!
//! Decoded frames are packed 8-bit `Image`s, either `Rgb8` or `Luma8`.
//! Anything else the `image` crate can read is converted to one of the two.

pub mod error;
pub mod image;
pub mod pixelformat;
pub mod ycbcr;

pub use error::ImageError;
pub use image::Image;
pub use pixelformat::PixelFormat;
pub use ycbcr::{YCbCrPlanes, plane_to_u8, rgb_to_ycbcr, u8_to_plane, ycbcr_to_rgb};

use {
    base::Vec2,
    crates_image::{DynamicImage, ExtendedColorType, ImageEncoder},
};

fn decode_image_inner(data: &[u8]) -> Result<Image, ImageError> {
    let img = crates_image::load_from_memory(data)?;

    match img {
        DynamicImage::ImageLuma8(buf) => {
            let (w, h) = buf.dimensions();
            Ok(Image::new(size_of(w, h), buf.into_raw(), PixelFormat::Luma8))
        }
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            let buf = img.to_luma8();
            let (w, h) = buf.dimensions();
            Ok(Image::new(size_of(w, h), buf.into_raw(), PixelFormat::Luma8))
        }
        DynamicImage::ImageRgb8(buf) => {
            let (w, h) = buf.dimensions();
            Ok(Image::new(size_of(w, h), buf.into_raw(), PixelFormat::Rgb8))
        }
        _ => {
            // alpha and high bit depth are dropped
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            Ok(Image::new(size_of(w, h), rgb.into_raw(), PixelFormat::Rgb8))
        }
    }
}

fn size_of(width: u32, height: u32) -> Vec2<usize> {
    Vec2::new(width as usize, height as usize)
}

fn color_type(format: PixelFormat) -> ExtendedColorType {
    match format {
        PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
        PixelFormat::Luma8 => ExtendedColorType::L8,
    }
}

fn check_len(image: &Image) -> Result<(), ImageError> {
    let expected = image.size.area() * image.channels();
    if image.data.len() != expected {
        return Err(ImageError::Size(format!(
            "image of {} needs {} bytes, got {}",
            image.size,
            expected,
            image.data.len()
        )));
    }
    Ok(())
}

fn encode_png_inner(image: &Image) -> Result<Vec<u8>, ImageError> {
    check_len(image)?;
    let mut buffer = Vec::new();
    crates_image::codecs::png::PngEncoder::new(&mut buffer)
        .write_image(
            &image.data,
            image.width() as u32,
            image.height() as u32,
            color_type(image.format),
        )
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer)
}

fn encode_jpeg_inner(image: &Image, quality: u8) -> Result<Vec<u8>, ImageError> {
    check_len(image)?;
    let mut buffer = Vec::new();
    crates_image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(
            &image.data,
            image.width() as u32,
            image.height() as u32,
            color_type(image.format),
        )
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Decodes an image file held in memory.
///
/// The container format is auto-detected. Grayscale sources become `Luma8`,
/// everything else `Rgb8`.
///
/// The CPU-bound decoding work runs on tokio's blocking thread pool.
pub async fn decode_image(data: &[u8]) -> Result<Image, ImageError> {
    let owned = data.to_vec();
    tokio::task::spawn_blocking(move || decode_image_inner(&owned))
        .await
        .map_err(|e| ImageError::Decode(e.to_string()))?
}

/// Encodes an `Image` as PNG bytes on tokio's blocking thread pool.
pub async fn encode_png(image: Image) -> Result<Vec<u8>, ImageError> {
    tokio::task::spawn_blocking(move || encode_png_inner(&image))
        .await
        .map_err(|e| ImageError::Encode(e.to_string()))?
}

/// Encodes an `Image` as JPEG bytes.
///
/// `quality` ranges 1-100, higher is better.
pub async fn encode_jpeg(image: Image, quality: u8) -> Result<Vec<u8>, ImageError> {
    tokio::task::spawn_blocking(move || encode_jpeg_inner(&image, quality))
        .await
        .map_err(|e| ImageError::Encode(e.to_string()))?
}
