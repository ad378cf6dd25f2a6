use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;

use crate::ProviderError;

const JPEG_QUALITY: u8 = 85;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpImageFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Image(format!("{} returned no data", url)));
        }
        Ok(bytes.to_vec())
    }
}

/// Scales the image to fit within `width` x `height`, keeping its aspect
/// ratio and its format. Images that already fit are returned as they are.
pub fn resize(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ProviderError> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    if img.width() <= width && img.height() <= height {
        return Ok(bytes.to_vec());
    }
    let resized = img.resize(width, height, FilterType::Lanczos3);
    if format == ImageFormat::Jpeg {
        return encode_jpeg(&resized);
    }
    let mut out = Vec::new();
    match resized.write_to(&mut Cursor::new(&mut out), format) {
        Ok(()) => Ok(out),
        Err(_) => encode_jpeg(&resized),
    }
}

/// Re-encodes any decodable image as JPEG.
pub fn convert_to_standard_format(bytes: &[u8]) -> Result<Vec<u8>, ProviderError> {
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg)) {
        return Ok(bytes.to_vec());
    }
    let img = image::load_from_memory(bytes)?;
    encode_jpeg(&img)
}

/// Thumbnail bytes as stored on artists and releases.
pub fn prepare_thumbnail(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ProviderError> {
    convert_to_standard_format(&resize(bytes, width, height)?)
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ProviderError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    encoder.encode_image(&img.to_rgb8())?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::{convert_to_standard_format, prepare_thumbnail, resize};

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn resize_keeps_aspect_ratio_and_format() {
        let out = resize(&png(40, 20), 10, 10).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 5));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let original = png(8, 8);
        assert_eq!(resize(&original, 80, 80).unwrap(), original);
    }

    #[test]
    fn converts_png_to_jpeg() {
        let out = convert_to_standard_format(&png(4, 4)).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert!(convert_to_standard_format(b"not an image").is_err());
    }

    #[test]
    fn thumbnails_are_small_jpegs() {
        let out = prepare_thumbnail(&png(300, 150), 60, 60).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (60, 30));
    }
}
