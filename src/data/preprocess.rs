// Upload preprocessing: decode, grayscale, resize to model input

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;

use crate::models::IMAGE_DIM;

/// Decode arbitrary uploaded image bytes into a 28x28 grayscale image.
///
/// Decoding failures are the caller's signal for a client error; everything
/// after a successful decode is infallible resizing.
pub fn decode_image(bytes: &[u8]) -> Result<GrayImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let gray = decoded.to_luma8();
    Ok(image::imageops::resize(
        &gray,
        IMAGE_DIM as u32,
        IMAGE_DIM as u32,
        FilterType::Triangle,
    ))
}

/// Convert a 28x28 grayscale image into the model input tensor (1, 784),
/// pixel values scaled to [0, 1].
pub fn to_tensor(image: &GrayImage, device: &Device) -> Result<Tensor> {
    let pixels: Vec<f32> = image.as_raw().iter().map(|&p| f32::from(p) / 255.0).collect();
    Ok(Tensor::from_vec(pixels, (1, IMAGE_DIM * IMAGE_DIM), device)?)
}

/// Encode raw grayscale pixels as a PNG.
pub fn encode_png_gray(width: u32, height: u32, pixels: &[u8]) -> Result<Vec<u8>> {
    let img = GrayImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| anyhow!("Pixel buffer does not match {width}x{height}"))?;
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, y| image::Luma([((x + y) % 256) as u8]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_resizes_to_model_input() {
        let png = sample_png(100, 60);
        let gray = decode_image(&png).unwrap();
        assert_eq!(gray.dimensions(), (IMAGE_DIM as u32, IMAGE_DIM as u32));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn test_to_tensor_shape_and_range() {
        let png = sample_png(IMAGE_DIM as u32, IMAGE_DIM as u32);
        let gray = decode_image(&png).unwrap();
        let tensor = to_tensor(&gray, &Device::Cpu).unwrap();

        assert_eq!(tensor.dims(), &[1, IMAGE_DIM * IMAGE_DIM]);
        let values = tensor.squeeze(0).unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_encode_png_round_trip() {
        let pixels: Vec<u8> = (0..(IMAGE_DIM * IMAGE_DIM)).map(|i| (i % 256) as u8).collect();
        let png = encode_png_gray(IMAGE_DIM as u32, IMAGE_DIM as u32, &pixels).unwrap();

        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.as_raw().as_slice(), pixels.as_slice());
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        assert!(encode_png_gray(28, 28, &[0u8; 10]).is_err());
    }
}
