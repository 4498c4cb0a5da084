//! # 编码模块
//!
//! 画布 → JPEG 字节 → Base64 文本（不带 Data URL 前缀）。JPEG 无 alpha 通道，
//! 编码前转为 RGB；画布本身不受影响。

use base64::{Engine as _, engine::general_purpose};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;

use super::source::CanonicalCanvas;
use super::{DescribeError, DescribeHandler};

/// 编码结果。
pub struct EncodedPayload {
    pub jpeg: Vec<u8>,
    pub base64: String,
}

impl DescribeHandler {
    /// 以固定质量将画布压缩为 JPEG。
    pub fn encode_canvas(canvas: &CanonicalCanvas, quality: u8) -> Result<EncodedPayload, DescribeError> {
        if !(1..=100).contains(&quality) {
            return Err(DescribeError::Encode(format!("JPEG 质量超出范围：{}", quality)));
        }

        let (width, height) = canvas.image.dimensions();
        if width == 0 || height == 0 {
            return Err(DescribeError::Encode("画布为空，无法编码".to_string()));
        }

        let rgb = DynamicImage::ImageRgba8(canvas.image.clone()).to_rgb8();
        let mut cursor = Cursor::new(Vec::new());
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut cursor, quality))
            .map_err(|e| DescribeError::Encode(format!("JPEG 编码失败：{}", e)))?;

        let jpeg = cursor.into_inner();
        let base64 = general_purpose::STANDARD.encode(&jpeg);

        log::debug!(
            "🗜️ 画布编码完成 - {}x{} quality={} jpeg={}KB base64={}KB",
            width,
            height,
            quality,
            jpeg.len() / 1024,
            base64.len() / 1024
        );

        Ok(EncodedPayload { jpeg, base64 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::DescribeConfig;
    use image::{GenericImageView, ImageBuffer, Rgba};

    fn sample_canvas() -> CanonicalCanvas {
        let source = DynamicImage::ImageRgba8(ImageBuffer::from_fn(300, 150, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, 90, 255])
        }));
        DescribeHandler::canonicalize(&source, &DescribeConfig::default()).expect("canonicalize failed")
    }

    #[test]
    fn encodes_jpeg_with_padded_dimensions() {
        let canvas = sample_canvas();
        let before = canvas.image.clone();

        let payload = DescribeHandler::encode_canvas(&canvas, 80).expect("encode failed");

        assert_eq!(&payload.jpeg[..3], &[0xFF, 0xD8, 0xFF]);
        assert!(!payload.base64.starts_with("data:"));

        let decoded = image::load_from_memory(&payload.jpeg).expect("jpeg should decode");
        assert_eq!(decoded.dimensions(), (400, 200));
        assert_eq!(canvas.image, before);
    }

    #[test]
    fn lower_quality_produces_smaller_payload() {
        let canvas = sample_canvas();

        let high = DescribeHandler::encode_canvas(&canvas, 95).expect("encode failed");
        let low = DescribeHandler::encode_canvas(&canvas, 20).expect("encode failed");

        assert!(low.jpeg.len() < high.jpeg.len());
    }

    #[test]
    fn invalid_quality_is_an_encode_error() {
        let canvas = sample_canvas();

        assert!(matches!(
            DescribeHandler::encode_canvas(&canvas, 0),
            Err(DescribeError::Encode(_))
        ));
    }
}
