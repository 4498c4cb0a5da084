//! # 规范化画布模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → 规范化画布”的过程集中管理，并在解码前按 header 尺寸做像素上限检查，
//! 降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 读取 header 尺寸并按像素上限快速拒绝
//! 2. 完整解码
//! 3. 计算缩放比例：`min(max/w, max/h, 1)`，只缩小不放大
//! 4. 向下取整得到缩放尺寸，再向上取整到区块边长的整数倍得到画布尺寸
//! 5. 背景填充后居中绘制；奇数差值的偏移向下取整，存在 ±0.5px 的落点差异

use fast_image_resize as fr;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba, RgbaImage};
use std::io::Cursor;

use super::source::{CanonicalCanvas, GridLayout, RawImageData};
use super::{DescribeConfig, DescribeError, DescribeHandler};

/// 计算规范化网格几何参数。
///
/// # 示例
/// ```rust
/// use talk_art::describe::compute_layout;
///
/// let layout = compute_layout(2000, 1000, 200, 1200)?;
/// assert_eq!(layout.scale, 0.6);
/// assert_eq!((layout.resized_width, layout.resized_height), (1200, 600));
/// assert_eq!((layout.padded_width, layout.padded_height), (1200, 600));
/// # Ok::<(), talk_art::describe::DescribeError>(())
/// ```
pub fn compute_layout(
    width: u32,
    height: u32,
    region_size: u32,
    max_size: u32,
) -> Result<GridLayout, DescribeError> {
    if width == 0 || height == 0 {
        return Err(DescribeError::Load(format!("图片尺寸无效：{}x{}", width, height)));
    }
    if region_size == 0 || max_size == 0 {
        return Err(DescribeError::Validation(
            "region_size 与 max_size 必须大于 0".to_string(),
        ));
    }

    let (w, h) = (width as f64, height as f64);
    let max = max_size as f64;
    let scale = (max / w).min(max / h).min(1.0);

    // 极端长宽比下 floor 可能为 0，至少保留 1px
    let resized_width = ((w * scale).floor() as u32).max(1);
    let resized_height = ((h * scale).floor() as u32).max(1);

    let padded_width = align_to_region(resized_width, region_size)?;
    let padded_height = align_to_region(resized_height, region_size)?;

    Ok(GridLayout {
        source_width: width,
        source_height: height,
        scale,
        resized_width,
        resized_height,
        padded_width,
        padded_height,
        offset_x: (padded_width - resized_width) / 2,
        offset_y: (padded_height - resized_height) / 2,
        region_size,
    })
}

/// 向上取整到区块边长的整数倍；结果超出 `u32` 时拒绝。
fn align_to_region(length: u32, region_size: u32) -> Result<u32, DescribeError> {
    length
        .div_ceil(region_size)
        .checked_mul(region_size)
        .ok_or_else(|| {
            DescribeError::Validation(format!(
                "边长 {} 按区块 {} 对齐后超出 u32 范围",
                length, region_size
            ))
        })
}

impl DescribeHandler {
    /// 将原始字节解码并规范化为填充画布。
    pub(crate) fn decode_and_canonicalize(
        raw: RawImageData,
        config: &DescribeConfig,
    ) -> Result<CanonicalCanvas, DescribeError> {
        let (header_width, header_height) = Self::inspect_dimensions_from_memory(&raw.bytes)?;
        Self::validate_pixel_limits(config, header_width, header_height)?;

        let decoded = image::load_from_memory(&raw.bytes)
            .map_err(|e| DescribeError::Load(format!("图片解码失败：{}", e)))?;

        let canvas = Self::canonicalize(&decoded, config)?;

        log::info!(
            "✅ 图片规范化完成 - 来源: {} 原始尺寸: {}x{} 缩放: {}x{} 画布: {}x{}",
            raw.source_hint,
            canvas.layout.source_width,
            canvas.layout.source_height,
            canvas.layout.resized_width,
            canvas.layout.resized_height,
            canvas.layout.padded_width,
            canvas.layout.padded_height
        );

        Ok(canvas)
    }

    /// 把已解码图片缩放、居中并填充到区块对齐的画布上。源图片不会被修改。
    pub fn canonicalize(
        image: &DynamicImage,
        config: &DescribeConfig,
    ) -> Result<CanonicalCanvas, DescribeError> {
        let (width, height) = image.dimensions();
        let layout = compute_layout(width, height, config.region_size, config.max_size)?;

        let resized = if layout.resized_width == width && layout.resized_height == height {
            image.to_rgba8()
        } else {
            Self::resize(image, &layout, config.resize_filter)?
        };

        let mut canvas: RgbaImage = ImageBuffer::from_pixel(
            layout.padded_width,
            layout.padded_height,
            Rgba(config.background),
        );
        image::imageops::overlay(
            &mut canvas,
            &resized,
            layout.offset_x as i64,
            layout.offset_y as i64,
        );

        Ok(CanonicalCanvas {
            layout,
            image: canvas,
        })
    }

    /// 仅通过内存中的图片头信息读取宽高。
    fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), DescribeError> {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DescribeError::Load(format!("无法识别图片格式：{}", e)))?
            .into_dimensions()
            .map_err(|e| DescribeError::Load(format!("无法读取图片尺寸：{}", e)))
    }

    fn validate_pixel_limits(
        config: &DescribeConfig,
        width: u32,
        height: u32,
    ) -> Result<(), DescribeError> {
        let pixels = (width as u64) * (height as u64);
        if pixels > config.max_decoded_pixels {
            return Err(DescribeError::Load(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, config.max_decoded_pixels
            )));
        }

        Ok(())
    }

    fn resize(
        image: &DynamicImage,
        layout: &GridLayout,
        filter: image::imageops::FilterType,
    ) -> Result<RgbaImage, DescribeError> {
        match Self::resize_with_fast_image_resize(
            image,
            layout.resized_width,
            layout.resized_height,
            filter,
        ) {
            Ok(resized) => Ok(resized),
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 缩放失败，回退 image::resize_exact：{}", err);
                Ok(image
                    .resize_exact(layout.resized_width, layout.resized_height, filter)
                    .to_rgba8())
            }
        }
    }

    fn resize_with_fast_image_resize(
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
        filter: image::imageops::FilterType,
    ) -> Result<RgbaImage, DescribeError> {
        let src = image.to_rgba8();
        let (src_width, src_height) = src.dimensions();

        let src_image = fr::images::Image::from_vec_u8(
            src_width,
            src_height,
            src.into_raw(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| DescribeError::Load(format!("构建源图像缓冲失败：{}", e)))?;

        let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(Self::to_fast_filter(filter)));

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| DescribeError::Load(format!("fast_image_resize 执行失败：{}", e)))?;

        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
            .ok_or_else(|| DescribeError::Load("fast_image_resize 输出缓冲长度异常".to_string()))
    }

    fn to_fast_filter(filter: image::imageops::FilterType) -> fr::FilterType {
        match filter {
            image::imageops::FilterType::Nearest => fr::FilterType::Box,
            image::imageops::FilterType::Triangle => fr::FilterType::Bilinear,
            image::imageops::FilterType::CatmullRom => fr::FilterType::CatmullRom,
            image::imageops::FilterType::Gaussian => fr::FilterType::Mitchell,
            image::imageops::FilterType::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}
