//! # 视口映射
//!
//! 规范空间（填充画布）→ 屏幕空间（图片实际显示尺寸）的纯投影。
//! 每轴缩放比例独立，区块在规范空间无缝铺满画布，因此投影后的矩形同样无缝铺满显示区域。

use serde::Serialize;

use super::DescribeError;
use super::source::{GridLayout, Region};

/// 显示尺寸与画布尺寸之比。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewportScale {
    pub x: f64,
    pub y: f64,
}

impl ViewportScale {
    /// 按当前显示尺寸计算缩放比例。
    pub fn compute(
        client_width: f64,
        client_height: f64,
        layout: &GridLayout,
    ) -> Result<Self, DescribeError> {
        if !(client_width.is_finite() && client_height.is_finite())
            || client_width <= 0.0
            || client_height <= 0.0
        {
            return Err(DescribeError::Validation(format!(
                "无效的显示尺寸：{}x{}",
                client_width, client_height
            )));
        }
        if layout.padded_width == 0 || layout.padded_height == 0 || layout.region_size == 0 {
            return Err(DescribeError::Validation("画布尺寸为 0，无法映射".to_string()));
        }

        Ok(Self {
            x: client_width / layout.padded_width as f64,
            y: client_height / layout.padded_height as f64,
        })
    }
}

/// 区块在显示区域中的矩形（客户端像素）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenRect {
    pub index: usize,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }
}

/// 将区块投影到显示区域，顺序与输入一致。
pub fn map_regions(regions: &[Region], layout: &GridLayout, scale: ViewportScale) -> Vec<ScreenRect> {
    let size = layout.region_size as f64;

    regions
        .iter()
        .map(|region| ScreenRect {
            index: region.index,
            left: region.x as f64 * scale.x,
            top: region.y as f64 * scale.y,
            width: size * scale.x,
            height: size * scale.y,
        })
        .collect()
}

/// 命中测试：返回显示坐标下所在区块的下标，落在图片外返回 `None`。
pub fn region_at(x: f64, y: f64, layout: &GridLayout, scale: ViewportScale) -> Option<usize> {
    if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 {
        return None;
    }

    let column = (x / (layout.region_size as f64 * scale.x)).floor() as u64;
    let row = (y / (layout.region_size as f64 * scale.y)).floor() as u64;
    let columns = layout.columns() as u64;

    if column >= columns || row >= layout.rows() as u64 {
        return None;
    }

    Some((row * columns + column) as usize)
}
