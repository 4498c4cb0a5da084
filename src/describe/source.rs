//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线中间结果”解耦：
//! - `ImageSource` 表示外部来源语义
//! - `RawImageData` 表示已加载但未解码的字节
//! - `CanonicalCanvas` 表示规范化后的填充画布
//! - `Tile` / `Region` 表示网格单元，下标即身份

use image::RgbaImage;
use serde::Serialize;

/// 图片输入来源。
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// 网络地址来源。
    Url(String),
    /// Base64（支持 Data URL 与纯 Base64 字符串）。
    Base64(String),
    /// 本地文件路径来源。
    FilePath(String),
}

impl ImageSource {
    /// 按字符串形态猜测来源类型。
    pub fn detect(input: &str) -> Self {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else if lower.starts_with("data:") {
            Self::Base64(trimmed.to_string())
        } else {
            Self::FilePath(trimmed.to_string())
        }
    }

    /// 用于日志与快照展示的来源描述（不含查询串与 Base64 正文）。
    pub fn label(&self) -> String {
        match self {
            Self::Url(url) => match reqwest::Url::parse(url) {
                Ok(parsed) => format!(
                    "{}://{}{}{}",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or("<unknown-host>"),
                    parsed.port().map(|p| format!(":{}", p)).unwrap_or_default(),
                    parsed.path()
                ),
                Err(_) => "<invalid-url>".to_string(),
            },
            Self::Base64(data) => format!("base64 ({} chars)", data.len()),
            Self::FilePath(path) => path.clone(),
        }
    }
}

/// 加载阶段输出：原始字节与来源标识。
pub(crate) struct RawImageData {
    pub(crate) bytes: Vec<u8>,
    pub(crate) source_hint: &'static str,
}

/// 规范化网格的几何参数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridLayout {
    pub source_width: u32,
    pub source_height: u32,
    pub scale: f64,
    pub resized_width: u32,
    pub resized_height: u32,
    pub padded_width: u32,
    pub padded_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub region_size: u32,
}

impl GridLayout {
    /// 每行区块数。
    pub fn columns(&self) -> u32 {
        self.padded_width / self.region_size
    }

    /// 每列区块数。
    pub fn rows(&self) -> u32 {
        self.padded_height / self.region_size
    }

    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }
}

/// 规范化画布：居中缩放后的图片 + 对称填充。
pub struct CanonicalCanvas {
    pub layout: GridLayout,
    pub image: RgbaImage,
}

/// 画布上的一个区块，`index` 为光栅顺序下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tile {
    pub index: usize,
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub fn coords(&self) -> [u32; 2] {
        [self.x, self.y]
    }
}

/// 附加描述后的区块。描述为空表示尚未获得。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub index: usize,
    pub x: u32,
    pub y: u32,
    pub caption: String,
}

impl Region {
    pub fn uncaptioned(tile: &Tile) -> Self {
        Self {
            index: tile.index,
            x: tile.x,
            y: tile.y,
            caption: String::new(),
        }
    }

    pub fn has_caption(&self) -> bool {
        !self.caption.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_source_kind_from_input() {
        assert!(matches!(
            ImageSource::detect("https://example.com/kiss.jpg"),
            ImageSource::Url(_)
        ));
        assert!(matches!(
            ImageSource::detect("data:image/png;base64,AAAA"),
            ImageSource::Base64(_)
        ));
        assert!(matches!(
            ImageSource::detect("./public/The_Kiss.jpg"),
            ImageSource::FilePath(_)
        ));
    }

    #[test]
    fn url_label_drops_query() {
        let label = ImageSource::Url("https://example.com:8443/a/b.png?token=abc#x".into()).label();
        assert_eq!(label, "https://example.com:8443/a/b.png");
    }
}
