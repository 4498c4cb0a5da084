//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `DescribeConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到缩放滤镜与 JPEG 质量。
//!
//! ## 实现思路
//!
//! - `Default` 提供默认网格参数（200px 区块、1200px 长边上限、0.8 质量）。
//! - 支持从 JSON 文件加载，缺失字段取默认值。
//! - `validate` 在每次运行前检查取值范围。
//! - `infer_performance_profile` 用于从当前配置反推档位。

use std::path::Path;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::DescribeError;

/// 描述链路配置。
///
/// 字段覆盖了加载、规范化、编码与描述请求四个阶段。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeConfig {
    /// 区块边长（像素），画布宽高均为其整数倍。
    pub region_size: u32,
    /// 缩放后长边上限（像素），只缩小不放大。
    pub max_size: u32,
    /// JPEG 编码质量（1~100）。
    pub jpeg_quality: u8,
    /// 填充背景色（RGBA）。
    pub background: [u8; 4],
    /// 描述服务地址。
    pub caption_endpoint: String,
    /// 描述请求整体超时（秒）。
    pub caption_timeout: u64,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 描述服务响应体积上限（字节）。
    pub max_response_bytes: u64,
    /// 下载/读取原始图片时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 图片下载超时时间（秒）。
    pub download_timeout: u64,
    /// 图片下载最大重定向次数。
    pub max_redirects: usize,
    /// 是否允许从内网或本地地址加载图片（默认关闭）。
    pub allow_private_network: bool,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 缩放滤镜，仅由性能档位设置。
    #[serde(skip)]
    pub resize_filter: FilterType,
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self {
            region_size: 200,
            max_size: 1200,
            jpeg_quality: 80,
            background: [255, 255, 255, 255],
            caption_endpoint: "http://127.0.0.1:3000/api/describe".to_string(),
            caption_timeout: 90,
            connect_timeout: 8,
            max_response_bytes: 2 * 1024 * 1024,
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            max_redirects: 5,
            allow_private_network: false,
            max_decoded_pixels: 40_000_000,
            resize_filter: FilterType::Triangle,
        }
    }
}

/// 性能档位（面向用户语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与体积平衡
/// - `Speed`：优先传输速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl PerformanceProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use talk_art::describe::PerformanceProfile;
    ///
    /// let p = PerformanceProfile::parse("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), talk_art::describe::DescribeError>(())
    /// ```
    pub fn parse(profile: &str) -> Result<Self, DescribeError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(DescribeError::Validation(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl DescribeConfig {
    /// 从 JSON 文件读取配置，缺失字段使用默认值。
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DescribeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DescribeError::Validation(format!("无法读取配置文件 {}：{}", path.display(), e))
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DescribeError::Validation(format!("解析配置文件失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), DescribeError> {
        if !(8..=4096).contains(&self.region_size) {
            return Err(DescribeError::Validation(
                "region_size 必须在 8~4096 像素之间".to_string(),
            ));
        }
        if self.max_size < self.region_size || self.max_size > 16_384 {
            return Err(DescribeError::Validation(
                "max_size 必须不小于 region_size 且不超过 16384".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(DescribeError::Validation(
                "jpeg_quality 必须在 1~100 之间".to_string(),
            ));
        }
        if !(1..=600).contains(&self.caption_timeout) {
            return Err(DescribeError::Validation(
                "caption_timeout 必须在 1~600 秒之间".to_string(),
            ));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(DescribeError::Validation(
                "connect_timeout 必须在 1~120 秒之间".to_string(),
            ));
        }
        if self.max_response_bytes == 0 || self.max_file_size == 0 || self.max_decoded_pixels == 0
        {
            return Err(DescribeError::Validation("体积与像素上限必须大于 0".to_string()));
        }

        let endpoint = reqwest::Url::parse(&self.caption_endpoint)
            .map_err(|e| DescribeError::Validation(format!("caption_endpoint 格式错误：{}", e)))?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(DescribeError::Validation(
                "caption_endpoint 仅支持 HTTP/HTTPS".to_string(),
            ));
        }

        Ok(())
    }

    /// 基于当前参数反推性能档位。
    pub fn infer_performance_profile(&self) -> PerformanceProfile {
        if self.jpeg_quality >= 90 {
            return PerformanceProfile::Quality;
        }
        if self.jpeg_quality <= 65 || matches!(self.resize_filter, FilterType::Nearest) {
            return PerformanceProfile::Speed;
        }

        PerformanceProfile::Balanced
    }

    /// 应用指定性能档位到实际参数。
    pub fn apply_performance_profile(&mut self, profile: PerformanceProfile) {
        match profile {
            PerformanceProfile::Quality => {
                self.jpeg_quality = 92;
                self.resize_filter = FilterType::CatmullRom;
            }
            PerformanceProfile::Balanced => {
                self.jpeg_quality = 80;
                self.resize_filter = FilterType::Triangle;
            }
            PerformanceProfile::Speed => {
                self.jpeg_quality = 60;
                self.resize_filter = FilterType::Nearest;
            }
        }
    }
}
