//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `DescribeHandler` 只负责流程编排与配置管理，不持有任何运行结果。
//! 处理链路固定为：
//! 1. 读取配置快照
//! 2. 按来源加载原始字节
//! 3. 解码、规范化、切分、编码（CPU 密集，放到阻塞线程池）
//! 4. 发送描述请求并按下标关联
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<DescribeConfig>>` 支持运行时切换档位。
//! - 单次运行内使用“同一配置快照”，避免处理中途配置漂移。
//! - 记录 `load/canonical/encode/caption/total` 阶段耗时，便于性能诊断。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::correlator::CaptionedGrid;
use super::encoder::EncodedPayload;
use super::source::{GridLayout, ImageSource, RawImageData, Tile};
use super::tiler::tiles_for_layout;
use super::{DescribeConfig, DescribeError, PerformanceProfile};

/// 描述处理器。
pub struct DescribeHandler {
    config: Arc<RwLock<DescribeConfig>>,
}

/// 准备阶段产物：几何参数、区块列表与待发送的编码图片。
pub struct PreparedGrid {
    pub layout: GridLayout,
    pub tiles: Vec<Tile>,
    pub payload: EncodedPayload,
}

impl DescribeHandler {
    /// 根据初始配置创建处理器，配置不合法时直接拒绝。
    ///
    /// # 示例
    /// ```rust
    /// use talk_art::describe::{DescribeConfig, DescribeHandler};
    ///
    /// let handler = DescribeHandler::new(DescribeConfig::default())?;
    /// # Ok::<(), talk_art::describe::DescribeError>(())
    /// ```
    pub fn new(config: DescribeConfig) -> Result<Self, DescribeError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 获取配置快照。
    pub fn config_snapshot(&self) -> Result<DescribeConfig, DescribeError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| DescribeError::Validation("配置读取锁已中毒".to_string()))
    }

    /// 设置性能档位。
    pub fn set_performance_profile(&self, profile: PerformanceProfile) -> Result<(), DescribeError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| DescribeError::Validation("配置写入锁已中毒".to_string()))?;
        config.apply_performance_profile(profile);

        log::info!(
            "⚙️ 已切换性能档位：{}（jpeg_quality={}, filter={:?}）",
            profile.as_str(),
            config.jpeg_quality,
            config.resize_filter
        );

        Ok(())
    }

    /// 获取当前生效档位。
    pub fn get_performance_profile(&self) -> Result<PerformanceProfile, DescribeError> {
        let config = self
            .config
            .read()
            .map_err(|_| DescribeError::Validation("配置读取锁已中毒".to_string()))?;
        Ok(config.infer_performance_profile())
    }

    /// 加载来源并产出区块网格与编码图片。
    ///
    /// 只读取传入的配置快照，不访问处理器自身状态。
    /// 失败一律为致命错误（`Load` / `Encode`），不会产出部分结果。
    pub async fn prepare(
        source: &ImageSource,
        config: &DescribeConfig,
    ) -> Result<PreparedGrid, DescribeError> {
        let total_start = Instant::now();

        let load_start = Instant::now();
        let raw = Self::load(source, config).await?;
        let load_ms = load_start.elapsed().as_millis();

        let prepare_start = Instant::now();
        let config_for_blocking = config.clone();
        let prepared = tokio::task::spawn_blocking(move || Self::build_grid(raw, &config_for_blocking))
            .await
            .map_err(|e| DescribeError::Encode(format!("后台处理任务异常退出：{}", e)))??;
        let prepare_ms = prepare_start.elapsed().as_millis();

        log::info!(
            "⏱️ 网格准备完成 - 来源: {} 区块: {}x{} load={}ms prepare={}ms total={}ms",
            source.label(),
            prepared.layout.columns(),
            prepared.layout.rows(),
            load_ms,
            prepare_ms,
            total_start.elapsed().as_millis()
        );

        Ok(prepared)
    }

    /// 为已准备好的网格请求描述。失败均为可降级错误。
    pub async fn caption(
        grid: &PreparedGrid,
        config: &DescribeConfig,
    ) -> Result<CaptionedGrid, DescribeError> {
        let start = Instant::now();
        let result = Self::request_captions(&grid.payload.base64, &grid.tiles, config).await;

        match &result {
            Ok(_) => log::info!("⏱️ 描述请求完成 - caption={}ms", start.elapsed().as_millis()),
            Err(e) => log::warn!(
                "⚠️ 描述请求失败 - code={} caption={}ms: {}",
                e.code(),
                start.elapsed().as_millis(),
                e
            ),
        }

        result
    }

    async fn load(source: &ImageSource, config: &DescribeConfig) -> Result<RawImageData, DescribeError> {
        match source {
            ImageSource::Url(url) => Self::load_from_url(url, config).await,
            ImageSource::Base64(data) => Self::load_from_base64(data, config),
            ImageSource::FilePath(path) => Self::load_from_file(path, config),
        }
    }

    fn build_grid(raw: RawImageData, config: &DescribeConfig) -> Result<PreparedGrid, DescribeError> {
        let canonical_start = Instant::now();
        let canvas = Self::decode_and_canonicalize(raw, config)?;
        let tiles = tiles_for_layout(&canvas.layout)?;
        let canonical_ms = canonical_start.elapsed().as_millis();

        let encode_start = Instant::now();
        let payload = Self::encode_canvas(&canvas, config.jpeg_quality)?;

        log::info!(
            "⏱️ 阶段耗时 - canonical={}ms encode={}ms 区块: {}",
            canonical_ms,
            encode_start.elapsed().as_millis(),
            tiles.len()
        );

        Ok(PreparedGrid {
            layout: canvas.layout,
            tiles,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
    use std::io::Cursor;

    fn png_data_url(width: u32, height: u32) -> String {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(width, height, Rgba([10, 20, 30, 255])));
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode png failed");
        format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(cursor.into_inner())
        )
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = DescribeConfig {
            region_size: 0,
            ..DescribeConfig::default()
        };

        assert!(matches!(DescribeHandler::new(config), Err(DescribeError::Validation(_))));
    }

    #[test]
    fn performance_profile_switch_is_visible_in_snapshot() {
        let handler = DescribeHandler::new(DescribeConfig::default()).expect("create handler failed");

        handler
            .set_performance_profile(PerformanceProfile::Speed)
            .expect("set profile failed");

        assert_eq!(
            handler.get_performance_profile().expect("get profile failed"),
            PerformanceProfile::Speed
        );
        assert_eq!(handler.config_snapshot().expect("snapshot failed").jpeg_quality, 60);
    }

    #[tokio::test]
    async fn prepare_builds_grid_from_data_url() {
        let handler = DescribeHandler::new(DescribeConfig::default()).expect("create handler failed");
        let config = handler.config_snapshot().expect("snapshot failed");

        let grid = DescribeHandler::prepare(&ImageSource::detect(&png_data_url(2000, 1000)), &config)
            .await
            .expect("prepare failed");

        assert_eq!(grid.layout.scale, 0.6);
        assert_eq!((grid.layout.padded_width, grid.layout.padded_height), (1200, 600));
        assert_eq!(grid.tiles.len(), 18);
        assert_eq!(grid.tiles[6].coords(), [0, 200]);
        assert!(!grid.payload.base64.is_empty());
    }

    #[tokio::test]
    async fn prepare_reports_missing_file_as_load_error() {
        let handler = DescribeHandler::new(DescribeConfig::default()).expect("create handler failed");
        let config = handler.config_snapshot().expect("snapshot failed");

        let result =
            DescribeHandler::prepare(&ImageSource::FilePath("/definitely/missing/art.png".into()), &config).await;

        assert!(matches!(result, Err(DescribeError::Load(_))));
    }
}
