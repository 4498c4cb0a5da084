//! # 艺术品区块描述模块（describe）
//!
//! ## 设计思路
//!
//! 将“加载 → 规范化 → 切分 → 编码 → 描述关联 → 视口映射”按职责拆分为多个子模块：
//!
//! - `service`：状态容器，按代号发布不可变快照
//! - `handler`：编排整条处理流水线
//! - `loader`：负责 URL/Base64/文件加载与安全校验
//! - `canvas`：解码、缩放、居中填充到区块对齐的画布
//! - `tiler`：按光栅顺序切分区块
//! - `encoder`：JPEG 压缩与 Base64
//! - `correlator`：描述请求、响应提取与按下标合并
//! - `viewport`：规范空间到显示空间的投影与命中测试
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! main.rs（CLI 参数）
//!    ↓
//! service.rs（代号 + 快照发布）
//!    ↓
//! handler.rs（统一编排 + 阶段耗时日志）
//!    ├─ loader.rs（来源加载 + URL/体积安全校验）
//!    ├─ canvas.rs → tiler.rs → encoder.rs（阻塞线程池内执行）
//!    └─ correlator.rs（描述请求 + 按下标关联）
//!    ↓
//! viewport.rs（显示尺寸变化时重新投影）
//! ```
//!
//! 纯计算部分（`compute_layout` / `tile_grid` / `merge_captions` / `map_regions`）不依赖 IO，
//! 可以单独测试。

mod canvas;
mod config;
mod correlator;
mod encoder;
mod error;
mod handler;
mod loader;
mod service;
mod source;
mod tiler;
mod viewport;

pub use canvas::compute_layout;
pub use config::{DescribeConfig, PerformanceProfile};
pub use correlator::{
    CaptionRequest, CaptionResponse, CaptionedGrid, RequestRegion, ResponseRegion, extract_json_object,
    merge_captions, parse_caption_response,
};
pub use encoder::EncodedPayload;
pub use error::{DescribeError, ErrorInfo};
pub use handler::{DescribeHandler, PreparedGrid};
pub use service::{DescribeService, DescribeSnapshot, DescribeStatus};
pub use source::{CanonicalCanvas, GridLayout, ImageSource, Region, Tile};
pub use tiler::{tile_grid, tiles_for_layout};
pub use viewport::{ScreenRect, ViewportScale, map_regions, region_at};
