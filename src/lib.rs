//! # 艺术品区块描述工具：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  调用方 (CLI / 宿主应用)                  │
//! │                                                          │
//! │   选择图片 ── 读取快照 ── 显示尺寸变化 ── 指针命中       │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ Result<Arc<DescribeSnapshot>, DescribeError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            核心 (Rust)                           │
//! │                                                          │
//! │  ┌─ error ────── AppError (应用级错误类型)                │
//! │  │                                                       │
//! │  └─ describe ─── 加载·规范化·切分·编码·描述·投影          │
//! │      ├─ service      代号 + 不可变快照                    │
//! │      ├─ handler      阶段编排 + 耗时日志                  │
//! │      ├─ correlator   描述请求 + 按下标关联                │
//! │      └─ viewport     规范空间 → 显示空间                  │
//! └──────────────────────────────────────────────────────────┘
//!         ↕ HTTP JSON { imageBase64, regions }
//!    描述服务（视觉模型）
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 应用级错误类型 `AppError`，CLI 的统一返回类型 |
//! | [`describe`] | 将图片切分为固定区块网格、获取逐区块描述并映射回显示区域 |

pub mod error;
pub mod describe;
