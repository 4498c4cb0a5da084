//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义应用级 `AppError` 枚举，承接描述链路错误与 CLI 自身的 IO / 参数 / 输出错误，
//! 替代分散的 `.map_err(|e| e.to_string())` 写法。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `DescribeError` 与 `io::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，CLI 以 JSON 输出。

use serde::Serialize;

use crate::describe::DescribeError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 描述链路错误（加载 / 编码 / 描述请求 / 校验）
    #[error("{0}")]
    Describe(#[from] DescribeError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 命令行参数或配置文件不合法
    #[error("配置错误: {0}")]
    Config(String),

    /// 结果输出失败
    #[error("输出失败: {0}")]
    Output(String),
}

impl AppError {
    /// 稳定错误码，描述链路错误沿用其自身错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Describe(e) => e.code(),
            Self::Io(_) => "E_IO",
            Self::Config(_) => "E_CONFIG",
            Self::Output(_) => "E_OUTPUT",
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
