//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载“加载 → 规范化 → 编码 → 描述请求”整条链路的错误来源。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 致命与可降级错误的划分：
//! - `Load` / `Encode`：本次运行失败，不产出画布
//! - `Transport` / `ResponseFormat` / `Validation`：网格仍可用，仅缺少描述

/// 描述链路统一错误类型。
///
/// 该类型会在应用层被上转为 `AppError`，或投影为 [`ErrorInfo`] 写入状态快照。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescribeError {
    #[error("图片加载失败：{0}")]
    Load(String),

    #[error("图片编码失败：{0}")]
    Encode(String),

    #[error("描述服务请求失败：{0}")]
    Transport(String),

    #[error("描述服务响应格式错误：{0}")]
    ResponseFormat(String),

    #[error("参数校验失败：{0}")]
    Validation(String),

    #[error("运行已被新的选择取代：{0}")]
    Superseded(String),
}

impl DescribeError {
    /// 稳定错误码，供调用方或脚本按码分支。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Load(_) => "E_LOAD",
            Self::Encode(_) => "E_ENCODE",
            Self::Transport(_) => "E_TRANSPORT",
            Self::ResponseFormat(_) => "E_RESPONSE_FORMAT",
            Self::Validation(_) => "E_VALIDATION",
            Self::Superseded(_) => "E_SUPERSEDED",
        }
    }

    /// 出错阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Encode(_) => "encode",
            Self::Transport(_) | Self::ResponseFormat(_) => "caption",
            Self::Validation(_) => "validate",
            Self::Superseded(_) => "publish",
        }
    }

    /// 是否终止本次运行（无画布可展示）。
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Encode(_))
    }
}

/// 错误的可序列化投影，写入快照后对外展示。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
    /// 为 `true` 时本次运行没有可展示的画布。
    pub fatal: bool,
}

impl From<&DescribeError> for ErrorInfo {
    fn from(error: &DescribeError) -> Self {
        Self {
            code: error.code(),
            stage: error.stage(),
            message: error.to_string(),
            fatal: error.is_fatal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_load_and_encode_are_fatal() {
        assert!(DescribeError::Load("x".into()).is_fatal());
        assert!(DescribeError::Encode("x".into()).is_fatal());
        assert!(!DescribeError::Transport("x".into()).is_fatal());
        assert!(!DescribeError::ResponseFormat("x".into()).is_fatal());
        assert!(!DescribeError::Validation("x".into()).is_fatal());
    }

    #[test]
    fn error_info_carries_code_stage_and_message() {
        let info = ErrorInfo::from(&DescribeError::ResponseFormat("没有 JSON".into()));

        assert_eq!(info.code, "E_RESPONSE_FORMAT");
        assert_eq!(info.stage, "caption");
        assert!(info.message.contains("没有 JSON"));
        assert!(!info.fatal);
    }

    #[test]
    fn error_info_marks_load_failures_fatal() {
        let info = ErrorInfo::from(&DescribeError::Load("文件不存在".into()));

        assert!(info.fatal);
        assert_eq!(info.stage, "load");
    }
}
