//! # 描述关联模块
//!
//! ## 设计思路
//!
//! 一次请求同时携带 JPEG（Base64）与区块坐标列表；服务返回整体描述与逐区块描述。
//! 逐区块描述按**下标**与提交的区块对齐，而不是按回显坐标匹配：
//! 第 i 条描述属于第 i 个提交的区块，回显坐标即使不一致也以提交坐标为准。
//!
//! ## 实现思路
//!
//! - 响应文本可能夹带非 JSON 内容，取第一个能解析为对象的平衡 `{...}` 片段。
//! - 找不到可解析对象 → `ResponseFormat`；缺少 `overall` / `regions` → `Validation`。
//! - 响应条数不足时剩余区块描述为空，多出的条目忽略。
//! - 本模块不做重试与缓存，交由调用方决定。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::loader::{BodyError, read_body_capped};
use super::source::{Region, Tile};
use super::{DescribeConfig, DescribeError, DescribeHandler};

/// 请求体中的单个区块。
#[derive(Debug, Clone, Serialize)]
pub struct RequestRegion {
    pub coords: [u32; 2],
}

/// 描述服务请求体：`{ imageBase64, regions: [{ coords: [x, y] }] }`。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionRequest<'a> {
    pub image_base64: &'a str,
    pub regions: Vec<RequestRegion>,
}

impl<'a> CaptionRequest<'a> {
    pub fn new(image_base64: &'a str, tiles: &[Tile]) -> Self {
        Self {
            image_base64,
            regions: tiles
                .iter()
                .map(|tile| RequestRegion {
                    coords: tile.coords(),
                })
                .collect(),
        }
    }
}

/// 响应中的单个区块。回显坐标只用于诊断。
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRegion {
    #[serde(default)]
    pub coords: Option<serde_json::Value>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// 描述服务响应体。
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionResponse {
    pub overall: String,
    pub regions: Vec<ResponseRegion>,
}

/// 关联完成的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionedGrid {
    pub overall: String,
    pub regions: Vec<Region>,
}

/// 在任意文本中查找第一个能解析为 JSON 对象的平衡 `{...}` 片段。
///
/// 候选片段按起点顺序尝试，外层片段解析失败时再尝试其内部片段。
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let mut spans = balanced_spans(text.as_bytes());
    spans.sort_unstable_by_key(|&(start, _)| start);

    spans.into_iter().find_map(|(start, end)| {
        serde_json::from_str::<serde_json::Value>(&text[start..=end])
            .ok()
            .filter(serde_json::Value::is_object)
    })
}

/// 单次扫描找出所有配对的 `{` / `}` 位置。
///
/// 仅在已打开的 `{` 内部跟踪字符串状态，字符串内的括号不计数；多余的 `}` 忽略。
fn balanced_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (pos, &byte) in bytes.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(pos),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, pos));
                }
            }
            _ => {}
        }
    }

    spans
}

/// 解析描述服务响应文本。
pub fn parse_caption_response(text: &str) -> Result<CaptionResponse, DescribeError> {
    let value = extract_json_object(text).ok_or_else(|| {
        DescribeError::ResponseFormat(format!(
            "响应中没有可解析的 JSON 对象（长度 {}）",
            text.len()
        ))
    })?;

    serde_json::from_value::<CaptionResponse>(value)
        .map_err(|e| DescribeError::Validation(format!("响应缺少必要字段：{}", e)))
}

/// 按下标把描述合并到区块上；提交的坐标为准。
pub fn merge_captions(tiles: &[Tile], response: &CaptionResponse) -> Vec<Region> {
    if response.regions.len() != tiles.len() {
        log::warn!(
            "⚠️ 描述条数与区块数不一致：响应 {} 条，区块 {} 个",
            response.regions.len(),
            tiles.len()
        );
    }

    let mut mismatched = 0usize;
    let regions = tiles
        .iter()
        .map(|tile| {
            let entry = response.regions.get(tile.index);
            if let Some(echoed) = entry.and_then(|r| r.coords.as_ref()) {
                if !coords_match(echoed, tile) {
                    mismatched += 1;
                }
            }

            Region {
                index: tile.index,
                x: tile.x,
                y: tile.y,
                caption: entry
                    .and_then(|r| r.caption.clone())
                    .unwrap_or_default(),
            }
        })
        .collect();

    if mismatched > 0 {
        log::warn!("⚠️ {} 个区块的回显坐标与提交坐标不一致，已按下标对齐", mismatched);
    }

    regions
}

fn coords_match(echoed: &serde_json::Value, tile: &Tile) -> bool {
    let Some([x, y]) = echoed.as_array().map(Vec::as_slice).and_then(|pair| match pair {
        [x, y] => Some([x.as_f64(), y.as_f64()]),
        _ => None,
    }) else {
        return false;
    };

    x == Some(tile.x as f64) && y == Some(tile.y as f64)
}

impl DescribeHandler {
    /// 发送一次描述请求并按下标关联结果。
    pub(super) async fn request_captions(
        image_base64: &str,
        tiles: &[Tile],
        config: &DescribeConfig,
    ) -> Result<CaptionedGrid, DescribeError> {
        let endpoint = config.caption_endpoint.as_str();
        log::info!(
            "🚀 发送描述请求 - 服务: {} 区块: {} 图片: {}KB",
            Self::redact_url_for_log(endpoint),
            tiles.len(),
            image_base64.len() / 1024
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.caption_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()
            .map_err(|e| DescribeError::Transport(format!("无法创建 HTTP 客户端：{}", e)))?;

        let response = client
            .post(endpoint)
            .json(&CaptionRequest::new(image_base64, tiles))
            .send()
            .await
            .map_err(|e| Self::map_caption_error(e, config))?;

        let status = response.status();
        let body = read_body_capped(response, config.max_response_bytes)
            .await
            .map_err(|e| match e {
                BodyError::TooLarge => DescribeError::Transport(format!(
                    "响应体超过上限（{} 字节）",
                    config.max_response_bytes
                )),
                BodyError::Read(err) => Self::map_caption_error(err, config),
            })?;
        let text = String::from_utf8_lossy(&body);

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(DescribeError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                snippet
            )));
        }

        let parsed = parse_caption_response(&text)?;
        let regions = merge_captions(tiles, &parsed);

        log::info!(
            "✅ 描述关联完成 - 已描述区块 {}/{}",
            regions.iter().filter(|r| r.has_caption()).count(),
            regions.len()
        );

        Ok(CaptionedGrid {
            overall: parsed.overall,
            regions,
        })
    }

    fn map_caption_error(e: reqwest::Error, config: &DescribeConfig) -> DescribeError {
        if e.is_timeout() {
            DescribeError::Transport(format!("请求超时（{}秒）", config.caption_timeout))
        } else if e.is_connect() {
            DescribeError::Transport(format!(
                "无法连接描述服务 {}",
                Self::redact_url_for_log(&config.caption_endpoint)
            ))
        } else {
            DescribeError::Transport(format!("请求失败：{}", e))
        }
    }
}
