//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 三种来源（URL / Base64 / 本地文件）最终都收敛为一份 `RawImageData`，
//! 收敛前统一经过文件签名校验。任何一步失败都映射为 `DescribeError::Load`，本次运行不会产出画布。
//!
//! ## 实现思路
//!
//! - URL：先做协议与主机检查，再发送请求；只有超时、连接失败与 408/429/5xx 会重试，
//!   退避时间按次数翻倍并叠加抖动。响应头通过后按上限分块读取。
//! - Base64：Data URL 头部声明的媒体类型必须是图片；解码前先按长度估算体积。
//! - 文件：一次 `metadata` 同时判断存在性、类型与体积。
//! - `read_body_capped` 也供描述请求复用，保证两处响应体上限语义一致。

use base64::{Engine as _, engine::general_purpose};
use std::io::ErrorKind;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::source::RawImageData;
use super::{DescribeConfig, DescribeError, DescribeHandler};

const DOWNLOAD_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(180);
const BODY_INITIAL_CAPACITY: u64 = 16 * 1024;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 分块读取响应体时的失败原因。
pub(super) enum BodyError {
    /// 累计字节数超过上限，已停止读取。
    TooLarge,
    Read(reqwest::Error),
}

/// 分块读取响应体，累计超过 `limit` 立即停止。
pub(super) async fn read_body_capped(
    mut response: reqwest::Response,
    limit: u64,
) -> Result<Vec<u8>, BodyError> {
    let capacity = response
        .content_length()
        .filter(|len| *len > 0)
        .unwrap_or(BODY_INITIAL_CAPACITY)
        .min(limit);
    let mut body = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));

    while let Some(chunk) = response.chunk().await.map_err(BodyError::Read)? {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

fn too_large(what: &str, size: u64, limit: u64) -> DescribeError {
    DescribeError::Load(format!(
        "{}过大：{:.2} MB（限制：{:.2} MB）",
        what,
        size as f64 / BYTES_PER_MB,
        limit as f64 / BYTES_PER_MB
    ))
}

impl DescribeHandler {
    /// 从 URL 下载图片。
    pub(super) async fn load_from_url(
        url: &str,
        config: &DescribeConfig,
    ) -> Result<RawImageData, DescribeError> {
        log::info!("🌐 开始下载图片 - URL: {}", Self::redact_url_for_log(url));

        let target = Self::validate_url_safety(url, config)?;
        let client = Self::build_download_client(config)?;
        let response = Self::send_with_retry(&client, &target, config).await?;
        Self::check_download_headers(&response, config)?;

        let bytes = read_body_capped(response, config.max_file_size)
            .await
            .map_err(|e| match e {
                BodyError::TooLarge => DescribeError::Load("下载内容超过大小限制".to_string()),
                BodyError::Read(err) => Self::map_download_error(err, url, config),
            })?;

        Self::into_raw(bytes, "url")
    }

    /// 解析 Data URL 或纯 Base64 文本。
    pub(super) fn load_from_base64(
        data: &str,
        config: &DescribeConfig,
    ) -> Result<RawImageData, DescribeError> {
        log::info!("📝 开始处理 base64 图片 - {} 字符", data.len());

        let bytes = Self::decode_base64_payload(data, config.max_file_size)?;
        Self::into_raw(bytes, "base64")
    }

    /// 读取本地图片文件。
    pub(super) fn load_from_file(
        path: &str,
        config: &DescribeConfig,
    ) -> Result<RawImageData, DescribeError> {
        log::info!("📁 开始读取本地图片 - 路径: {}", path);

        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DescribeError::Load(format!("文件不存在：{}", path)),
            _ => DescribeError::Load(format!("无法读取文件信息：{}", e)),
        })?;

        if !metadata.is_file() {
            return Err(DescribeError::Load(format!("不是普通文件：{}", path)));
        }
        if metadata.len() > config.max_file_size {
            return Err(too_large("文件", metadata.len(), config.max_file_size));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| DescribeError::Load(format!("无法读取图片文件：{}", e)))?;
        Self::into_raw(bytes, "file")
    }

    fn into_raw(bytes: Vec<u8>, source_hint: &'static str) -> Result<RawImageData, DescribeError> {
        Self::validate_image_signature(&bytes)?;
        log::debug!("📦 {} 来源读取完成 - {} 字节", source_hint, bytes.len());

        Ok(RawImageData { bytes, source_hint })
    }

    /// 发送 GET 请求，瞬时失败按退避重试，最多 `DOWNLOAD_ATTEMPTS` 次。
    ///
    /// 最后一次仍是可重试状态码时原样返回响应，由调用方按状态码报错。
    async fn send_with_retry(
        client: &reqwest::Client,
        target: &reqwest::Url,
        config: &DescribeConfig,
    ) -> Result<reqwest::Response, DescribeError> {
        let mut attempt = 1;

        loop {
            let reason = match client.get(target.clone()).send().await {
                Ok(resp) if attempt == DOWNLOAD_ATTEMPTS || !Self::is_retryable_http_status(resp.status()) => {
                    return Ok(resp);
                }
                Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
                Err(err) if attempt < DOWNLOAD_ATTEMPTS && err.is_timeout() => "超时".to_string(),
                Err(err) if attempt < DOWNLOAD_ATTEMPTS && err.is_connect() => "连接失败".to_string(),
                Err(err) => return Err(Self::map_download_error(err, target.as_str(), config)),
            };

            let delay = Self::retry_delay(attempt);
            log::warn!(
                "⚠️ 图片下载第 {}/{} 次失败（{}），{}ms 后重试",
                attempt,
                DOWNLOAD_ATTEMPTS,
                reason,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// 第 n 次失败后的等待时间：`180ms * 2^(n-1)`，再叠加至多一半的抖动。
    fn retry_delay(attempt: u32) -> Duration {
        let base = RETRY_BASE_DELAY.saturating_mul(1 << attempt.saturating_sub(1).min(4));
        let jitter_span = base.as_millis() as u64 / 2 + 1;
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or(0);

        base + Duration::from_millis(seed % jitter_span)
    }

    fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500..=599)
    }

    /// 在读取响应体之前拒绝非 2xx、非图片类型或声明体积超限的响应。
    fn check_download_headers(
        response: &reqwest::Response,
        config: &DescribeConfig,
    ) -> Result<(), DescribeError> {
        let status = response.status();
        if !status.is_success() {
            let reason = match status.as_u16() {
                403 => "访问被拒绝",
                404 => "未找到",
                500..=599 => "服务器错误",
                _ => "请求失败",
            };
            return Err(DescribeError::Load(format!("HTTP {}: {}", status.as_u16(), reason)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        if let Some(content_type) = content_type.filter(|ct| !Self::is_image_content_type(ct)) {
            return Err(DescribeError::Load(format!("不是图片类型：{}", content_type)));
        }

        match response.content_length() {
            Some(size) if size > config.max_file_size => Err(too_large("文件", size, config.max_file_size)),
            _ => Ok(()),
        }
    }

    /// `image/*`，忽略大小写与参数。
    fn is_image_content_type(value: &str) -> bool {
        let mime = value.split(';').next().unwrap_or_default().trim();
        mime.get(..6).is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    }

    /// 下载客户端：重定向次数受限，且每一跳都重新做内网检查。
    fn build_download_client(config: &DescribeConfig) -> Result<reqwest::Client, DescribeError> {
        let max_redirects = config.max_redirects;
        let allow_private_network = config.allow_private_network;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.error(format!("重定向次数超过限制（{}）", max_redirects))
            } else if !allow_private_network && Self::is_blocked_host(attempt.url()) {
                attempt.error("重定向目标为内网或本地地址")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(policy)
            .build()
            .map_err(|e| DescribeError::Load(format!("无法创建 HTTP 客户端：{}", e)))
    }

    /// 去掉凭据、查询串与片段，避免签名参数进入日志。
    pub(super) fn redact_url_for_log(url: &str) -> String {
        let Ok(mut parsed) = reqwest::Url::parse(url) else {
            return "<invalid-url>".to_string();
        };

        parsed.set_query(None);
        parsed.set_fragment(None);
        let _ = parsed.set_username("");
        let _ = parsed.set_password(None);

        parsed.to_string()
    }

    /// 解析 URL 并检查协议与主机，通过后返回解析结果。
    ///
    /// 未开启 `allow_private_network` 时拒绝本地与内网目标。
    fn validate_url_safety(url: &str, config: &DescribeConfig) -> Result<reqwest::Url, DescribeError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| DescribeError::Load(format!("URL 格式错误：{}", e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DescribeError::Load(format!("仅支持 HTTP/HTTPS，收到：{}", parsed.scheme())));
        }

        let Some(host) = parsed.host_str() else {
            return Err(DescribeError::Load("URL 缺少主机地址".to_string()));
        };

        if !config.allow_private_network && Self::is_blocked_host(&parsed) {
            return Err(DescribeError::Load(format!("禁止访问本地或内网地址：{}", host)));
        }

        Ok(parsed)
    }

    fn is_blocked_host(url: &reqwest::Url) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        match bare.parse::<IpAddr>() {
            Ok(ip) => Self::is_private_or_local_ip(ip),
            Err(_) => Self::is_local_hostname(bare),
        }
    }

    fn is_local_hostname(host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local")
    }

    /// 回环、私有、链路本地、CGNAT、文档示例段、组播与保留段。
    /// IPv4 映射的 IPv6 地址按其 IPv4 部分判断。
    fn is_private_or_local_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => matches!(
                v4.octets(),
                [0 | 10 | 127, ..]
                    | [100, 64..=127, ..]
                    | [169, 254, ..]
                    | [172, 16..=31, ..]
                    | [192, 168, ..]
                    | [192, 0, 2, _]
                    | [198, 51, 100, _]
                    | [203, 0, 113, _]
                    | [224..=255, ..]
            ),
            IpAddr::V6(v6) => {
                if let Some(v4) = v6.to_ipv4_mapped() {
                    return Self::is_private_or_local_ip(IpAddr::V4(v4));
                }

                let head = v6.segments()[0];
                v6.is_loopback()
                    || v6.is_unspecified()
                    || head & 0xfe00 == 0xfc00
                    || head & 0xffc0 == 0xfe80
                    || head & 0xff00 == 0xff00
            }
        }
    }

    /// Data URL 的媒体类型必须是图片；解码前按 `ceil(len / 4) * 3` 估算体积。
    fn decode_base64_payload(data: &str, max_file_size: u64) -> Result<Vec<u8>, DescribeError> {
        let data = data.trim();
        let payload = match data.strip_prefix("data:") {
            Some(rest) => {
                let (media_type, payload) = rest
                    .split_once(";base64,")
                    .ok_or_else(|| DescribeError::Load("Data URL 缺少 ;base64, 标记".to_string()))?;
                if !media_type.is_empty() && !Self::is_image_content_type(media_type) {
                    return Err(DescribeError::Load(format!("Data URL 不是图片类型：{}", media_type)));
                }
                payload
            }
            None => data,
        };

        let estimated = (payload.len() as u64).div_ceil(4).saturating_mul(3);
        if estimated > max_file_size {
            return Err(too_large("Base64 预计解码体积", estimated, max_file_size));
        }

        general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| DescribeError::Load(format!("Base64 解码失败：{}", e)))
    }

    fn map_download_error(err: reqwest::Error, url: &str, config: &DescribeConfig) -> DescribeError {
        if err.is_timeout() {
            return DescribeError::Load(format!("下载超时（{}秒）", config.download_timeout));
        }

        let detail = err.to_string().replace(url, &Self::redact_url_for_log(url));
        if err.is_connect() {
            DescribeError::Load(format!("无法连接：{}", detail))
        } else {
            DescribeError::Load(format!("请求失败：{}", detail))
        }
    }

    /// 按 magic bytes 判断是否为图片，不信任扩展名与响应头。
    fn validate_image_signature(bytes: &[u8]) -> Result<(), DescribeError> {
        if bytes.is_empty() {
            return Err(DescribeError::Load("图片内容为空".to_string()));
        }

        match infer::get(bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(()),
            Some(kind) => Err(DescribeError::Load(format!("文件签名不是图片类型：{}", kind.mime_type()))),
            None => Err(DescribeError::Load("无法识别图片类型".to_string())),
        }
    }
}
