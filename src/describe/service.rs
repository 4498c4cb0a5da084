//! # 服务层（状态容器）
//!
//! ## 设计思路
//!
//! `DescribeService` 持有“当前选择”和“当前区块列表”，以不可变快照 `Arc<DescribeSnapshot>`
//! 的形式整体替换发布，读取方永远不会看到半更新的状态。
//!
//! 每次运行领取一个单调递增的代号（generation）。新的选择会取代仍在进行中的旧运行：
//! 旧运行的结果晚到时代号已不是最新，直接丢弃并返回 `Superseded`。
//!
//! ## 实现思路
//!
//! - `begin_run`：代号 +1，并立即发布一个 `processing` 快照（清空旧网格）。
//! - 准备阶段失败（`Load` / `Encode`）→ 发布 `failed` 快照并返回错误。
//! - 描述阶段失败 → 发布 `degraded` 快照，网格可用但无描述，返回 `Ok`。
//! - `publish` 在同一把写锁内比对代号并替换快照。

use serde::Serialize;
use std::sync::{Arc, RwLock};

use super::correlator::CaptionedGrid;
use super::error::ErrorInfo;
use super::handler::PreparedGrid;
use super::source::{GridLayout, ImageSource, Region};
use super::viewport::{self, ScreenRect, ViewportScale};
use super::{DescribeConfig, DescribeError, DescribeHandler, PerformanceProfile};

/// 快照状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DescribeStatus {
    /// 尚未选择图片。
    Idle,
    /// 运行中，网格尚未就绪。
    Processing,
    /// 网格与描述均已就绪。
    Ready,
    /// 网格可用，描述缺失（请求或响应失败）。
    Degraded,
    /// 加载或编码失败，无网格。
    Failed,
}

/// 对外发布的不可变状态。
#[derive(Debug, Clone, Serialize)]
pub struct DescribeSnapshot {
    pub generation: u64,
    pub status: DescribeStatus,
    pub source: Option<String>,
    pub layout: Option<GridLayout>,
    pub overall: Option<String>,
    pub regions: Vec<Region>,
    pub error: Option<ErrorInfo>,
    /// 本次发送的 JPEG 画布，随网格一起保留到下一次选择。
    #[serde(skip)]
    pub canvas_jpeg: Option<Arc<[u8]>>,
}

impl DescribeSnapshot {
    fn idle() -> Self {
        Self {
            generation: 0,
            status: DescribeStatus::Idle,
            source: None,
            layout: None,
            overall: None,
            regions: Vec::new(),
            error: None,
            canvas_jpeg: None,
        }
    }

    fn processing(generation: u64, source: &ImageSource) -> Self {
        Self {
            generation,
            status: DescribeStatus::Processing,
            source: Some(source.label()),
            ..Self::idle()
        }
    }

    fn failed(generation: u64, source: &ImageSource, error: &DescribeError) -> Self {
        Self {
            generation,
            status: DescribeStatus::Failed,
            source: Some(source.label()),
            error: Some(ErrorInfo::from(error)),
            ..Self::idle()
        }
    }

    fn from_caption_result(
        generation: u64,
        source: &ImageSource,
        grid: &PreparedGrid,
        result: Result<CaptionedGrid, DescribeError>,
    ) -> Self {
        let base = Self {
            generation,
            source: Some(source.label()),
            layout: Some(grid.layout),
            canvas_jpeg: Some(Arc::from(grid.payload.jpeg.as_slice())),
            ..Self::idle()
        };

        match result {
            Ok(captioned) => Self {
                status: DescribeStatus::Ready,
                overall: Some(captioned.overall),
                regions: captioned.regions,
                ..base
            },
            Err(error) => Self {
                status: DescribeStatus::Degraded,
                regions: grid.tiles.iter().map(Region::uncaptioned).collect(),
                error: Some(ErrorInfo::from(&error)),
                ..base
            },
        }
    }
}

struct ServiceState {
    latest_generation: u64,
    snapshot: Arc<DescribeSnapshot>,
}

/// 描述服务。
pub struct DescribeService {
    handler: DescribeHandler,
    state: RwLock<ServiceState>,
}

impl DescribeService {
    /// 使用默认配置创建服务。
    pub fn new() -> Result<Self, DescribeError> {
        Self::with_config(DescribeConfig::default())
    }

    /// 使用自定义配置创建服务。
    ///
    /// # 示例
    /// ```rust
    /// use talk_art::describe::{DescribeConfig, DescribeService, DescribeStatus};
    ///
    /// let service = DescribeService::with_config(DescribeConfig::default())?;
    /// assert_eq!(service.current()?.status, DescribeStatus::Idle);
    /// # Ok::<(), talk_art::describe::DescribeError>(())
    /// ```
    pub fn with_config(config: DescribeConfig) -> Result<Self, DescribeError> {
        Ok(Self {
            handler: DescribeHandler::new(config)?,
            state: RwLock::new(ServiceState {
                latest_generation: 0,
                snapshot: Arc::new(DescribeSnapshot::idle()),
            }),
        })
    }

    /// 执行完整链路：加载 → 规范化 → 切分 → 编码 → 描述 → 发布。
    ///
    /// 描述失败不会返回错误，而是发布 `degraded` 快照。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use talk_art::describe::{DescribeService, ImageSource};
    ///
    /// # async fn demo() -> Result<(), talk_art::describe::DescribeError> {
    /// let service = DescribeService::new()?;
    /// let snapshot = service
    ///     .describe(ImageSource::FilePath("art/the-kiss.jpg".into()))
    ///     .await?;
    /// println!("{:?}", snapshot.overall);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn describe(&self, source: ImageSource) -> Result<Arc<DescribeSnapshot>, DescribeError> {
        let generation = self.begin_run(&source)?;
        let config = self.handler.config_snapshot()?;

        let grid = match DescribeHandler::prepare(&source, &config).await {
            Ok(grid) => grid,
            Err(error) => {
                log::error!("❌ 运行 #{} 失败 [{}]: {}", generation, error.code(), error);
                self.publish_or_discard(generation, DescribeSnapshot::failed(generation, &source, &error))?;
                return Err(error);
            }
        };

        let result = DescribeHandler::caption(&grid, &config).await;
        let snapshot = DescribeSnapshot::from_caption_result(generation, &source, &grid, result);
        let published = self.publish_or_discard(generation, snapshot)?;

        log::info!(
            "📌 运行 #{} 已发布 - 状态: {:?} 区块: {}",
            generation,
            published.status,
            published.regions.len()
        );

        Ok(published)
    }

    /// 读取当前快照。
    pub fn current(&self) -> Result<Arc<DescribeSnapshot>, DescribeError> {
        self.state
            .read()
            .map(|state| Arc::clone(&state.snapshot))
            .map_err(|_| DescribeError::Validation("状态读取锁已中毒".to_string()))
    }

    /// 将当前区块投影到给定显示尺寸。
    pub fn screen_regions(&self, client_width: f64, client_height: f64) -> Result<Vec<ScreenRect>, DescribeError> {
        let snapshot = self.current()?;
        let layout = Self::require_layout(&snapshot)?;
        let scale = ViewportScale::compute(client_width, client_height, &layout)?;

        Ok(viewport::map_regions(&snapshot.regions, &layout, scale))
    }

    /// 命中测试：返回显示坐标下的区块。
    pub fn region_at(
        &self,
        client_width: f64,
        client_height: f64,
        x: f64,
        y: f64,
    ) -> Result<Option<Region>, DescribeError> {
        let snapshot = self.current()?;
        let layout = Self::require_layout(&snapshot)?;
        let scale = ViewportScale::compute(client_width, client_height, &layout)?;

        Ok(viewport::region_at(x, y, &layout, scale).and_then(|index| snapshot.regions.get(index).cloned()))
    }

    /// 切换性能档位，从下一次 `describe` 开始生效。
    pub fn set_performance_profile(&self, profile: PerformanceProfile) -> Result<(), DescribeError> {
        self.handler.set_performance_profile(profile)
    }

    pub fn get_performance_profile(&self) -> Result<PerformanceProfile, DescribeError> {
        self.handler.get_performance_profile()
    }

    /// 领取新代号并发布 `processing` 快照。
    fn begin_run(&self, source: &ImageSource) -> Result<u64, DescribeError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DescribeError::Validation("状态写入锁已中毒".to_string()))?;

        state.latest_generation += 1;
        let generation = state.latest_generation;
        state.snapshot = Arc::new(DescribeSnapshot::processing(generation, source));

        log::info!("🎬 运行 #{} 开始 - 来源: {}", generation, source.label());
        Ok(generation)
    }

    /// 代号仍为最新时替换快照；过期返回 `None`。
    fn publish(&self, generation: u64, snapshot: DescribeSnapshot) -> Result<Option<Arc<DescribeSnapshot>>, DescribeError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DescribeError::Validation("状态写入锁已中毒".to_string()))?;

        if state.latest_generation != generation {
            return Ok(None);
        }

        let snapshot = Arc::new(snapshot);
        state.snapshot = Arc::clone(&snapshot);
        Ok(Some(snapshot))
    }

    fn publish_or_discard(
        &self,
        generation: u64,
        snapshot: DescribeSnapshot,
    ) -> Result<Arc<DescribeSnapshot>, DescribeError> {
        self.publish(generation, snapshot)?.ok_or_else(|| {
            log::info!("🗑️ 运行 #{} 的结果已过期，丢弃", generation);
            DescribeError::Superseded(format!("运行 #{} 已被更新的选择取代", generation))
        })
    }

    fn require_layout(snapshot: &DescribeSnapshot) -> Result<GridLayout, DescribeError> {
        snapshot
            .layout
            .ok_or_else(|| DescribeError::Validation("当前没有可映射的网格".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    fn png_data_url(width: u32, height: u32) -> ImageSource {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(width, height, Rgba([200, 40, 40, 255])));
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode png failed");
        ImageSource::Base64(format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(cursor.into_inner())
        ))
    }

    fn read_request(stream: &mut std::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).expect("read request failed");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn write_json(stream: &mut std::net::TcpStream, body: &str) {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream
            .write_all(response.as_bytes())
            .expect("write response failed");
    }

    fn config_with_endpoint(endpoint: String) -> DescribeConfig {
        DescribeConfig {
            caption_endpoint: endpoint,
            caption_timeout: 10,
            ..DescribeConfig::default()
        }
    }

    #[test]
    fn new_service_starts_idle() {
        let service = DescribeService::new().expect("create service failed");
        let snapshot = service.current().expect("read snapshot failed");

        assert_eq!(snapshot.status, DescribeStatus::Idle);
        assert_eq!(snapshot.generation, 0);
        assert!(matches!(
            service.screen_regions(100.0, 100.0),
            Err(DescribeError::Validation(_))
        ));
    }

    #[test]
    fn profile_switch_is_visible_through_service() {
        let service = DescribeService::new().expect("create service failed");

        service
            .set_performance_profile(PerformanceProfile::Quality)
            .expect("set profile failed");

        assert_eq!(
            service.get_performance_profile().expect("get profile failed"),
            PerformanceProfile::Quality
        );
    }

    #[test]
    fn stale_generation_is_not_published() {
        let service = DescribeService::new().expect("create service failed");
        let source = ImageSource::FilePath("a.png".into());

        let first = service.begin_run(&source).expect("begin run failed");
        let second = service.begin_run(&source).expect("begin run failed");

        let stale = DescribeSnapshot::failed(first, &source, &DescribeError::Load("late".into()));
        assert!(service.publish(first, stale).expect("publish failed").is_none());

        let current = service.current().expect("read snapshot failed");
        assert_eq!(current.generation, second);
        assert_eq!(current.status, DescribeStatus::Processing);
    }

    #[tokio::test]
    async fn captions_are_published_as_ready_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server failed");
        let addr = listener.local_addr().expect("read local addr failed");
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let request = read_request(&mut stream);
            assert!(request.contains("\"imageBase64\""));
            assert!(request.contains("\"coords\":[200,0]"));
            write_json(
                &mut stream,
                r#"{"overall":"two red squares","regions":[{"coords":[0,0],"caption":"left"},{"coords":[200,0],"caption":"right"}]}"#,
            );
        });

        let service = DescribeService::with_config(config_with_endpoint(format!("http://{}/api/describe", addr)))
            .expect("create service failed");
        let snapshot = service.describe(png_data_url(400, 200)).await.expect("describe failed");
        server.join().expect("mock server thread failed");

        assert_eq!(snapshot.status, DescribeStatus::Ready);
        assert_eq!(snapshot.overall.as_deref(), Some("two red squares"));
        assert_eq!(snapshot.regions[1].caption, "right");
        assert!(snapshot.canvas_jpeg.as_ref().is_some_and(|jpeg| jpeg.starts_with(&[0xFF, 0xD8])));

        let hit = service
            .region_at(200.0, 100.0, 150.0, 50.0)
            .expect("hit test failed")
            .expect("point should hit a region");
        assert_eq!(hit.caption, "right");
    }

    #[tokio::test]
    async fn unreachable_caption_service_degrades() {
        let port = TcpListener::bind("127.0.0.1:0")
            .expect("bind failed")
            .local_addr()
            .expect("read local addr failed")
            .port();

        let service = DescribeService::with_config(config_with_endpoint(format!("http://127.0.0.1:{}/api/describe", port)))
            .expect("create service failed");
        let snapshot = service.describe(png_data_url(300, 150)).await.expect("describe failed");

        assert_eq!(snapshot.status, DescribeStatus::Degraded);
        assert_eq!(snapshot.regions.len(), 2);
        assert!(snapshot.regions.iter().all(|r| !r.has_caption()));
        assert_eq!(snapshot.error.as_ref().map(|e| e.code), Some("E_TRANSPORT"));
        assert_eq!(service.screen_regions(400.0, 200.0).expect("mapping failed").len(), 2);
    }

    #[tokio::test]
    async fn load_failure_publishes_failed_snapshot() {
        let service = DescribeService::new().expect("create service failed");

        let result = service
            .describe(ImageSource::FilePath("/definitely/missing/art.png".into()))
            .await;

        assert!(matches!(result, Err(DescribeError::Load(_))));
        let snapshot = service.current().expect("read snapshot failed");
        assert_eq!(snapshot.status, DescribeStatus::Failed);
        assert!(snapshot.layout.is_none());
        assert_eq!(snapshot.error.as_ref().map(|e| e.fatal), Some(true));
    }

    #[tokio::test]
    async fn late_result_from_superseded_run_is_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server failed");
        let addr = listener.local_addr().expect("read local addr failed");
        let (arrived_tx, arrived_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // 旧运行的请求挂起，直到新运行发布完成后才回复。
        let server = thread::spawn(move || {
            let (mut slow_stream, _) = listener.accept().expect("accept slow request failed");
            let request = read_request(&mut slow_stream);
            assert_eq!(request.matches("\"coords\"").count(), 1);
            arrived_tx.send(()).expect("signal arrival failed");

            let (mut fast_stream, _) = listener.accept().expect("accept fast request failed");
            read_request(&mut fast_stream);
            write_json(&mut fast_stream, r#"{"overall":"fast","regions":[{"caption":"a"},{"caption":"b"}]}"#);

            release_rx.recv().expect("wait for release failed");
            write_json(&mut slow_stream, r#"{"overall":"slow","regions":[{"caption":"old"}]}"#);
        });

        let service = Arc::new(
            DescribeService::with_config(config_with_endpoint(format!("http://{}/api/describe", addr)))
                .expect("create service failed"),
        );

        let slow = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.describe(png_data_url(200, 200)).await })
        };
        tokio::task::spawn_blocking(move || arrived_rx.recv())
            .await
            .expect("arrival task panicked")
            .expect("slow request never arrived");

        let fast = service.describe(png_data_url(400, 200)).await.expect("describe failed");
        release_tx.send(()).expect("release slow response failed");

        let slow_result = slow.await.expect("slow task panicked");
        server.join().expect("mock server thread failed");

        assert!(matches!(slow_result, Err(DescribeError::Superseded(_))));
        assert_eq!(fast.overall.as_deref(), Some("fast"));

        let current = service.current().expect("read snapshot failed");
        assert_eq!(current.generation, fast.generation);
        assert_eq!(current.overall.as_deref(), Some("fast"));
        assert_eq!(current.regions.len(), 2);
    }
}
