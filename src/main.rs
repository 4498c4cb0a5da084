//! # 艺术品区块描述工具：命令行入口
//!
//! 本文件仅负责参数解析、配置合并与结果输出。
//! 业务逻辑分布在 `describe` 子模块中，详见 `lib.rs` 架构文档。

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use talk_art::describe::{
    DescribeConfig, DescribeService, DescribeSnapshot, ImageSource, PerformanceProfile, Region,
    ScreenRect,
};
use talk_art::error::AppError;

/// Tile an artwork into a fixed grid, caption every region and map the grid onto a viewport.
#[derive(Parser, Debug)]
#[command(name = "talk-art")]
#[command(about = "🖼️ Split an artwork into regions and fetch a caption for each one")]
struct Args {
    /// Image source: local path, http(s) URL or data URL
    source: String,

    /// JSON config file; missing keys fall back to defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Captioning service endpoint
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Tile edge length in pixels
    #[arg(long)]
    region_size: Option<u32>,

    /// Long-edge cap in pixels before tiling
    #[arg(long)]
    max_size: Option<u32>,

    /// Performance profile: quality, balanced or speed
    #[arg(short, long)]
    profile: Option<String>,

    /// Displayed image size, e.g. 800x600; prints screen rectangles
    #[arg(long, value_parser = parse_viewport)]
    viewport: Option<(f64, f64)>,

    /// Client-space point to hit-test, e.g. 120,45
    #[arg(long, requires = "viewport", value_parser = parse_point)]
    point: Option<(f64, f64)>,

    /// Write the encoded canvas (JPEG) to this file
    #[arg(long)]
    save_canvas: Option<PathBuf>,
}

#[derive(Serialize)]
struct CliOutput<'a> {
    #[serde(flatten)]
    snapshot: &'a DescribeSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    screen_regions: Option<Vec<ScreenRect>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hit: Option<Option<Region>>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        log::error!("❌ 运行失败 [{}]: {}", err.code(), err);
        let body = serde_json::json!({ "error": err, "code": err.code() });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
        );
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = build_config(&args)?;
    let service = DescribeService::with_config(config)?;
    if let Some(profile) = requested_profile(&args)? {
        service.set_performance_profile(profile)?;
    }
    log::info!("⚙️ 当前性能档位：{}", service.get_performance_profile()?.as_str());

    let snapshot = service.describe(ImageSource::detect(&args.source)).await?;

    if let Some(path) = &args.save_canvas {
        let jpeg = snapshot
            .canvas_jpeg
            .as_ref()
            .ok_or_else(|| AppError::Output("当前没有可保存的画布".to_string()))?;
        std::fs::write(path, jpeg)?;
        log::info!("💾 画布已保存 - {}", path.display());
    }

    let (screen_regions, hit) = match args.viewport {
        Some((width, height)) => {
            let rects = service.screen_regions(width, height)?;
            let hit = match args.point {
                Some((x, y)) => Some(service.region_at(width, height, x, y)?),
                None => None,
            };
            (Some(rects), hit)
        }
        None => (None, None),
    };

    let output = CliOutput {
        snapshot: &snapshot,
        screen_regions,
        hit,
    };
    let text = serde_json::to_string_pretty(&output).map_err(|e| AppError::Output(e.to_string()))?;
    println!("{}", text);

    Ok(())
}

/// 合并配置：文件 → 默认值补齐 → 命令行覆盖。
fn build_config(args: &Args) -> Result<DescribeConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => DescribeConfig::from_json_file(path)?,
        None => DescribeConfig::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.caption_endpoint = endpoint.clone();
    }
    if let Some(region_size) = args.region_size {
        config.region_size = region_size;
    }
    if let Some(max_size) = args.max_size {
        config.max_size = max_size;
    }

    Ok(config)
}

/// 解析 `--profile`；未指定时沿用配置推断出的档位。
fn requested_profile(args: &Args) -> Result<Option<PerformanceProfile>, AppError> {
    args.profile
        .as_deref()
        .map(PerformanceProfile::parse)
        .transpose()
        .map_err(AppError::from)
}

fn parse_viewport(value: &str) -> Result<(f64, f64), String> {
    parse_pair(value, 'x').and_then(|(w, h)| {
        if w > 0.0 && h > 0.0 {
            Ok((w, h))
        } else {
            Err(format!("viewport must be positive, got {}", value))
        }
    })
}

fn parse_point(value: &str) -> Result<(f64, f64), String> {
    parse_pair(value, ',')
}

fn parse_pair(value: &str, separator: char) -> Result<(f64, f64), String> {
    let (a, b) = value
        .split_once(separator)
        .ok_or_else(|| format!("expected two numbers separated by '{}', got {}", separator, value))?;

    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("invalid number: {}", s))
    };

    Ok((parse(a)?, parse(b)?))
}
