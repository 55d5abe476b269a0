// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

use crate::{
  frame::ChannelOrder,
  input::CaptureConfig,
  model::{DetectorConfig, NmsPolicy},
  server::StreamConfig,
  task::Pacer,
};

/// Kanjian 实时检测推流服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理模型，如 rknn:///path/yolov8.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 采集来源
  /// - 摄像头: v4l:///dev/video0
  /// - 图片: image:///path/picture.jpg?frames=N
  /// - 测试图案: pattern:///?frames=N
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,

  /// HTTP 监听地址
  #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8000")]
  pub listen: SocketAddr,

  /// 采集宽度
  #[arg(long, default_value_t = 640, value_parser = clap::value_parser!(u32).range(1..))]
  pub width: u32,

  /// 采集高度
  #[arg(long, default_value_t = 480, value_parser = clap::value_parser!(u32).range(1..))]
  pub height: u32,

  /// 模型输入边长（正方形）
  #[arg(long, default_value_t = 640, value_parser = clap::value_parser!(u32).range(1..))]
  pub input_size: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD", value_parser = parse_unit)]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD", value_parser = parse_unit)]
  pub nms_threshold: f32,

  /// NMS 策略
  #[arg(long, value_enum, default_value_t = NmsPolicy::CrossClass)]
  pub nms_policy: NmsPolicy,

  /// 模型期望的通道顺序
  #[arg(long, value_enum, default_value_t = ChannelOrder::Rgb)]
  pub channel_order: ChannelOrder,

  /// 目标帧率
  #[arg(long, default_value_t = 30.0, value_name = "FPS", value_parser = parse_fps)]
  pub target_fps: f64,

  /// 每帧最短休眠时间（毫秒）
  #[arg(long, default_value_t = 10, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
  pub min_sleep_ms: u64,

  /// 统计推送间隔（毫秒）
  #[arg(long, default_value_t = 500, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
  pub stats_interval_ms: u64,

  /// JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
  pub jpeg_quality: u8,

  /// 类别名称文件，每行一个；缺省使用内置 COCO 类别
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
}

fn parse_unit(value: &str) -> Result<f32, String> {
  let parsed: f32 = value.parse().map_err(|e| format!("{}", e))?;
  if (0.0..=1.0).contains(&parsed) {
    Ok(parsed)
  } else {
    Err(format!("取值应在 0.0 到 1.0 之间，实际为 {}", parsed))
  }
}

fn parse_fps(value: &str) -> Result<f64, String> {
  let parsed: f64 = value.parse().map_err(|e| format!("{}", e))?;
  if parsed.is_finite() && parsed > 0.0 {
    Ok(parsed)
  } else {
    Err(format!("帧率必须为正数，实际为 {}", parsed))
  }
}

impl Args {
  pub fn capture_config(&self) -> CaptureConfig {
    CaptureConfig {
      width: self.width,
      height: self.height,
    }
  }

  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      input_size: self.input_size,
      channel_order: self.channel_order,
      confidence_threshold: self.confidence,
      nms_threshold: self.nms_threshold,
      nms_policy: self.nms_policy,
    }
  }

  pub fn stream_config(&self) -> StreamConfig {
    StreamConfig {
      pacer: Pacer::from_fps(self.target_fps, Duration::from_millis(self.min_sleep_ms)),
      stats_interval: Duration::from_millis(self.stats_interval_ms),
      jpeg_quality: self.jpeg_quality,
      ..StreamConfig::default()
    }
  }
}
