// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/postprocess.rs - 检测输出解码与非极大值抑制
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

use thiserror::Error;
use tracing::debug;

use crate::model::{DetectItem, DetectResult, RawOutput};

const BOX_CHANNELS: usize = 4;

/// 非极大值抑制的类别策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NmsPolicy {
  /// 不区分类别，不同类别的框也会互相抑制
  #[default]
  CrossClass,
  /// 只在同一类别内抑制
  PerClass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessConfig {
  /// 网络输入边长（正方形）
  pub input_size: u32,
  pub num_classes: usize,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub nms_policy: NmsPolicy,
}

#[derive(Error, Debug, PartialEq)]
pub enum PostprocessError {
  #[error("输出张量 {index} 大小异常: {len} 个元素无法按 {channels} 个通道划分")]
  MalformedOutput {
    index: usize,
    len: usize,
    channels: usize,
  },
  #[error("无效的网络输入尺寸: {0}")]
  InvalidInputSize(u32),
}

/// 将原始输出张量解码为原始帧像素坐标下的检测结果。
///
/// 每个输出张量按 `[4 + num_classes, anchors]` 解释，前四个通道为
/// `(cx, cy, w, h)`（网络输入像素坐标），其余为各类别得分。
/// 多个输出张量（多尺度检测头）的候选框合并后统一做 NMS。
pub fn postprocess(
  outputs: &[RawOutput],
  original_width: u32,
  original_height: u32,
  config: &PostprocessConfig,
) -> Result<DetectResult, PostprocessError> {
  if config.input_size == 0 {
    return Err(PostprocessError::InvalidInputSize(config.input_size));
  }

  let channels = BOX_CHANNELS + config.num_classes;
  let scale_x = original_width as f32 / config.input_size as f32;
  let scale_y = original_height as f32 / config.input_size as f32;

  let mut candidates = Vec::new();

  for (index, output) in outputs.iter().enumerate() {
    let data = output.as_slice();
    if data.len() % channels != 0 {
      return Err(PostprocessError::MalformedOutput {
        index,
        len: data.len(),
        channels,
      });
    }

    let anchors = data.len() / channels;
    for anchor in 0..anchors {
      let (class_id, score) = best_class(data, anchors, anchor, config.num_classes);

      if !(score > config.confidence_threshold) {
        continue;
      }

      let cx = data[anchor];
      let cy = data[anchors + anchor];
      let w = data[2 * anchors + anchor];
      let h = data[3 * anchors + anchor];

      candidates.push(DetectItem {
        class_id,
        score,
        bbox: [
          (cx - w / 2.0) * scale_x,
          (cy - h / 2.0) * scale_y,
          (cx + w / 2.0) * scale_x,
          (cy + h / 2.0) * scale_y,
        ],
      });
    }
  }

  if candidates.is_empty() {
    return Ok(DetectResult::default());
  }

  let before = candidates.len();
  let kept = non_max_suppression(candidates, config.nms_threshold, config.nms_policy);
  debug!("NMS: {} 个候选框保留 {} 个", before, kept.len());

  Ok(kept.into())
}

/// 返回 (类别索引, 得分)，得分相同时取较小的类别索引
fn best_class(data: &[f32], anchors: usize, anchor: usize, num_classes: usize) -> (usize, f32) {
  let mut best = (0, f32::NEG_INFINITY);
  for class_id in 0..num_classes {
    let score = data[(BOX_CHANNELS + class_id) * anchors + anchor];
    if score > best.1 {
      best = (class_id, score);
    }
  }
  best
}

fn non_max_suppression(
  mut candidates: Vec<DetectItem>,
  threshold: f32,
  policy: NmsPolicy,
) -> Vec<DetectItem> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept.iter().any(|item| {
      let comparable = match policy {
        NmsPolicy::CrossClass => true,
        NmsPolicy::PerClass => item.class_id == candidate.class_id,
      };
      comparable && iou(&item.bbox, &candidate.bbox) > threshold
    });

    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 两个 `[x_min, y_min, x_max, y_max]` 框的交并比；面积为零的框与任何框的交并比为 0
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);

  let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = inter_w * inter_h;
  let union = area(a) + area(b) - inter;

  if union <= 0.0 { 0.0 } else { inter / union }
}
