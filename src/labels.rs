// 该文件是 Kanjian （看见） 项目的一部分。
// src/labels.rs - 类别名称表
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

use std::path::Path;

use thiserror::Error;
use tracing::info;

pub const COCO_LABELS: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取类别文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("类别文件为空")]
  Empty,
}

/// 进程生命周期内不变的类别名称表，按类别索引访问
#[derive(Debug, Clone)]
pub struct ClassNameTable {
  names: Box<[String]>,
}

impl Default for ClassNameTable {
  fn default() -> Self {
    Self::coco()
  }
}

impl ClassNameTable {
  pub fn coco() -> Self {
    Self {
      names: COCO_LABELS.iter().map(|name| name.to_string()).collect(),
    }
  }

  /// 每行一个类别名称，忽略空行
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let names: Box<[String]> = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect();

    if names.is_empty() {
      return Err(LabelError::Empty);
    }

    info!(
      "从 {} 加载 {} 个类别",
      path.as_ref().display(),
      names.len()
    );
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }
}
