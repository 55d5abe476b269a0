// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/detector.rs - 检测器：预处理、推理与后处理
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

use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{ChannelOrder, RawFrame, RgbNhwcFrame},
  labels::ClassNameTable,
  model::{
    DetectResult, DeviceError, InferenceDevice, Model, NmsPolicy, PostprocessConfig,
    PostprocessError, postprocess,
  },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub input_size: u32,
  pub channel_order: ChannelOrder,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub nms_policy: NmsPolicy,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_size: 640,
      channel_order: ChannelOrder::Rgb,
      confidence_threshold: 0.5,
      nms_threshold: 0.5,
      nms_policy: NmsPolicy::CrossClass,
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("推理错误: {0}")]
  Device(#[from] DeviceError),
  #[error("后处理错误: {0}")]
  Postprocess(#[from] PostprocessError),
}

pub struct Detector {
  device: Arc<dyn InferenceDevice>,
  labels: Arc<ClassNameTable>,
  config: DetectorConfig,
}

impl Detector {
  pub fn new(
    device: Arc<dyn InferenceDevice>,
    labels: Arc<ClassNameTable>,
    config: DetectorConfig,
  ) -> Self {
    Self {
      device,
      labels,
      config,
    }
  }

  pub fn labels(&self) -> &Arc<ClassNameTable> {
    &self.labels
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  fn postprocess_config(&self) -> PostprocessConfig {
    PostprocessConfig {
      input_size: self.config.input_size,
      num_classes: self.labels.len(),
      confidence_threshold: self.config.confidence_threshold,
      nms_threshold: self.config.nms_threshold,
      nms_policy: self.config.nms_policy,
    }
  }
}

impl Model for Detector {
  type Input = RawFrame;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&self, frame: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (width, height) = frame.dimensions();
    let tensor = RgbNhwcFrame::from_raw(frame, self.config.input_size, self.config.channel_order);

    let now = Instant::now();
    let outputs = self.device.infer(&tensor)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    let result = postprocess(&outputs, width, height, &self.postprocess_config())?;
    debug!("检测到 {} 个物体", result.len());
    Ok(result)
  }
}
