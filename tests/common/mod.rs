// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 集成测试用的模拟设备与采集源
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

#![allow(dead_code)]

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use image::{Rgb, RgbImage};
use kanjian::{
  frame::{RawFrame, RgbNhwcFrame},
  input::{CaptureConfig, CaptureSource, FrameStream, InputError},
  labels::{COCO_LABELS, ClassNameTable},
  model::{Detector, DetectorConfig, DeviceError, InferenceDevice, RawOutput},
  output::Draw,
  server::{AppState, StreamConfig},
  task::{Pacer, Shutdown},
};

pub const INPUT_SIZE: u32 = 64;
pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;

/// 每次推理返回 `boxes` 个互不重叠、置信度 0.9 的 person 框
pub struct ScriptedDevice {
  boxes: usize,
}

impl ScriptedDevice {
  pub fn new(boxes: usize) -> Self {
    assert!(boxes <= 8, "输入宽度内最多放下 8 个互不重叠的框");
    Self { boxes }
  }

  fn output(&self) -> Vec<f32> {
    let anchors = self.boxes.max(1);
    let channels = 4 + COCO_LABELS.len();
    let mut data = vec![0.0f32; channels * anchors];
    for a in 0..self.boxes {
      data[a] = 4.0 + 8.0 * a as f32; // cx
      data[anchors + a] = 32.0; // cy
      data[2 * anchors + a] = 6.0; // w
      data[3 * anchors + a] = 6.0; // h
      data[4 * anchors + a] = 0.9; // person
    }
    data
  }
}

impl InferenceDevice for ScriptedDevice {
  fn infer(&self, input: &RgbNhwcFrame) -> Result<Vec<RawOutput>, DeviceError> {
    assert_eq!(input.as_nhwc().len(), (INPUT_SIZE * INPUT_SIZE * 3) as usize);
    Ok(vec![RawOutput::from(self.output())])
  }

  fn release(&self) {}
}

/// 记录打开次数与当前占用数的采集源
#[derive(Default)]
pub struct CountingSource {
  limit: Option<usize>,
  failing_opens: AtomicUsize,
  opened: Arc<AtomicUsize>,
  active: Arc<AtomicUsize>,
}

impl CountingSource {
  pub fn new(limit: Option<usize>) -> Self {
    Self {
      limit,
      ..Self::default()
    }
  }

  /// 前 `count` 次打开失败，模拟设备被占用或不存在
  pub fn failing_first(count: usize) -> Self {
    Self {
      failing_opens: AtomicUsize::new(count),
      ..Self::default()
    }
  }

  pub fn opened(&self) -> usize {
    self.opened.load(Ordering::SeqCst)
  }

  pub fn active(&self) -> usize {
    self.active.load(Ordering::SeqCst)
  }
}

struct CountingStream {
  remaining: Option<usize>,
  active: Arc<AtomicUsize>,
}

impl Iterator for CountingStream {
  type Item = RawFrame;

  fn next(&mut self) -> Option<RawFrame> {
    if let Some(remaining) = self.remaining.as_mut() {
      if *remaining == 0 {
        return None;
      }
      *remaining -= 1;
    }
    Some(RgbImage::from_pixel(
      FRAME_WIDTH,
      FRAME_HEIGHT,
      Rgb([40, 90, 160]),
    ))
  }
}

impl Drop for CountingStream {
  fn drop(&mut self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}

impl CaptureSource for CountingSource {
  fn open(&self) -> Result<FrameStream, InputError> {
    let failing = self
      .failing_opens
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failing {
      return Err(InputError::SchemeMismatch("unavailable".to_string()));
    }

    self.opened.fetch_add(1, Ordering::SeqCst);
    self.active.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(CountingStream {
      remaining: self.limit,
      active: self.active.clone(),
    }))
  }
}

pub fn app_state(boxes: usize, source: Arc<CountingSource>) -> AppState {
  let detector = Detector::new(
    Arc::new(ScriptedDevice::new(boxes)),
    Arc::new(ClassNameTable::coco()),
    DetectorConfig {
      input_size: INPUT_SIZE,
      ..DetectorConfig::default()
    },
  );
  let config = StreamConfig {
    pacer: Pacer::new(Duration::from_millis(2), Duration::from_millis(1)),
    stats_interval: Duration::from_millis(20),
    jpeg_quality: 75,
    drain_timeout: Duration::from_millis(500),
  };

  AppState::new(
    source,
    Arc::new(detector),
    Arc::new(Draw::new().unwrap()),
    CaptureConfig {
      width: FRAME_WIDTH,
      height: FRAME_HEIGHT,
    },
    config,
    Shutdown::new(),
  )
}
