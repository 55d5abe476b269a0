// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/pattern.rs - 测试图案输入
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

use image::{Rgb, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  frame::RawFrame,
  input::{CaptureConfig, frame_limit},
};

#[derive(Error, Debug)]
pub enum PatternInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("无效的帧数参数: {0}")]
  InvalidFrameLimit(#[from] std::num::ParseIntError),
  #[error("无效的分辨率 {0}x{1}")]
  InvalidResolution(u32, u32),
}

/// 无摄像头时使用的滚动渐变图案
pub struct PatternInput {
  width: u32,
  height: u32,
  limit: Option<usize>,
  index: usize,
}

impl PatternInput {
  pub const SCHEME: &'static str = "pattern";

  pub fn open(url: &Url, config: CaptureConfig) -> Result<Self, PatternInputError> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(PatternInputError::SchemaMismatch);
    }

    if config.width == 0 || config.height == 0 {
      return Err(PatternInputError::InvalidResolution(
        config.width,
        config.height,
      ));
    }

    let limit = frame_limit(url)?;
    debug!(
      "打开测试图案 {}x{}, 帧数限制: {:?}",
      config.width, config.height, limit
    );

    Ok(PatternInput {
      width: config.width,
      height: config.height,
      limit,
      index: 0,
    })
  }
}

impl Iterator for PatternInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.limit.is_some_and(|limit| self.index >= limit) {
      return None;
    }

    let shift = self.index as u32;
    self.index += 1;

    Some(RgbImage::from_fn(self.width, self.height, |x, y| {
      Rgb([
        ((x + shift * 4) % 256) as u8,
        ((y + shift * 2) % 256) as u8,
        128,
      ])
    }))
  }
}

impl Drop for PatternInput {
  fn drop(&mut self) {
    debug!("关闭测试图案，共输出 {} 帧", self.index);
  }
}
