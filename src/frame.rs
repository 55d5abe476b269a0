// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 原始帧与 NHWC 输入张量定义
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

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;

/// 采集设备输出的原始帧，交织 RGB 排列
pub type RawFrame = RgbImage;

/// 网络期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

/// NHWC 排列的 uint8 输入张量（N = 1）
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  /// 将原始帧拉伸缩放到 `size`x`size`（不保持长宽比，与训练时一致），并按网络要求排列通道
  pub fn from_raw(raw: &RawFrame, size: u32, order: ChannelOrder) -> Self {
    let resized = image::imageops::resize(raw, size, size, FilterType::Triangle);
    let mut data = resized.into_raw();

    if order == ChannelOrder::Bgr {
      for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
        pixel.swap(0, 2);
      }
    }

    Self {
      width: size as usize,
      height: size as usize,
      data: data.into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn stretches_to_square_input() {
    let raw = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
    let frame = RgbNhwcFrame::from_raw(&raw, 32, ChannelOrder::Rgb);

    assert_eq!(frame.width(), 32);
    assert_eq!(frame.height(), 32);
    assert_eq!(frame.as_nhwc().len(), 32 * 32 * frame.channels());
    assert_eq!(&frame.as_nhwc()[..3], &[10, 20, 30]);
  }

  #[test]
  fn bgr_order_swaps_red_and_blue() {
    let raw = RgbImage::from_pixel(8, 8, Rgb([200, 100, 0]));
    let frame = RgbNhwcFrame::from_raw(&raw, 4, ChannelOrder::Bgr);

    for pixel in frame.as_nhwc().chunks_exact(3) {
      assert_eq!(pixel, &[0, 100, 200]);
    }
  }
}
