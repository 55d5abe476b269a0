// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use image::{ImageFormat, Rgb, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{frame::RawFrame, input::CaptureConfig};

const V4L_BUFFER_COUNT: u32 = 4;
// 连续解码失败超过该次数视为设备故障
const MAX_CONSECUTIVE_DECODE_FAILURES: usize = 30;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame decode error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Mjpeg,
  Yuyv,
  Rgb,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"MJPG" => Some(PixelFormat::Mjpeg),
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"RGB3" => Some(PixelFormat::Rgb),
      _ => None,
    }
  }
}

/// 一个 V4L2 采集会话，析构时停止取流并关闭设备
pub struct V4lInput {
  // 先于设备析构
  stream: Stream<'static>,
  _device: Device,
  device_path: String,
  format: PixelFormat,
  width: u32,
  height: u32,
}

impl V4lInput {
  pub const SCHEME: &'static str = "v4l";

  /// 打开 `v4l:///dev/video0`，优先使用 MJPG，其次 YUYV
  pub fn open(url: &Url, config: CaptureConfig) -> Result<Self, V4lInputError> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0".to_string()
    } else {
      url.path().to_string()
    };

    let device = Device::with_path(&device_path)?;

    let mut requested = device.format()?;
    requested.width = config.width;
    requested.height = config.height;
    requested.fourcc = FourCC::new(b"MJPG");
    let mut actual = device.set_format(&requested)?;

    if PixelFormat::from_fourcc(actual.fourcc).is_none() {
      requested.fourcc = FourCC::new(b"YUYV");
      actual = device.set_format(&requested)?;
    }

    let format = PixelFormat::from_fourcc(actual.fourcc)
      .ok_or_else(|| V4lInputError::UnsupportedPixelFormat(actual.fourcc.to_string()))?;

    let stream = Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)?;

    info!(
      "摄像头已打开: {} {}x{} [{}]",
      device_path, actual.width, actual.height, actual.fourcc
    );

    Ok(V4lInput {
      stream,
      _device: device,
      device_path,
      format,
      width: actual.width,
      height: actual.height,
    })
  }

  fn capture_frame(&mut self) -> Result<RawFrame, V4lInputError> {
    let (data, _meta) = CaptureStream::next(&mut self.stream)?;

    match self.format {
      PixelFormat::Mjpeg => {
        Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8())
      }
      PixelFormat::Yuyv => yuyv_to_rgb(data, self.width, self.height),
      PixelFormat::Rgb => {
        let expected = (self.width * self.height * 3) as usize;
        if data.len() < expected {
          return Err(V4lInputError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          });
        }
        RgbImage::from_raw(self.width, self.height, data[..expected].to_vec()).ok_or(
          V4lInputError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          },
        )
      }
    }
  }
}

impl Iterator for V4lInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let mut failures = 0;
    loop {
      match self.capture_frame() {
        Ok(frame) => return Some(frame),
        Err(V4lInputError::IoError(e)) => {
          error!("读取摄像头 {} 失败: {}", self.device_path, e);
          return None;
        }
        Err(e) => {
          failures += 1;
          warn!("丢弃无法解码的帧: {}", e);
          if failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
            error!("连续 {} 帧解码失败，停止采集", failures);
            return None;
          }
        }
      }
    }
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    info!("释放摄像头: {}", self.device_path);
  }
}

/// YUYV (YUV 4:2:2, BT.601) 转 RGB，每 4 字节描述 2 个像素
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, V4lInputError> {
  let expected = (width * height * 2) as usize;
  if data.len() < expected {
    return Err(V4lInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let convert = |y: f32, u: f32, v: f32| {
    Rgb([
      (y + 1.402 * v).clamp(0.0, 255.0) as u8,
      (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8,
      (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ])
  };

  let mut image = RgbImage::new(width, height);
  for (i, chunk) in data[..expected].chunks_exact(4).enumerate() {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    let pixel = i as u32 * 2;
    let (x, y) = (pixel % width, pixel / width);

    image.put_pixel(x, y, convert(chunk[0] as f32, u, v));
    if x + 1 < width {
      image.put_pixel(x + 1, y, convert(chunk[2] as f32, u, v));
    }
  }
  Ok(image)
}
