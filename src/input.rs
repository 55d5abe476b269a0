// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 视频/图像采集输入
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
use url::Url;

#[cfg(feature = "read_image_file")]
use crate::FromUrlWithScheme;
use crate::frame::RawFrame;

/// 一次会话独占的采集句柄。迭代结束表示设备关闭或流结束，析构即释放设备。
pub type FrameStream = Box<dyn Iterator<Item = RawFrame>>;

/// 采集设备工厂，每个视频连接调用一次 [`CaptureSource::open`]
pub trait CaptureSource: Send + Sync {
  fn open(&self) -> Result<FrameStream, InputError>;
}

/// 期望的采集分辨率，驱动可能调整为最接近的受支持值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
  pub width: u32,
  pub height: u32,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      width: 640,
      height: 480,
    }
  }
}

mod pattern;
pub use self::pattern::{PatternInput, PatternInputError};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l2_input")]
mod v4l_input;
#[cfg(feature = "v4l2_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("测试图案输入错误: {0}")]
  PatternInputError(#[from] PatternInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l2_input")]
  #[error("V4L2 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("不支持的输入方案: {0}")]
  SchemeMismatch(String),
}

/// 由 URL 描述的采集来源：
/// - `v4l:///dev/video0`
/// - `image:///path/to/picture.jpg?frames=100`
/// - `pattern:///?frames=100`
#[derive(Debug, Clone)]
pub struct InputSource {
  url: Url,
  config: CaptureConfig,
}

impl InputSource {
  pub fn new(url: Url, config: CaptureConfig) -> Result<Self, InputError> {
    let supported = match url.scheme() {
      PatternInput::SCHEME => true,
      #[cfg(feature = "read_image_file")]
      ImageFileInput::SCHEME => true,
      #[cfg(feature = "v4l2_input")]
      V4lInput::SCHEME => true,
      _ => false,
    };

    if !supported {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self { url, config })
  }
}

impl CaptureSource for InputSource {
  fn open(&self) -> Result<FrameStream, InputError> {
    match self.url.scheme() {
      PatternInput::SCHEME => Ok(Box::new(PatternInput::open(&self.url, self.config)?)),
      #[cfg(feature = "read_image_file")]
      ImageFileInput::SCHEME => Ok(Box::new(ImageFileInput::open(&self.url)?)),
      #[cfg(feature = "v4l2_input")]
      V4lInput::SCHEME => Ok(Box::new(V4lInput::open(&self.url, self.config)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

/// 读取 URL 中的 `frames=N` 参数，缺省表示无限帧
fn frame_limit(url: &Url) -> Result<Option<usize>, std::num::ParseIntError> {
  url
    .query_pairs()
    .find(|(key, _)| key == "frames")
    .map(|(_, value)| value.parse::<usize>())
    .transpose()
}
