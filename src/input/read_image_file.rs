// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RawFrame, input::frame_limit};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("无效的帧数参数: {0}")]
  InvalidFrameLimit(#[from] std::num::ParseIntError),
}

/// 将一张静态图片作为视频流反复输出
pub struct ImageFileInput {
  image: RgbImage,
  limit: Option<usize>,
  emitted: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let limit = frame_limit(url)?;
    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    info!(
      "读取图像文件: {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      image,
      limit,
      emitted: 0,
    })
  }
}

impl ImageFileInput {
  pub fn open(url: &Url) -> Result<Self, ImageFileInputError> {
    Self::from_url(url)
  }
}

impl Iterator for ImageFileInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.limit.is_some_and(|limit| self.emitted >= limit) {
      return None;
    }
    self.emitted += 1;
    Some(self.image.clone())
  }
}
