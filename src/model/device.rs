// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/device.rs - 推理设备接口
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

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::frame::RgbNhwcFrame;

/// 加速器的一个输出张量，逻辑形状为 [4 + 类别数, 锚点数]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawOutput {
  data: Vec<f32>,
}

impl From<Vec<f32>> for RawOutput {
  fn from(data: Vec<f32>) -> Self {
    Self { data }
  }
}

impl RawOutput {
  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 黑盒推理设备。
///
/// 实现需要自行保证并发安全：若加速器只允许单路推理，应在内部串行化调用。
pub trait InferenceDevice: Send + Sync {
  fn infer(&self, input: &RgbNhwcFrame) -> Result<Vec<RawOutput>, DeviceError>;

  /// 释放设备资源，之后的推理调用返回 [`DeviceError::Released`]
  fn release(&self);
}

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[cfg(feature = "rknpu_backend")]
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[cfg(feature = "rknpu_backend")]
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理后端未启用: {0}")]
  BackendDisabled(String),
  #[error("推理设备已释放")]
  Released,
  #[error("推理失败: {0}")]
  InferenceFailed(String),
}

#[cfg(feature = "rknpu_backend")]
impl From<rknpu::Error> for DeviceError {
  fn from(err: rknpu::Error) -> Self {
    DeviceError::RknnError(err)
  }
}

impl DeviceError {
  #[cfg(feature = "rknpu_backend")]
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    DeviceError::ModelInvalid(msg.to_string(), e)
  }

  /// 启动失败时的进程退出码
  pub fn exit_code(&self) -> i32 {
    match self {
      DeviceError::ModelLoadError(e) => e.raw_os_error().unwrap_or(1),
      #[cfg(feature = "rknpu_backend")]
      DeviceError::ModelInvalid(..) => 2,
      #[cfg(feature = "rknpu_backend")]
      DeviceError::RknnError(_) => 3,
      DeviceError::ModelPathError(_) => 64,
      DeviceError::BackendDisabled(_) => 69,
      DeviceError::Released | DeviceError::InferenceFailed(_) => 1,
    }
  }
}

/// 按 URL 方案加载推理设备，例如 `rknn:///opt/models/yolov8.rknn`
pub fn load_device(url: &Url) -> Result<Arc<dyn InferenceDevice>, DeviceError> {
  match url.scheme() {
    #[cfg(feature = "rknpu_backend")]
    "rknn" => {
      use crate::FromUrl;

      let device = super::RknnDeviceBuilder::from_url(url)?.build()?;
      Ok(Arc::new(device))
    }
    #[cfg(not(feature = "rknpu_backend"))]
    "rknn" => Err(DeviceError::BackendDisabled(
      "编译时未开启 rknpu_backend 特性".to_string(),
    )),
    other => Err(DeviceError::ModelPathError(format!(
      "不支持的模型方案 '{}'",
      other
    ))),
  }
}
