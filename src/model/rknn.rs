// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/rknn.rs - RKNN 推理设备
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

use std::sync::Mutex;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{DeviceError, InferenceDevice, RawOutput},
};

const RKNN_NUM_INPUTS: u32 = 1;

/// RKNN 上下文只允许单路推理，所有调用经互斥锁串行化
pub struct RknnDevice {
  context: Mutex<Option<Context>>,
  num_outputs: u32,
}

// SAFETY: `Context` 内含 C 库句柄裸指针，因而不是 Send/Sync。
// RKNN 运行时不要求调用线程与创建线程一致，只要求同一上下文上的调用互不并发。
// 这里所有访问（推理与释放）都先取得互斥锁，句柄不会被复制或泄露到锁外，
// 因此跨线程移动与共享都是安全的。
unsafe impl Send for RknnDevice {}
unsafe impl Sync for RknnDevice {}

pub struct RknnDeviceBuilder {
  model_path: String,
}

impl FromUrlWithScheme for RknnDeviceBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnDeviceBuilder {
  type Error = DeviceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DeviceError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(RknnDeviceBuilder {
      model_path: url.path().to_string(),
    })
  }
}

impl RknnDeviceBuilder {
  pub fn build(self) -> Result<RknnDevice, DeviceError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          info!("RKNN API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          info!("RKNN 驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(DeviceError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| DeviceError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| DeviceError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(DeviceError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    if num_outputs == 0 {
      error!("模型没有输出");
      return Err(DeviceError::invalid(
        "模型没有输出",
        rknpu::Error::InvalidModel,
      ));
    }

    info!("模型加载完成，输出数量: {}", num_outputs);

    Ok(RknnDevice {
      context: Mutex::new(Some(context)),
      num_outputs,
    })
  }
}

impl InferenceDevice for RknnDevice {
  fn infer(&self, input: &RgbNhwcFrame) -> Result<Vec<RawOutput>, DeviceError> {
    let guard = self
      .context
      .lock()
      .map_err(|_| DeviceError::InferenceFailed("推理上下文锁已中毒".to_string()))?;
    let context = guard.as_ref().ok_or(DeviceError::Released)?;

    debug!("设置模型输入");
    context.set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    context.run()?;

    let output = context.get_outputs()?;
    let mut outputs = Vec::with_capacity(self.num_outputs as usize);
    for idx in 0..self.num_outputs as usize {
      let tensor = output.get_f32(idx)?;
      outputs.push(RawOutput::from(tensor.to_vec()));
    }

    Ok(outputs)
  }

  fn release(&self) {
    match self.context.lock() {
      Ok(mut guard) => {
        if guard.take().is_some() {
          info!("RKNN 推理上下文已释放");
        }
      }
      Err(_) => error!("推理上下文锁已中毒，无法释放"),
    }
  }
}
