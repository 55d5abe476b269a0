// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/stream_server.rs - 实时检测推流服务入口
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

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use kanjian::{
  args::Args,
  input::InputSource,
  labels::ClassNameTable,
  model::{Detector, InferenceDevice, load_device},
  output::Draw,
  server::{AppState, serve},
  task::{Shutdown, install_signal_handler},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("监听地址: {}", args.listen);

  let labels = match &args.labels {
    Some(path) => ClassNameTable::from_file(path)?,
    None => ClassNameTable::coco(),
  };
  info!("类别数: {}", labels.len());

  let device = match load_device(&args.model) {
    Ok(device) => device,
    Err(e) => {
      let code = e.exit_code();
      error!("模型加载失败 (错误码 {}): {}", code, e);
      std::process::exit(code);
    }
  };
  info!("模型加载完成");

  let served = run(&args, labels, device.clone()).await;

  info!("释放推理设备");
  device.release();
  served
}

async fn run(
  args: &Args,
  labels: ClassNameTable,
  device: Arc<dyn InferenceDevice>,
) -> Result<()> {
  let source = InputSource::new(args.input.clone(), args.capture_config())?;
  let draw = Draw::new()?;

  let shutdown = Shutdown::new();
  install_signal_handler(shutdown.clone())?;

  let detector = Detector::new(device, Arc::new(labels), args.detector_config());
  let state = AppState::new(
    Arc::new(source),
    Arc::new(detector),
    Arc::new(draw),
    args.capture_config(),
    args.stream_config(),
    shutdown,
  );

  let listener = TcpListener::bind(args.listen).await?;
  serve(listener, state).await?;
  Ok(())
}
