// 该文件是 Kanjian （看见） 项目的一部分。
// src/stats.rs - 检测计数共享状态与统计事件
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

use std::{
  io,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use bytes::Bytes;
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};

/// 最近一帧的检测数量。所有视频会话写入，所有统计订阅者读取。
#[derive(Debug, Clone, Default)]
pub struct DetectionCounter(Arc<AtomicUsize>);

impl DetectionCounter {
  pub fn publish(&self, detections: usize) {
    self.0.store(detections, Ordering::Release);
  }

  pub fn get(&self) -> usize {
    self.0.load(Ordering::Acquire)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsEvent {
  pub detections: usize,
}

/// 紧凑输出，但键值之间保留一个空格：`{"detections": 3}`
struct EventFormatter;

impl Formatter for EventFormatter {
  fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
    writer.write_all(b": ")
  }
}

impl StatsEvent {
  /// 按 server-sent events 格式编码为 `data: <json>\n\n`
  pub fn to_sse(&self) -> Result<Bytes, serde_json::Error> {
    let mut buffer = b"data: ".to_vec();
    let mut serializer = Serializer::with_formatter(&mut buffer, EventFormatter);
    self.serialize(&mut serializer)?;
    buffer.extend_from_slice(b"\n\n");
    Ok(Bytes::from(buffer))
  }
}
