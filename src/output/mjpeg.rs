// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/mjpeg.rs - multipart/x-mixed-replace 视频流输出
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

use std::{sync::Arc, thread, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use image::{ExtendedColorType, ImageError, RgbImage, codecs::jpeg::JpegEncoder};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::{
  frame::RawFrame,
  labels::ClassNameTable,
  model::DetectResult,
  output::{Draw, OutputError, Render},
  task::Shutdown,
};

pub const MULTIPART_BOUNDARY: &str = "frame";
// 通道已满时重试的间隔
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// 将一帧 JPEG 封装为一个 multipart 段
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
  let header = format!(
    "--{}\r\nContent-type: image/jpeg\r\nContent-length: {}\r\n\r\n",
    MULTIPART_BOUNDARY,
    jpeg.len()
  );

  let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
  part.put_slice(header.as_bytes());
  part.put_slice(jpeg);
  part.put_slice(b"\r\n");
  part.freeze()
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality).encode(
    image.as_raw(),
    image.width(),
    image.height(),
    ExtendedColorType::Rgb8,
  )?;
  Ok(buffer)
}

/// 标注、编码并推送到一个 HTTP 连接
pub struct MjpegOutput<'a> {
  sender: mpsc::Sender<Bytes>,
  draw: Arc<Draw<'a>>,
  labels: Arc<ClassNameTable>,
  quality: u8,
  shutdown: Shutdown,
}

impl<'a> MjpegOutput<'a> {
  pub fn new(
    sender: mpsc::Sender<Bytes>,
    draw: Arc<Draw<'a>>,
    labels: Arc<ClassNameTable>,
    quality: u8,
    shutdown: Shutdown,
  ) -> Self {
    Self {
      sender,
      draw,
      labels,
      quality,
      shutdown,
    }
  }

  /// 客户端不读取时通道保持满载，等待期间仍需响应退出信号
  fn push(&self, mut part: Bytes) -> Result<(), OutputError> {
    loop {
      match self.sender.try_send(part) {
        Ok(()) => return Ok(()),
        Err(TrySendError::Closed(_)) => return Err(OutputError::Closed),
        Err(TrySendError::Full(returned)) => {
          if self.shutdown.is_triggered() {
            return Err(OutputError::Shutdown);
          }
          part = returned;
          thread::sleep(SEND_RETRY_INTERVAL);
        }
      }
    }
  }
}

impl<'a> Render<RawFrame, DetectResult> for MjpegOutput<'a> {
  type Error = OutputError;

  fn render_result(&self, frame: &RawFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut annotated = frame.clone();
    self
      .draw
      .draw_detections(&mut annotated, result, &self.labels);

    let jpeg = encode_jpeg(&annotated, self.quality)?;
    debug!("编码 JPEG {} 字节", jpeg.len());

    // 接收端关闭即客户端断开
    self.push(multipart_part(&jpeg))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use image::Rgb;

  #[test]
  fn part_framing_is_exact() {
    let part = multipart_part(b"abc");
    assert_eq!(
      &part[..],
      b"--frame\r\nContent-type: image/jpeg\r\nContent-length: 3\r\n\r\nabc\r\n"
    );
  }

  #[test]
  fn encodes_decodable_jpeg() {
    let image = RgbImage::from_pixel(32, 24, Rgb([200, 10, 10]));
    let jpeg = encode_jpeg(&image, 80).unwrap();

    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));
  }

  #[test]
  fn renders_part_into_channel() {
    let (tx, mut rx) = mpsc::channel(1);
    let output = MjpegOutput::new(
      tx,
      Arc::new(Draw::new().unwrap()),
      Arc::new(ClassNameTable::coco()),
      80,
      Shutdown::new(),
    );
    let frame = RgbImage::new(64, 48);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [8.0, 20.0, 40.0, 40.0],
    }]);

    output.render_result(&frame, &result).unwrap();
    let part = rx.try_recv().unwrap();
    assert!(part.starts_with(b"--frame\r\nContent-type: image/jpeg\r\n"));
    assert!(part.ends_with(b"\r\n"));
  }

  #[test]
  fn dropped_receiver_reports_closed() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let output = MjpegOutput::new(
      tx,
      Arc::new(Draw::new().unwrap()),
      Arc::new(ClassNameTable::coco()),
      80,
      Shutdown::new(),
    );

    let err = output
      .render_result(&RgbImage::new(8, 8), &DetectResult::default())
      .unwrap_err();
    assert!(err.is_closed());
  }

  #[test]
  fn full_channel_gives_way_to_shutdown() {
    let (tx, _rx) = mpsc::channel(1);
    let shutdown = Shutdown::new();
    let output = MjpegOutput::new(
      tx,
      Arc::new(Draw::new().unwrap()),
      Arc::new(ClassNameTable::coco()),
      80,
      shutdown.clone(),
    );
    let frame = RgbImage::new(8, 8);

    // 第一帧填满通道，之后接收端一直不读取
    output.render_result(&frame, &DetectResult::default()).unwrap();

    let trigger = thread::spawn(move || {
      thread::sleep(Duration::from_millis(50));
      shutdown.trigger();
    });
    let err = output
      .render_result(&frame, &DetectResult::default())
      .unwrap_err();
    trigger.join().unwrap();

    assert!(matches!(err, OutputError::Shutdown));
  }
}
