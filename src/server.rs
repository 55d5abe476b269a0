// 该文件是 Kanjian （看见） 项目的一部分。
// src/server.rs - HTTP 服务：首页、MJPEG 视频流与检测统计推送
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
  convert::Infallible,
  future::IntoFuture,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use axum::{
  Router,
  body::Body,
  extract::State,
  http::{StatusCode, header},
  response::{Html, IntoResponse, Response},
  routing::get,
};
use bytes::Bytes;
use tokio::{
  net::TcpListener,
  sync::mpsc,
  time::{MissedTickBehavior, interval, sleep},
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, error, info, warn};

use crate::{
  input::{CaptureConfig, CaptureSource},
  model::Detector,
  output::{Draw, MjpegOutput},
  stats::{DetectionCounter, StatsEvent},
  task::{Pacer, Shutdown, StreamTask, Task},
};

const INDEX_TEMPLATE: &str = include_str!("server/index.html");
pub const VIDEO_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const STATS_CONTENT_TYPE: &str = "text/event-stream";
// 需短于 Ctrl-C 后的强制退出时限，保证推理设备得以释放
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 每个连接共用的推流参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
  pub pacer: Pacer,
  pub stats_interval: Duration,
  pub jpeg_quality: u8,
  /// 收到退出信号后等待连接结束的最长时间
  pub drain_timeout: Duration,
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self {
      pacer: Pacer::default(),
      stats_interval: Duration::from_millis(500),
      jpeg_quality: 80,
      drain_timeout: DEFAULT_DRAIN_TIMEOUT,
    }
  }
}

#[derive(Clone)]
pub struct AppState {
  source: Arc<dyn CaptureSource>,
  detector: Arc<Detector>,
  draw: Arc<Draw<'static>>,
  counter: DetectionCounter,
  capture: CaptureConfig,
  config: StreamConfig,
  shutdown: Shutdown,
  sessions: Arc<AtomicU64>,
}

impl AppState {
  pub fn new(
    source: Arc<dyn CaptureSource>,
    detector: Arc<Detector>,
    draw: Arc<Draw<'static>>,
    capture: CaptureConfig,
    config: StreamConfig,
    shutdown: Shutdown,
  ) -> Self {
    Self {
      source,
      detector,
      draw,
      counter: DetectionCounter::default(),
      capture,
      config,
      shutdown,
      sessions: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn counter(&self) -> &DetectionCounter {
    &self.counter
  }

  pub fn shutdown(&self) -> &Shutdown {
    &self.shutdown
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(index))
    .route("/video_feed", get(video_feed))
    .route("/stats", get(stats))
    .fallback(not_found)
    .with_state(state)
}

/// 运行服务直到收到退出信号。
///
/// 退出信号到达后最多等待 `drain_timeout` 让现有连接结束，超时则直接返回，
/// 由调用方继续释放推理设备。
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
  info!("HTTP 服务监听于 http://{}", listener.local_addr()?);
  let shutdown = state.shutdown.clone();
  let drain_timeout = state.config.drain_timeout;

  let graceful = shutdown.clone();
  let server = axum::serve(listener, router(state))
    .with_graceful_shutdown(async move { graceful.wait().await })
    .into_future();
  tokio::pin!(server);

  let deadline = async {
    shutdown.wait().await;
    sleep(drain_timeout).await;
  };

  tokio::select! {
    served = &mut server => served?,
    _ = deadline => warn!("等待连接结束超时 ({:?})，强制停止 HTTP 服务", drain_timeout),
  }
  info!("HTTP 服务已停止");
  Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
  Html(
    INDEX_TEMPLATE
      .replace("{{INPUT_SIZE}}", &state.detector.config().input_size.to_string())
      .replace("{{WIDTH}}", &state.capture.width.to_string())
      .replace("{{HEIGHT}}", &state.capture.height.to_string()),
  )
}

async fn not_found() -> (StatusCode, &'static str) {
  (StatusCode::NOT_FOUND, "404 未找到")
}

async fn video_feed(State(state): State<AppState>) -> Response {
  let session = state.sessions.fetch_add(1, Ordering::Relaxed) + 1;
  info!("[会话 {}] 新的视频连接", session);

  // 容量为 1：客户端读得慢时处理线程被反压，而不是堆积帧
  let (sender, receiver) = mpsc::channel::<Bytes>(1);
  tokio::task::spawn_blocking(move || run_video_session(state, session, sender));

  let body = Body::from_stream(ReceiverStream::new(receiver).map(Ok::<_, Infallible>));
  (
    [
      (header::CONTENT_TYPE, VIDEO_CONTENT_TYPE),
      (header::CACHE_CONTROL, "no-cache"),
    ],
    body,
  )
    .into_response()
}

/// 在阻塞线程上运行一个连接的完整处理流程，返回时采集设备已释放
fn run_video_session(state: AppState, session: u64, sender: mpsc::Sender<Bytes>) {
  let input = match state.source.open() {
    Ok(input) => input,
    Err(e) => {
      error!("[会话 {}] 打开采集设备失败: {}", session, e);
      return;
    }
  };

  let output = MjpegOutput::new(
    sender,
    state.draw.clone(),
    state.detector.labels().clone(),
    state.config.jpeg_quality,
    state.shutdown.clone(),
  );
  let task = StreamTask::new(
    session,
    state.config.pacer,
    state.counter.clone(),
    state.shutdown.clone(),
  );

  let end = task
    .run_task(input, state.detector.clone(), output)
    .unwrap_or_else(|never| match never {});
  info!("[会话 {}] 结束: {:?}", session, end);
}

async fn stats(State(state): State<AppState>) -> Response {
  let (sender, receiver) = mpsc::channel::<Bytes>(1);
  tokio::spawn(stats_loop(
    state.counter.clone(),
    state.config.stats_interval,
    state.shutdown.clone(),
    sender,
  ));

  let body = Body::from_stream(ReceiverStream::new(receiver).map(Ok::<_, Infallible>));
  (
    [
      (header::CONTENT_TYPE, STATS_CONTENT_TYPE),
      (header::CACHE_CONTROL, "no-cache"),
      (header::CONNECTION, "keep-alive"),
    ],
    body,
  )
    .into_response()
}

async fn stats_loop(
  counter: DetectionCounter,
  period: Duration,
  shutdown: Shutdown,
  sender: mpsc::Sender<Bytes>,
) {
  debug!("新的统计订阅");
  let mut ticker = interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let stopped = shutdown.wait();
  tokio::pin!(stopped);

  loop {
    tokio::select! {
      _ = &mut stopped => break,
      _ = sender.closed() => break,
      _ = ticker.tick() => {}
    }

    let data = match (StatsEvent {
      detections: counter.get(),
    })
    .to_sse()
    {
      Ok(data) => data,
      Err(e) => {
        warn!("统计事件序列化失败: {}", e);
        continue;
      }
    };

    // 客户端不读取时也要能响应退出信号
    tokio::select! {
      _ = &mut stopped => break,
      sent = sender.send(data) => {
        if sent.is_err() {
          break;
        }
      }
    }
  }
  debug!("统计订阅结束");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::MULTIPART_BOUNDARY;

  #[test]
  fn video_content_type_names_the_part_boundary() {
    assert!(VIDEO_CONTENT_TYPE.ends_with(&format!("boundary={}", MULTIPART_BOUNDARY)));
  }

  #[test]
  fn template_has_every_placeholder() {
    for placeholder in ["{{INPUT_SIZE}}", "{{WIDTH}}", "{{HEIGHT}}"] {
      assert!(INDEX_TEMPLATE.contains(placeholder));
    }
    assert!(INDEX_TEMPLATE.contains("src=\"/video_feed\""));
    assert!(INDEX_TEMPLATE.contains("EventSource('/stats')"));
  }

  #[tokio::test]
  async fn stats_loop_reports_current_count_and_stops_on_shutdown() {
    let counter = DetectionCounter::default();
    counter.publish(4);
    let shutdown = Shutdown::new();
    let (sender, mut receiver) = mpsc::channel(1);
    let handle = tokio::spawn(stats_loop(
      counter.clone(),
      Duration::from_millis(10),
      shutdown.clone(),
      sender,
    ));

    let first = receiver.recv().await.unwrap();
    assert_eq!(&first[..], b"data: {\"detections\": 4}\n\n");

    counter.publish(9);
    let mut latest = receiver.recv().await.unwrap();
    while &latest[..] != b"data: {\"detections\": 9}\n\n" {
      latest = receiver.recv().await.unwrap();
    }

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
  }
}
