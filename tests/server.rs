// 该文件是 Kanjian （看见） 项目的一部分。
// tests/server.rs - HTTP 端点集成测试
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

mod common;

use std::{sync::Arc, time::Duration};

use axum::{
  body::{Body, Bytes},
  http::{Request, StatusCode, header},
  response::Response,
};
use http_body_util::BodyExt;
use tokio::{
  net::{TcpListener, TcpStream},
  time::{sleep, timeout},
};
use tower::ServiceExt;

use common::{CountingSource, app_state};
use kanjian::server::{AppState, router, serve};

const WAIT: Duration = Duration::from_secs(5);

async fn get(state: &AppState, uri: &str) -> Response {
  router(state.clone())
    .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
    .await
    .unwrap()
}

async fn next_chunk(body: &mut Body) -> Option<Bytes> {
  let frame = timeout(WAIT, body.frame()).await.unwrap()?;
  Some(frame.unwrap().into_data().unwrap())
}

/// 校验一个 multipart 段并返回其中的 JPEG 数据
fn parse_part(part: &[u8]) -> &[u8] {
  let split = part
    .windows(4)
    .position(|w| w == b"\r\n\r\n")
    .expect("缺少头部结束标记");
  let head = std::str::from_utf8(&part[..split]).unwrap();
  let mut lines = head.split("\r\n");
  assert_eq!(lines.next(), Some("--frame"));
  assert_eq!(lines.next(), Some("Content-type: image/jpeg"));
  let length: usize = lines
    .next()
    .and_then(|line| line.strip_prefix("Content-length: "))
    .expect("缺少 Content-length")
    .parse()
    .unwrap();

  let payload = &part[split + 4..];
  assert!(payload.ends_with(b"\r\n"));
  let jpeg = &payload[..payload.len() - 2];
  assert_eq!(jpeg.len(), length);
  jpeg
}

async fn wait_until(mut done: impl FnMut() -> bool) {
  timeout(WAIT, async {
    while !done() {
      sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn landing_page_embeds_feed_and_stats() {
  let state = app_state(0, Arc::new(CountingSource::new(None)));
  let response = get(&state, "/").await;

  assert_eq!(response.status(), StatusCode::OK);
  let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
  assert!(content_type.starts_with("text/html"));

  let body = response.into_body().collect().await.unwrap().to_bytes();
  let html = std::str::from_utf8(&body).unwrap();
  assert!(html.contains("src=\"/video_feed\""));
  assert!(html.contains("/stats"));
  assert!(html.contains("64×64"));
  assert!(!html.contains("{{"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_path_is_not_found() {
  let state = app_state(0, Arc::new(CountingSource::new(None)));
  let response = get(&state, "/favicon.ico").await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn video_feed_streams_well_formed_parts_until_input_ends() {
  let source = Arc::new(CountingSource::new(Some(3)));
  let state = app_state(2, source.clone());
  let response = get(&state, "/video_feed").await;

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    response.headers()[header::CONTENT_TYPE],
    "multipart/x-mixed-replace; boundary=frame"
  );

  let mut body = response.into_body();
  let mut parts = 0;
  while let Some(part) = next_chunk(&mut body).await {
    let jpeg = parse_part(&part);
    let decoded = image::load_from_memory(jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 48));
    parts += 1;
  }

  assert_eq!(parts, 3);
  assert_eq!(source.opened(), 1);
  wait_until(|| source.active() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_reports_detections_from_running_feed() {
  let source = Arc::new(CountingSource::new(None));
  let state = app_state(3, source.clone());

  let mut video = get(&state, "/video_feed").await.into_body();
  parse_part(&next_chunk(&mut video).await.unwrap());

  let response = get(&state, "/stats").await;
  assert_eq!(response.status(), StatusCode::OK);
  let headers = response.headers();
  assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
  assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
  assert_eq!(headers[header::CONNECTION], "keep-alive");

  let mut events = response.into_body();
  let event = next_chunk(&mut events).await.unwrap();
  assert_eq!(&event[..], b"data: {\"detections\": 3}\n\n");

  drop(video);
  wait_until(|| source.active() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_releases_capture_without_affecting_other_clients() {
  let source = Arc::new(CountingSource::new(None));
  let state = app_state(1, source.clone());

  let mut first = get(&state, "/video_feed").await.into_body();
  let mut second = get(&state, "/video_feed").await.into_body();
  next_chunk(&mut first).await.unwrap();
  next_chunk(&mut second).await.unwrap();
  wait_until(|| source.active() == 2).await;

  drop(first);
  wait_until(|| source.active() == 1).await;

  // 另一个连接继续出帧
  for _ in 0..3 {
    parse_part(&next_chunk(&mut second).await.unwrap());
  }
  assert_eq!(source.opened(), 2);

  drop(second);
  wait_until(|| source.active() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_ends_open_streams() {
  let source = Arc::new(CountingSource::new(None));
  let state = app_state(0, source.clone());

  let mut video = get(&state, "/video_feed").await.into_body();
  let mut events = get(&state, "/stats").await.into_body();
  next_chunk(&mut video).await.unwrap();
  next_chunk(&mut events).await.unwrap();

  state.shutdown().trigger();

  while next_chunk(&mut video).await.is_some() {}
  while next_chunk(&mut events).await.is_some() {}
  wait_until(|| source.active() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_capture_ends_only_that_connection() {
  let source = Arc::new(CountingSource::failing_first(1));
  let state = app_state(2, source.clone());

  let mut events = get(&state, "/stats").await.into_body();
  next_chunk(&mut events).await.unwrap();

  let failed = get(&state, "/video_feed").await;
  assert_eq!(failed.status(), StatusCode::OK);
  let mut failed = failed.into_body();
  assert!(next_chunk(&mut failed).await.is_none());
  assert_eq!(source.opened(), 0);

  // 之后的连接与统计推送不受影响
  let mut video = get(&state, "/video_feed").await.into_body();
  parse_part(&next_chunk(&mut video).await.unwrap());
  let mut latest = next_chunk(&mut events).await.unwrap();
  while &latest[..] != b"data: {\"detections\": 2}\n\n" {
    latest = next_chunk(&mut events).await.unwrap();
  }

  drop(video);
  wait_until(|| source.active() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn serve_returns_after_shutdown_with_stalled_client() {
  let source = Arc::new(CountingSource::new(None));
  let state = app_state(1, source.clone());
  let shutdown = state.shutdown().clone();

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let server = tokio::spawn(serve(listener, state));

  // 发出请求后不再读取任何数据
  let client = TcpStream::connect(addr).await.unwrap();
  let request = b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n";
  let mut written = 0;
  while written < request.len() {
    client.writable().await.unwrap();
    match client.try_write(&request[written..]) {
      Ok(n) => written += n,
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
      Err(e) => panic!("{}", e),
    }
  }
  wait_until(|| source.active() == 1).await;
  sleep(Duration::from_millis(100)).await;

  shutdown.trigger();
  timeout(WAIT, server).await.unwrap().unwrap().unwrap();
  wait_until(|| source.active() == 0).await;
  drop(client);
}
