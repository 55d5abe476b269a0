// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 帧处理任务：采集、推理、渲染与节流
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
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
  model::{DetectResult, Model},
  output::{OutputError, Render},
  stats::DetectionCounter,
};

const FORCE_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 帧率节流：每次迭代后休眠 `max(min_sleep, target_interval - elapsed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
  target_interval: Duration,
  min_sleep: Duration,
}

impl Default for Pacer {
  fn default() -> Self {
    Self::from_fps(30.0, Duration::from_millis(10))
  }
}

impl Pacer {
  pub fn new(target_interval: Duration, min_sleep: Duration) -> Self {
    Self {
      target_interval,
      min_sleep,
    }
  }

  /// `fps` 必须为正数，由参数解析保证
  pub fn from_fps(fps: f64, min_sleep: Duration) -> Self {
    Self::new(Duration::from_secs_f64(1.0 / fps), min_sleep)
  }

  pub fn target_interval(&self) -> Duration {
    self.target_interval
  }

  pub fn min_sleep(&self) -> Duration {
    self.min_sleep
  }

  pub fn sleep_after(&self, elapsed: Duration) -> Duration {
    self.target_interval.saturating_sub(elapsed).max(self.min_sleep)
  }
}

/// 一次视频会话的结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
  InputExhausted,
  ClientDisconnected,
  Shutdown,
}

/// 进程级退出信号，可被多个会话与统计循环同时观察
#[derive(Debug, Clone)]
pub struct Shutdown(Arc<watch::Sender<bool>>);

impl Default for Shutdown {
  fn default() -> Self {
    Self::new()
  }
}

impl Shutdown {
  pub fn new() -> Self {
    let (sender, _) = watch::channel(false);
    Self(Arc::new(sender))
  }

  pub fn trigger(&self) {
    self.0.send_replace(true);
  }

  pub fn is_triggered(&self) -> bool {
    *self.0.borrow()
  }

  pub async fn wait(&self) {
    let mut receiver = self.0.subscribe();
    // 发送端与 self 同生命周期，不会提前关闭
    let _ = receiver.wait_for(|triggered| *triggered).await;
  }
}

/// Ctrl-C 触发优雅退出，超过 30 秒仍未退出则强制结束进程
pub fn install_signal_handler(shutdown: Shutdown) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    shutdown.trigger();
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_TIMEOUT);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}

/// 单个视频连接的处理循环
#[derive(Debug, Clone)]
pub struct StreamTask {
  session: u64,
  pacer: Pacer,
  counter: DetectionCounter,
  shutdown: Shutdown,
}

impl StreamTask {
  pub fn new(session: u64, pacer: Pacer, counter: DetectionCounter, shutdown: Shutdown) -> Self {
    Self {
      session,
      pacer,
      counter,
      shutdown,
    }
  }
}

impl<F, ME, I, M, O> Task<I, M, O> for StreamTask
where
  ME: std::error::Error,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectResult, Error = ME>,
  O: Render<F, DetectResult, Error = OutputError>,
{
  type Output = SessionEnd;
  type Error = Infallible;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<SessionEnd, Infallible> {
    info!("[会话 {}] 开始推流", self.session);
    let mut frame_index = 0usize;

    loop {
      if self.shutdown.is_triggered() {
        info!("[会话 {}] 收到退出信号", self.session);
        return Ok(SessionEnd::Shutdown);
      }

      let now = Instant::now();
      let Some(frame) = input.next() else {
        info!("[会话 {}] 输入结束，共处理 {} 帧", self.session, frame_index);
        return Ok(SessionEnd::InputExhausted);
      };
      frame_index += 1;

      match model.infer(&frame) {
        Ok(result) => {
          let inferred = now.elapsed();
          self.counter.publish(result.len());

          match output.render_result(&frame, &result) {
            Ok(()) => {}
            Err(OutputError::Closed) => {
              info!("[会话 {}] 客户端断开，共处理 {} 帧", self.session, frame_index);
              return Ok(SessionEnd::ClientDisconnected);
            }
            Err(OutputError::Shutdown) => {
              info!("[会话 {}] 等待客户端时收到退出信号", self.session);
              return Ok(SessionEnd::Shutdown);
            }
            Err(e) => warn!("[会话 {}] 第 {} 帧输出失败: {}", self.session, frame_index, e),
          }
          debug!(
            "[会话 {}] 第 {} 帧: {} 个目标，推理 {:.2?} / 总计 {:.2?}",
            self.session,
            frame_index,
            result.len(),
            inferred,
            now.elapsed()
          );
        }
        Err(e) => warn!("[会话 {}] 第 {} 帧推理失败，跳过: {}", self.session, frame_index, e),
      }

      thread::sleep(self.pacer.sleep_after(now.elapsed()));
    }
  }
}
