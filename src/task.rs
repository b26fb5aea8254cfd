// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/task.rs - 帧驱动与任务
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

//! # 帧驱动
//!
//! [`FrameDriver`] 一次只处理一帧，状态转换如下：
//!
//! ```text
//! Idle ─▶ Detecting ─▶ Rendering ─▶ Scheduled ─▶ Detecting ─▶ …
//!   │          │                        │
//!   └──────────┴────────────────────────┴─▶ Stopped
//! ```
//!
//! 每一轮依次执行：取帧、预处理、推理、解码、NMS、跟踪、渲染、上报，
//! 再交给 [`Scheduler`] 等待下一帧。帧来源失效、达到帧数上限或收到中断时
//! 清空输出并进入 `Stopped`。

use std::{
  fmt::Display,
  sync::mpsc::Receiver,
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  decode::{Decoder, Detection},
  error::PipelineError,
  frame::{Frame, RgbFrame},
  input::FrameSource,
  model::{LabelTable, Model, ModelShape},
  nms::Suppressor,
  output::{ClearReason, FrameDetections, Render},
  preprocess::{Preprocessor, Ratios},
  report::{FrameReport, LogReporter, Reporter},
  scope::{FrameScope, TensorBudget},
  tracker::{PresenceTracker, TrackerUpdate},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
  Idle,
  Detecting,
  Rendering,
  Scheduled,
  Stopped,
}

/// 下一帧的调度方式
pub trait Scheduler {
  /// 阻塞到下一帧应当开始的时刻
  fn wait_next(&mut self);
}

impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
  fn wait_next(&mut self) {
    (**self).wait_next()
  }
}

/// 上一帧结束后立即开始下一帧
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
  fn wait_next(&mut self) {}
}

/// 按目标帧率对齐帧起始时间，处理慢于帧间隔时不等待
#[derive(Debug, Clone)]
pub struct FrameRateScheduler {
  interval: Duration,
  last: Option<Instant>,
}

impl FrameRateScheduler {
  /// 帧率必须是正的有限值，否则返回 `None`
  pub fn new(fps: f64) -> Option<Self> {
    if !fps.is_finite() || fps <= 0.0 {
      return None;
    }
    let interval = Duration::try_from_secs_f64(1.0 / fps).ok()?;
    Some(Self {
      interval,
      last: None,
    })
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }
}

impl Scheduler for FrameRateScheduler {
  fn wait_next(&mut self) {
    if let Some(last) = self.last {
      let elapsed = last.elapsed();
      if elapsed < self.interval {
        thread::sleep(self.interval - elapsed);
      }
    }
    self.last = Some(Instant::now());
  }
}

/// 按配置选择调度器
pub fn scheduler_for(fps: Option<f64>) -> Box<dyn Scheduler> {
  match fps.and_then(FrameRateScheduler::new) {
    Some(scheduler) => Box::new(scheduler),
    None => Box::new(ImmediateScheduler),
  }
}

/// 一帧经过 NMS 后的结果，坐标仍在模型输入空间
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFrame {
  pub detections: Vec<Detection>,
  pub ratios: Ratios,
  pub model: ModelShape,
}

/// 预处理、推理、解码、NMS 与跟踪的组合
pub struct Pipeline<M> {
  preprocessor: Preprocessor,
  model: M,
  decoder: Decoder,
  suppressor: Suppressor,
  tracker: PresenceTracker,
  budget: TensorBudget,
}

impl<M: Model> Pipeline<M> {
  pub fn new(model: M, labels: &LabelTable, config: &PipelineConfig) -> Self {
    let shape = model.input_shape();
    info!(
      "创建流水线: 模型输入 {}x{}, {} 个类别, NMS {:?}",
      shape.width,
      shape.height,
      labels.len(),
      config.suppression
    );
    Self {
      preprocessor: Preprocessor::new(shape),
      model,
      decoder: Decoder::new(labels.len()),
      suppressor: Suppressor::new(config.suppression),
      tracker: PresenceTracker::new(&config.tracker),
      budget: TensorBudget::new(config.driver.tensor_budget),
    }
  }

  pub fn tracker(&self) -> &PresenceTracker {
    &self.tracker
  }

  pub fn budget(&self) -> &TensorBudget {
    &self.budget
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  /// 单帧检测，不改变跟踪状态
  ///
  /// 帧内张量都在同一个作用域中登记，返回前检查是否全部释放。
  pub fn detect(&self, image: &RgbFrame) -> Result<DetectedFrame, PipelineError> {
    let scope = self.budget.enter();
    let result = self.detect_in_scope(image, &scope);
    scope.close()?;
    result
  }

  fn detect_in_scope(
    &self,
    image: &RgbFrame,
    scope: &FrameScope,
  ) -> Result<DetectedFrame, PipelineError> {
    let input = self.preprocessor.preprocess(image, scope)?;

    let raw = self.model.infer(&input)?;
    let raw_bytes = raw.byte_len();
    let raw = scope.track(raw, raw_bytes)?;

    let candidates = self.decoder.decode(&raw)?;
    let candidate_bytes = candidates.byte_len();
    let candidates = scope.track(candidates, candidate_bytes)?;

    let indices = self
      .suppressor
      .suppress(&candidates.boxes, &candidates.scores);

    Ok(DetectedFrame {
      detections: candidates.gather(&indices),
      ratios: input.ratios,
      model: self.preprocessor.model_shape(),
    })
  }

  /// 检测并用帧时间戳更新跟踪器
  pub fn process(&mut self, frame: &Frame) -> Result<(DetectedFrame, TrackerUpdate), PipelineError> {
    let detected = self.detect(&frame.image)?;
    let update = self
      .tracker
      .update(&detected.detections, frame.timestamp_ms);
    Ok((detected, update))
  }
}

pub struct FrameDriver<M, O, R = LogReporter, S = ImmediateScheduler> {
  pipeline: Pipeline<M>,
  labels: LabelTable,
  output: O,
  reporter: R,
  scheduler: S,
  state: DriverState,
  frame_number: Option<usize>,
  processed: usize,
}

impl<M, O, R, S> FrameDriver<M, O, R, S>
where
  M: Model,
  O: Render,
  O::Error: Display,
  R: Reporter,
  S: Scheduler,
{
  pub fn new(pipeline: Pipeline<M>, labels: LabelTable, output: O, reporter: R, scheduler: S) -> Self {
    Self {
      pipeline,
      labels,
      output,
      reporter,
      scheduler,
      state: DriverState::Idle,
      frame_number: None,
      processed: 0,
    }
  }

  /// 处理指定帧数后停止
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn state(&self) -> DriverState {
    self.state
  }

  /// 已取出的帧数，包括被跳过的帧
  pub fn processed(&self) -> usize {
    self.processed
  }

  pub fn pipeline(&self) -> &Pipeline<M> {
    &self.pipeline
  }

  pub fn output(&self) -> &O {
    &self.output
  }

  pub fn reporter(&self) -> &R {
    &self.reporter
  }

  /// 清空输出并停止
  pub fn stop(&mut self) {
    if self.state == DriverState::Stopped {
      return;
    }
    if let Err(e) = self.output.clear(ClearReason::EndOfStream) {
      warn!("清空输出失败: {}", e);
    }
    self.state = DriverState::Stopped;
    info!("帧驱动停止, 共处理 {} 帧", self.processed);
  }

  /// 执行一轮，返回本轮结束后的状态
  ///
  /// 无效帧和推理错误只跳过当前帧；资源耗尽会停止驱动并返回错误。
  pub fn step<I: FrameSource>(&mut self, input: &mut I) -> Result<DriverState, PipelineError> {
    match self.state {
      DriverState::Stopped => return Ok(DriverState::Stopped),
      DriverState::Scheduled => self.scheduler.wait_next(),
      _ => {}
    }

    let (width, height) = input.dimensions();
    if (width == 0 || height == 0) && !input.is_live() {
      info!("帧来源已失效");
      self.stop();
      return Ok(self.state);
    }

    let frame = match input.next() {
      None => {
        info!("帧来源已结束");
        self.stop();
        return Ok(self.state);
      }
      Some(Err(e)) => {
        warn!("读取帧失败, 跳过: {}", e);
        return Ok(self.finish_pass());
      }
      Some(Ok(frame)) => frame,
    };

    self.state = DriverState::Detecting;
    let started = Instant::now();
    match self.pipeline.process(&frame) {
      Ok((detected, update)) => {
        let elapsed_detect = started.elapsed();
        self.state = DriverState::Rendering;
        self.render(&frame, &detected);
        self.report(&frame, update);
        debug!(
          "第 {} 帧完成, 耗时: {:.2?} / {:.2?}",
          frame.index,
          elapsed_detect,
          started.elapsed()
        );
      }
      Err(e) if e.is_fatal() => {
        error!("第 {} 帧资源耗尽: {}", frame.index, e);
        self.stop();
        return Err(e);
      }
      Err(PipelineError::InvalidFrame(e)) => {
        warn!("第 {} 帧无效, 跳过: {}", frame.index, e);
        if let Err(e) = self.output.clear(ClearReason::InvalidFrame) {
          warn!("清空输出失败: {}", e);
        }
      }
      Err(e) => warn!("第 {} 帧处理失败, 跳过: {}", frame.index, e),
    }

    Ok(self.finish_pass())
  }

  fn finish_pass(&mut self) -> DriverState {
    self.processed += 1;
    if self.frame_number.is_some_and(|n| self.processed >= n) {
      info!("达到指定帧数 {}", self.processed);
      self.stop();
    } else {
      self.state = DriverState::Scheduled;
    }
    self.state
  }

  fn render(&self, frame: &Frame, detected: &DetectedFrame) {
    let result = FrameDetections {
      detections: &detected.detections,
      ratios: detected.ratios,
      model: detected.model,
      labels: &self.labels,
    };
    if let Err(e) = self.output.render_result(frame, &result) {
      warn!("第 {} 帧渲染失败: {}", frame.index, e);
    }
  }

  fn report(&mut self, frame: &Frame, update: TrackerUpdate) {
    let report = FrameReport {
      frame_index: frame.index,
      timestamp_ms: frame.timestamp_ms,
      detection_count: update.detection_count,
      entities: self.pipeline.tracker().snapshot().into_iter().collect(),
    };
    if let Err(e) = self.reporter.report(&report) {
      warn!("第 {} 帧上报失败: {}", frame.index, e);
    }
  }

  /// 循环直到停止，`interrupt` 收到消息时在当前帧结束后停止
  pub fn run<I: FrameSource>(
    &mut self,
    mut input: I,
    interrupt: Option<&Receiver<()>>,
  ) -> Result<usize, PipelineError> {
    info!("开始任务...");
    while self.step(&mut input)? != DriverState::Stopped {
      if interrupt.is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        self.stop();
      }
    }
    info!("任务完成，退出");
    Ok(self.processed)
  }
}

/// 只处理第一帧
pub struct OneShotTask {
  config: PipelineConfig,
  labels: LabelTable,
  reporter: Box<dyn Reporter>,
}

impl OneShotTask {
  pub fn new(config: PipelineConfig, labels: LabelTable) -> Self {
    Self {
      config,
      labels,
      reporter: Box::new(LogReporter),
    }
  }

  pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
    self.reporter = reporter;
    self
  }
}

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: FrameSource,
  M: Model,
  O: Render,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    let pipeline = Pipeline::new(model, &self.labels, &self.config);
    let mut driver = FrameDriver::new(
      pipeline,
      self.labels,
      output,
      self.reporter,
      ImmediateScheduler,
    )
    .with_frame_number(Some(1));

    let now = Instant::now();
    let processed = driver.run(input, None)?;
    if processed == 0 {
      anyhow::bail!("没有输入帧");
    }
    info!("单帧处理完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }
}

/// 持续处理直到输入结束、达到帧数或收到 Ctrl-C
pub struct ContinuousTask {
  config: PipelineConfig,
  labels: LabelTable,
  reporter: Box<dyn Reporter>,
}

impl ContinuousTask {
  pub fn new(config: PipelineConfig, labels: LabelTable) -> Self {
    Self {
      config,
      labels,
      reporter: Box::new(LogReporter),
    }
  }

  pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
    self.reporter = reporter;
    self
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: FrameSource,
  M: Model,
  O: Render,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let pipeline = Pipeline::new(model, &self.labels, &self.config);
    let mut driver = FrameDriver::new(
      pipeline,
      self.labels,
      output,
      self.reporter,
      scheduler_for(self.config.driver.fps),
    )
    .with_frame_number(self.config.driver.frame_number);

    let processed = driver.run(input, Some(&rx))?;
    info!(
      "共处理 {} 帧, 跟踪 {} 个目标",
      processed,
      driver.pipeline().tracker().len()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_rate_scheduler_waits_for_interval() {
    let mut scheduler = FrameRateScheduler::new(50.0).unwrap();
    assert_eq!(scheduler.interval(), Duration::from_millis(20));

    let started = Instant::now();
    scheduler.wait_next();
    scheduler.wait_next();
    scheduler.wait_next();
    assert!(started.elapsed() >= Duration::from_millis(40));
  }

  #[test]
  fn non_positive_or_non_finite_fps_is_rejected() {
    for fps in [0.0, -5.0, f64::NAN, f64::INFINITY, f64::MIN_POSITIVE] {
      assert!(FrameRateScheduler::new(fps).is_none(), "fps = {}", fps);
    }
    let mut scheduler = scheduler_for(Some(-1.0));
    let started = Instant::now();
    scheduler.wait_next();
    scheduler.wait_next();
    assert!(started.elapsed() < Duration::from_millis(20));
  }

  #[test]
  fn zero_fps_falls_back_to_immediate() {
    let mut scheduler = scheduler_for(Some(0.0));
    let started = Instant::now();
    scheduler.wait_next();
    scheduler.wait_next();
    assert!(started.elapsed() < Duration::from_millis(20));
  }
}
