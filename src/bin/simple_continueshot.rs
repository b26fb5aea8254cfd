// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续检测与驻留跟踪
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use dwell::{
  FromUrl,
  config::{IdentityStrategy, PipelineConfig},
  input::InputWrapper,
  model::{LabelTable, ModelWrapper},
  output::OutputWrapper,
  report::JsonLinesReporter,
  task::{ContinuousTask, Task},
};

/// 连续处理输入流，跟踪每个目标的出现与缺席时长
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，例如 onnx:///models/yolov8n.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 folder:///data/frames?fps=10
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 folder:///data/record?record=name 或 log://
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 类别表（JSON 数组或每行一个名称），默认 COCO
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
  /// JSON 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 分数阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub score_threshold: Option<f32>,
  /// NMS IoU 阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,
  /// 目标帧率
  #[arg(long, value_name = "FPS")]
  pub fps: Option<f64>,
  /// 处理帧数上限
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 身份策略: index 或 iou
  #[arg(long, value_name = "STRATEGY")]
  pub identity: Option<IdentityStrategy>,
  /// 缺席超过该毫秒数的目标被清除
  #[arg(long, value_name = "MILLISECONDS")]
  pub max_absence_ms: Option<u64>,
  /// 逐帧统计写入的 JSON Lines 文件
  #[arg(long, value_name = "REPORT")]
  pub report: Option<PathBuf>,
}

impl Args {
  fn pipeline_config(&self) -> Result<PipelineConfig> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };
    if let Some(threshold) = self.score_threshold {
      config.suppression.score_threshold = threshold;
    }
    if let Some(threshold) = self.iou_threshold {
      config.suppression.iou_threshold = threshold;
    }
    if let Some(identity) = self.identity {
      config.tracker.identity = identity;
    }
    if self.max_absence_ms.is_some() {
      config.tracker.max_absence_ms = self.max_absence_ms;
    }
    if self.fps.is_some() {
      config.driver.fps = self.fps;
    }
    if self.frame_number.is_some() {
      config.driver.frame_number = self.frame_number;
    }
    config.validate()?;
    Ok(config)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = args.pipeline_config()?;
  let labels = match &args.labels {
    Some(path) => LabelTable::load(path)?,
    None => LabelTable::coco(),
  };

  let input = InputWrapper::from_url(&args.input)?;
  let model = ModelWrapper::load(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let mut task = ContinuousTask::new(config, labels);
  if let Some(path) = &args.report {
    task = task.with_reporter(Box::new(JsonLinesReporter::create(path)?));
  }
  task.run_task(input, model, output)?;

  Ok(())
}
