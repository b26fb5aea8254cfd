// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/report.rs - 逐帧统计上报
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
  collections::BTreeMap,
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::tracker::{EntityKey, TrackedEntity};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 一帧处理后的统计：本帧检测数量和全部目标的快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
  pub frame_index: u64,
  pub timestamp_ms: u64,
  pub detection_count: usize,
  pub entities: BTreeMap<EntityKey, TrackedEntity>,
}

pub trait Reporter {
  fn report(&mut self, report: &FrameReport) -> Result<(), ReportError>;
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
  fn report(&mut self, report: &FrameReport) -> Result<(), ReportError> {
    (**self).report(report)
  }
}

/// 写入日志
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
  fn report(&mut self, report: &FrameReport) -> Result<(), ReportError> {
    info!("Number of persons detected: {}", report.detection_count);
    for (key, entity) in report.entities.iter() {
      info!(
        "Person {} total duration: {} milliseconds",
        key, entity.total_absence_duration
      );
    }
    Ok(())
  }
}

/// 每帧一行 JSON
pub struct JsonLinesReporter<W: Write> {
  writer: W,
}

impl JsonLinesReporter<BufWriter<File>> {
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
    let path = path.as_ref();
    let file = File::create(path)?;
    info!("逐帧统计写入 {}", path.display());
    Ok(Self::new(BufWriter::new(file)))
  }
}

impl<W: Write> JsonLinesReporter<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn get_ref(&self) -> &W {
    &self.writer
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

impl<W: Write> Reporter for JsonLinesReporter<W> {
  fn report(&mut self, report: &FrameReport) -> Result<(), ReportError> {
    serde_json::to_writer(&mut self.writer, report)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }
}
