// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/output.rs - 渲染输出定义
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::Detection,
  frame::Frame,
  model::{LabelTable, ModelShape},
  preprocess::Ratios,
};

/// 渲染端
///
/// 接收模型坐标系下的检测结果和缩放比例，由渲染端自行换算到原始帧坐标。
pub trait Render {
  type Error;

  fn render_result(&self, frame: &Frame, result: &FrameDetections<'_>) -> Result<(), Self::Error>;

  /// 清空画面
  ///
  /// 当前帧无效时以 [`ClearReason::InvalidFrame`] 调用，画面上不应再留有上一帧的检测框；
  /// 输入结束时以 [`ClearReason::EndOfStream`] 调用，可以保留最后的结果。
  fn clear(&self, _reason: ClearReason) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
  InvalidFrame,
  EndOfStream,
}

/// 一帧的最终检测结果
#[derive(Debug, Clone, Copy)]
pub struct FrameDetections<'a> {
  pub detections: &'a [Detection],
  pub ratios: Ratios,
  pub model: ModelShape,
  pub labels: &'a LabelTable,
}

/// 换算到原始帧坐标后的一个检测
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem<'a> {
  pub label: &'a str,
  pub class_index: usize,
  pub score: f32,
  /// 相对原始帧的归一化坐标 `[x1, y1, x2, y2]`
  pub bbox: [f32; 4],
}

impl<'a> FrameDetections<'a> {
  pub fn len(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn items(&self) -> impl Iterator<Item = RenderItem<'a>> + 'a {
    let FrameDetections {
      detections,
      ratios,
      model,
      labels,
    } = *self;
    detections.iter().map(move |d| RenderItem {
      label: labels.name(d.class_index),
      class_index: d.class_index,
      score: d.score,
      bbox: ratios.model_to_source(d.bbox, model),
    })
  }
}

#[cfg(feature = "save_image_file")]
pub mod draw;

mod log_output;
pub use self::log_output::{LogOutput, LogOutputError};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("日志输出错误: {0}")]
  LogOutputError(#[from] LogOutputError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Log(LogOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &FrameDetections<'_>) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }

  fn clear(&self, reason: ClearReason) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.clear(reason).map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        output.clear(reason).map_err(OutputError::from)
      }
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.clear(reason).map_err(OutputError::from)
      }
    }
  }
}
