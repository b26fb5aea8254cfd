// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{
    ClearReason, FrameDetections, Render,
    draw::{Draw, FontError, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
  #[error("路径解码错误: {0}")]
  InvalidPath(String),
}

/// 画框保存，或保存原图并附带同名 `.txt` 记录
pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &Frame,
    result: &FrameDetections<'_>,
  ) -> Result<(), DirectoryRecordOutputError> {
    let mut image = frame.image.to_rgb_image();
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_detections_on_image(&mut image, result);
        image.save(path)?;
      }
      DrawWrapper::Record(record) => {
        image.save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }
}

/// 按 `年/月/日` 分目录保存每一帧
///
/// 默认只保存有检测结果的帧，`?always` 时每帧都保存；
/// `?record=name` 或 `?record=id` 改为保存原图和文本记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut record = None;
    let mut draw = Draw::default();
    let mut always = false;
    for (k, v) in uri.query_pairs() {
      match &*k {
        "record" => {
          record = Some(Record {
            label_with_name: v != "id",
          })
        }
        "font" => draw = draw.with_font_file(&*v)?,
        "always" => always = true,
        _ => {}
      }
    }

    let draw = match record {
      Some(record) => DrawWrapper::Record(record),
      None => DrawWrapper::Draw(Box::new(draw)),
    };
    let directory = urlencoding::decode(uri.path())
      .map_err(|e| DirectoryRecordOutputError::InvalidPath(e.to_string()))?;

    Ok(DirectoryRecordOutput::new(&*directory, draw, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: AsRef<Path>>(directory: P, draw: DrawWrapper, always: bool) -> Self {
    info!(
      "记录目录: {}, 每帧保存: {}",
      directory.as_ref().display(),
      always
    );
    Self {
      directory: directory.as_ref().to_path_buf(),
      draw,
      frame_counter: AtomicU32::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &FrameDetections<'_>) -> Result<(), Self::Error> {
    if self.always || !result.is_empty() {
      let path = self.frame_path()?;
      self.draw.save_result(&path, frame, result)?;
      debug!("保存第 {} 帧到 {}", frame.index, path.display());
    }
    Ok(())
  }

  /// 已写出的记录是历史，不会被清除
  fn clear(&self, reason: ClearReason) -> Result<(), Self::Error> {
    let frames = self.frame_counter.load(Ordering::Relaxed);
    match reason {
      ClearReason::InvalidFrame => debug!("跳过无效帧, 已记录 {} 帧", frames),
      ClearReason::EndOfStream => info!("输入结束, 共记录 {} 帧", frames),
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::Detection,
    frame::RgbFrame,
    model::{LabelTable, ModelShape},
    preprocess::Ratios,
  };

  fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          found.push(path);
        }
      }
    }
    found
  }

  #[test]
  fn records_only_frames_with_detections() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record=name", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let labels = LabelTable::coco();
    let frame = Frame::new(RgbFrame::filled(8, 8, [10, 20, 30]), 0, 0);
    let empty = FrameDetections {
      detections: &[],
      ratios: Ratios { x: 1.0, y: 1.0 },
      model: ModelShape::new(8, 8),
      labels: &labels,
    };
    output.render_result(&frame, &empty).unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    let detections = [Detection {
      index: 0,
      bbox: [0.0, 0.0, 4.0, 4.0],
      score: 0.5,
      class_index: 0,
    }];
    let found = FrameDetections {
      detections: &detections,
      ..empty
    };
    output.render_result(&frame, &found).unwrap();

    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
    let records = files_with_extension(dir.path(), "txt");
    assert_eq!(records.len(), 1);
    let text = std::fs::read_to_string(&records[0]).unwrap();
    assert!(text.starts_with("person, 0.5000"));
  }
}
