// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::collections::VecDeque;

use thiserror::Error;

use crate::{
  FromUrl,
  frame::{Frame, RgbFrame},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "read_image_file")]
mod image_sequence;
#[cfg(feature = "read_image_file")]
pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};

/// 帧来源
///
/// 迭代器结束表示来源已失效；`dimensions` 为零且 `is_live` 为 false 时同样视为失效。
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  /// 当前像素尺寸
  fn dimensions(&self) -> (u32, u32);

  /// 是否还有活动的流或已加载的内容
  fn is_live(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像序列输入错误: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 内存中的帧队列，适合嵌入和测试
#[derive(Debug, Default)]
pub struct MemoryInput {
  frames: VecDeque<Frame>,
  dimensions: (u32, u32),
}

impl MemoryInput {
  pub fn new() -> Self {
    Self::default()
  }

  /// 追加一帧，序号按入队顺序分配
  pub fn push(&mut self, image: RgbFrame, timestamp_ms: u64) {
    let index = self.frames.back().map(|f| f.index + 1).unwrap_or(0);
    if self.frames.is_empty() {
      self.dimensions = (image.width(), image.height());
    }
    self.frames.push_back(Frame::new(image, index, timestamp_ms));
  }

  pub fn with_frame(mut self, image: RgbFrame, timestamp_ms: u64) -> Self {
    self.push(image, timestamp_ms);
    self
  }
}

impl Iterator for MemoryInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let frame = self.frames.pop_front()?;
    self.dimensions = (frame.image.width(), frame.image.height());
    Some(Ok(frame))
  }
}

impl FrameSource for MemoryInput {
  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn is_live(&self) -> bool {
    !self.frames.is_empty()
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceInput),
  Memory(MemoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
      if url.scheme() == ImageSequenceInput::SCHEME {
        let input = ImageSequenceInput::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.next(),
      InputWrapper::Memory(input) => input.next(),
    }
  }
}

impl FrameSource for InputWrapper {
  fn dimensions(&self) -> (u32, u32) {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.dimensions(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.dimensions(),
      InputWrapper::Memory(input) => input.dimensions(),
    }
  }

  fn is_live(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_live(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.is_live(),
      InputWrapper::Memory(input) => input.is_live(),
    }
  }
}

/// 当前墙钟时间（毫秒）
pub(crate) fn wall_clock_ms() -> u64 {
  chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn memory_input_drains_in_order() {
    let mut input = MemoryInput::new()
      .with_frame(RgbFrame::filled(4, 2, [0, 0, 0]), 10)
      .with_frame(RgbFrame::filled(4, 2, [0, 0, 0]), 20);
    assert!(input.is_live());
    assert_eq!(input.dimensions(), (4, 2));

    let first = input.next().unwrap().unwrap();
    assert_eq!((first.index, first.timestamp_ms), (0, 10));
    let second = input.next().unwrap().unwrap();
    assert_eq!((second.index, second.timestamp_ms), (1, 20));
    assert!(!input.is_live());
    assert!(input.next().is_none());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
