// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};

use crate::error::InvalidFrameError;

const RGB_CHANNELS: usize = 3;

/// 任意尺寸的 NHWC 排布 RGB 帧
#[derive(Debug, Clone, Default)]
pub struct RgbFrame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
}

impl RgbFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, InvalidFrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(InvalidFrameError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
    })
  }

  /// 纯色帧，主要用于预热和测试
  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
    let data = color
      .iter()
      .copied()
      .cycle()
      .take(RGB_CHANNELS * width as usize * height as usize)
      .collect::<Vec<_>>();
    Self {
      data: data.into_boxed_slice(),
      width,
      height,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// NHWC 排布的原始像素
  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width;
    let data = &self.data;

    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width as usize + x as usize) * RGB_CHANNELS;
      Rgb([data[idx], data[idx + 1], data[idx + 2]])
    })
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
    }
  }
}

/// 带序号和时间戳的一帧
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbFrame,
  /// 帧序号
  pub index: u64,
  /// 采集时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbFrame, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_mismatched_buffer() {
    let err = RgbFrame::new(2, 2, vec![0; 5]).unwrap_err();
    assert_eq!(
      err,
      InvalidFrameError::BufferSizeMismatch {
        expected: 12,
        actual: 5
      }
    );
  }

  #[test]
  fn converts_through_rgb_image() {
    let frame = RgbFrame::filled(3, 2, [10, 20, 30]);
    let image = frame.to_rgb_image();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(2, 1), &Rgb([10, 20, 30]));

    let back = RgbFrame::from(image);
    assert_eq!(back.as_bytes(), frame.as_bytes());
  }

  #[test]
  fn zero_sized_frame_is_empty() {
    let frame = RgbFrame::new(0, 4, Vec::new()).unwrap();
    assert!(frame.is_empty());
  }
}
