// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/input/image_sequence.rs - 目录图像序列输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RgbFrame},
  input::{FrameSource, InputError, wall_clock_ms},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误 {0}: {1}")]
  ImageError(PathBuf, image::ImageError),
  #[error("参数无效: {0}")]
  InvalidQuery(String),
}

/// 把目录下的图片按文件名排序后当作视频流
///
/// 指定 `?fps=N` 时时间戳按帧序号推算，否则使用读取时的墙钟时间。
pub struct ImageSequenceInput {
  pending: VecDeque<PathBuf>,
  dimensions: (u32, u32),
  index: u64,
  fps: Option<f64>,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceInputError::SchemeMismatch);
    }

    let mut fps = None;
    for (k, v) in url.query_pairs() {
      if k == "fps" {
        let value = v
          .parse::<f64>()
          .ok()
          .filter(|fps| *fps > 0.0 && fps.is_finite())
          .ok_or_else(|| ImageSequenceInputError::InvalidQuery(format!("fps={}", v)))?;
        fps = Some(value);
      }
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageSequenceInputError::InvalidQuery(e.to_string()))?;
    Self::open(Path::new(&*path), fps)
  }
}

impl ImageSequenceInput {
  pub fn open(directory: &Path, fps: Option<f64>) -> Result<Self, ImageSequenceInputError> {
    let mut paths = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
      })
      .collect::<Vec<_>>();
    paths.sort();
    info!("目录 {} 中找到 {} 张图片", directory.display(), paths.len());

    let dimensions = match paths.first() {
      Some(first) => image::image_dimensions(first)
        .map_err(|e| ImageSequenceInputError::ImageError(first.clone(), e))?,
      None => (0, 0),
    };

    Ok(Self {
      pending: paths.into(),
      dimensions,
      index: 0,
      fps,
    })
  }

  fn timestamp(&self) -> u64 {
    match self.fps {
      Some(fps) => (self.index as f64 * 1000.0 / fps).round() as u64,
      None => wall_clock_ms(),
    }
  }

  fn load(path: &Path) -> Result<RgbFrame, ImageSequenceInputError> {
    let image = ImageReader::open(path)?
      .decode()
      .map_err(|e| ImageSequenceInputError::ImageError(path.to_path_buf(), e))?
      .to_rgb8();
    Ok(RgbFrame::from(image))
  }
}

impl Iterator for ImageSequenceInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.pending.pop_front()?;
    debug!("读取第 {} 帧: {}", self.index, path.display());

    let result = Self::load(&path).map(|image| {
      self.dimensions = (image.width(), image.height());
      Frame::new(image, self.index, self.timestamp())
    });
    self.index += 1;
    Some(result.map_err(InputError::from))
  }
}

impl FrameSource for ImageSequenceInput {
  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn is_live(&self) -> bool {
    !self.pending.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  #[test]
  fn reads_images_in_name_order_with_synthetic_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
    RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let mut input = ImageSequenceInput::open(dir.path(), Some(10.0)).unwrap();
    assert_eq!(input.dimensions(), (4, 4));
    assert!(input.is_live());

    let frames: Vec<Frame> = input.by_ref().map(|f| f.unwrap()).collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].timestamp_ms, 0);
    assert_eq!(frames[1].timestamp_ms, 100);
    assert!(!input.is_live());
  }

  #[test]
  fn empty_directory_is_not_live() {
    let dir = tempfile::tempdir().unwrap();
    let input = ImageSequenceInput::open(dir.path(), None).unwrap();
    assert_eq!(input.dimensions(), (0, 0));
    assert!(!input.is_live());
  }
}
