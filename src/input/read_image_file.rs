// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RgbFrame},
  input::{FrameSource, InputError, wall_clock_ms},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Invalid query parameter: {0}")]
  InvalidQuery(String),
}

/// 单张图片作为输入，可通过 `?repeat=N` 重复输出 N 次
pub struct ImageFileInput {
  image: RgbFrame,
  remaining: usize,
  index: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut repeat = 1;
    for (k, v) in url.query_pairs() {
      if k == "repeat" {
        repeat = v
          .parse::<usize>()
          .map_err(|e| ImageFileInputError::InvalidQuery(format!("repeat={}: {}", v, e)))?;
      }
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::InvalidQuery(e.to_string()))?;
    Self::open(path.as_ref(), repeat)
  }
}

impl ImageFileInput {
  pub fn open(path: &str, repeat: usize) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    info!(
      "读取图像文件: {} ({}x{}), 重复 {} 次",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(ImageFileInput {
      image: RgbFrame::from(image),
      remaining: repeat,
      index: 0,
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    let frame = Frame::new(self.image.clone(), self.index, wall_clock_ms());
    self.index += 1;
    Some(Ok(frame))
  }
}

impl FrameSource for ImageFileInput {
  fn dimensions(&self) -> (u32, u32) {
    (self.image.width(), self.image.height())
  }

  fn is_live(&self) -> bool {
    self.remaining > 0
  }
}
