// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{
    ClearReason, FrameDetections, Render,
    draw::{Draw, FontError},
  },
};

/// 把画好框的帧保存到同一个文件，每帧覆盖
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("路径解码错误: {0}")]
  InvalidPath(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut draw = Draw::default();
    for (k, v) in uri.query_pairs() {
      if k == "font" {
        draw = draw.with_font_file(&*v)?;
      }
    }

    let path =
      urlencoding::decode(uri.path()).map_err(|e| SaveImageFileError::InvalidPath(e.to_string()))?;
    Ok(SaveImageFileOutput::new(&*path, draw))
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P, draw: Draw) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      draw,
    }
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    debug!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: &FrameDetections<'_>) -> Result<(), Self::Error> {
    let mut image = frame.image.to_rgb_image();
    self.draw.draw_detections_on_image(&mut image, result);
    self.save_image(image)
  }

  /// 无效帧时用同尺寸的黑图覆盖文件；输入结束时保留最后一帧
  fn clear(&self, reason: ClearReason) -> Result<(), Self::Error> {
    match reason {
      ClearReason::EndOfStream => {
        info!("输入结束, 最后一帧保存在 {}", self.path.display());
        Ok(())
      }
      ClearReason::InvalidFrame if self.path.exists() => {
        let (width, height) = image::image_dimensions(&self.path)?;
        debug!("清空图像文件: {}", self.path.display());
        self.save_image(image::RgbImage::new(width, height))
      }
      ClearReason::InvalidFrame => Ok(()),
    }
  }
}
