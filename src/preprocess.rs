// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use tracing::debug;

use crate::{
  error::{InvalidFrameError, PipelineError},
  frame::RgbFrame,
  model::ModelShape,
  scope::{FrameScope, Scoped},
};

/// 填充正方形边长与原始宽/高之比，均不小于 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratios {
  pub x: f32,
  pub y: f32,
}

impl Ratios {
  /// 模型坐标 `[y1, x1, y2, x2]` 转为相对原始帧的归一化坐标 `[x1, y1, x2, y2]`
  pub fn model_to_source(&self, bbox: [f32; 4], model: ModelShape) -> [f32; 4] {
    let [y1, x1, y2, x2] = bbox;
    let (mw, mh) = (model.width as f32, model.height as f32);
    [
      x1 / mw * self.x,
      y1 / mh * self.y,
      x2 / mw * self.x,
      y2 / mh * self.y,
    ]
  }

  /// 相对原始帧的归一化坐标 `[x1, y1, x2, y2]` 转为模型坐标 `[y1, x1, y2, x2]`
  pub fn source_to_model(&self, bbox: [f32; 4], model: ModelShape) -> [f32; 4] {
    let [x1, y1, x2, y2] = bbox;
    let (mw, mh) = (model.width as f32, model.height as f32);
    [
      y1 / self.y * mh,
      x1 / self.x * mw,
      y2 / self.y * mh,
      x2 / self.x * mw,
    ]
  }
}

/// 送入模型的输入张量，形状 `[1, H, W, 3]`，取值 `[0, 1]`
#[derive(Debug, Clone)]
pub struct PreprocessedInput {
  pub tensor: Array4<f32>,
  pub ratios: Ratios,
  /// 填充后正方形的边长
  pub padded_size: u32,
}

impl PreprocessedInput {
  pub fn shape(&self) -> ModelShape {
    let dims = self.tensor.dim();
    ModelShape::new(dims.2 as u32, dims.1 as u32)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
  model: ModelShape,
}

impl Preprocessor {
  pub fn new(model: ModelShape) -> Self {
    Self { model }
  }

  pub fn model_shape(&self) -> ModelShape {
    self.model
  }

  /// 右侧、下方补零成正方形，双线性缩放到模型尺寸，再归一化并增加批维度
  pub fn preprocess(
    &self,
    frame: &RgbFrame,
    scope: &FrameScope,
  ) -> Result<Scoped<PreprocessedInput>, PipelineError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
      return Err(InvalidFrameError::ZeroDimension { width, height }.into());
    }
    let ModelShape {
      width: model_width,
      height: model_height,
    } = self.model;
    if model_width == 0 || model_height == 0 {
      return Err(
        InvalidFrameError::ZeroModelDimension {
          width: model_width,
          height: model_height,
        }
        .into(),
      );
    }

    let max_size = width.max(height);
    let ratios = Ratios {
      x: max_size as f32 / width as f32,
      y: max_size as f32 / height as f32,
    };

    // 只在右侧和下方填充，不裁剪原始内容
    let padded = {
      let source = scope.track(frame.to_rgb_image(), frame_bytes(width, height))?;
      let mut padded = scope.track(
        RgbImage::new(max_size, max_size),
        frame_bytes(max_size, max_size),
      )?;
      image::imageops::replace(&mut *padded, &*source, 0, 0);
      padded
    };

    let resized = scope.track(
      image::imageops::resize(&*padded, model_width, model_height, FilterType::Triangle),
      frame_bytes(model_width, model_height),
    )?;
    drop(padded);

    let raw = resized.as_raw();
    let row = model_width as usize * 3;
    let tensor = Array4::from_shape_fn(
      (1, model_height as usize, model_width as usize, 3),
      |(_, y, x, c)| raw[y * row + x * 3 + c] as f32 / 255.0,
    );
    drop(resized);

    debug!(
      "预处理完成: {}x{} -> 填充 {} -> 模型 {}x{}, 比例 ({:.3}, {:.3})",
      width, height, max_size, model_width, model_height, ratios.x, ratios.y
    );

    let bytes = tensor.len() * std::mem::size_of::<f32>();
    Ok(scope.track(
      PreprocessedInput {
        tensor,
        ratios,
        padded_size: max_size,
      },
      bytes,
    )?)
  }
}

fn frame_bytes(width: u32, height: u32) -> usize {
  width as usize * height as usize * 3
}
