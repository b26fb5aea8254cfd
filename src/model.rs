// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/model.rs - 模型
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

use ndarray::{Array3, Array4};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl,
  error::InferenceError,
  preprocess::{PreprocessedInput, Ratios},
};

mod label;
pub use self::label::{COCO_CLASSES, LabelError, LabelTable};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{InputLayout, OnnxModel, OnnxModelBuilder, OnnxModelError};

/// 模型输入尺寸（NHWC 中的 W、H）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
  pub width: u32,
  pub height: u32,
}

impl ModelShape {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

/// 模型原始输出，形状 `[1, 4 + 类别数, 候选数]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  tensor: Array3<f32>,
}

impl RawOutput {
  pub fn new(tensor: Array3<f32>) -> Self {
    Self { tensor }
  }

  pub fn from_shape_vec(shape: [usize; 3], data: Vec<f32>) -> Result<Self, InferenceError> {
    let tensor = Array3::from_shape_vec((shape[0], shape[1], shape[2]), data)
      .map_err(|e| InferenceError::Backend(format!("输出数据与形状 {:?} 不符: {}", shape, e)))?;
    Ok(Self { tensor })
  }

  pub fn tensor(&self) -> &Array3<f32> {
    &self.tensor
  }

  pub fn shape(&self) -> [usize; 3] {
    let (b, a, n) = self.tensor.dim();
    [b, a, n]
  }

  pub fn byte_len(&self) -> usize {
    self.tensor.len() * std::mem::size_of::<f32>()
  }
}

pub trait Model {
  /// 模型声明的输入尺寸，加载时读取一次
  fn input_shape(&self) -> ModelShape;

  /// 执行一次推理；推理期间分配的张量在返回前释放
  fn infer(&self, input: &PreprocessedInput) -> Result<RawOutput, InferenceError>;

  /// 用全 1 输入跑一次推理，丢弃结果
  fn warm_up(&self) -> Result<(), InferenceError> {
    let shape = self.input_shape();
    let dummy = PreprocessedInput {
      tensor: Array4::ones((1, shape.height as usize, shape.width as usize, 3)),
      ratios: Ratios { x: 1.0, y: 1.0 },
      padded_size: shape.width.max(shape.height),
    };
    let output = self.infer(&dummy)?;
    debug!("预热完成, 输出形状 {:?}", output.shape());
    Ok(())
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn input_shape(&self) -> ModelShape {
    (**self).input_shape()
  }

  fn infer(&self, input: &PreprocessedInput) -> Result<RawOutput, InferenceError> {
    (**self).infer(input)
  }

  fn warm_up(&self) -> Result<(), InferenceError> {
    (**self).warm_up()
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 模型错误: {0}")]
  OnnxModelError(#[from] OnnxModelError),
  #[error("预热失败: {0}")]
  WarmUp(#[from] InferenceError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的模型
pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxModelBuilder::SCHEME {
        let model = OnnxModelBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Onnx(model));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl ModelWrapper {
  /// 加载后预热一次，避免首帧延迟
  pub fn load(url: &url::Url) -> Result<Self, ModelError> {
    let model = Self::from_url(url)?;
    info!("模型预热...");
    model.warm_up()?;
    Ok(model)
  }
}

impl Model for ModelWrapper {
  fn input_shape(&self) -> ModelShape {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.input_shape(),
      #[allow(unreachable_patterns)]
      _ => unreachable!("未启用任何模型后端"),
    }
  }

  fn infer(&self, input: &PreprocessedInput) -> Result<RawOutput, InferenceError> {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(input),
      #[allow(unreachable_patterns)]
      _ => unreachable!("未启用任何模型后端"),
    }
  }
}
