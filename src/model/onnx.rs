// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/model/onnx.rs - ONNX 推理后端
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
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::infer::Factoid;
use tract_onnx::tract_hir::internal::DimLike;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  error::InferenceError,
  model::{Model, ModelShape, RawOutput},
  preprocess::PreprocessedInput,
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;
const ONNX_OUTPUT_RANK: usize = 3;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl From<TractError> for OnnxModelError {
  fn from(err: TractError) -> Self {
    OnnxModelError::ModelLoadError(format!("{:#}", err))
  }
}

/// 模型声明的输入通道排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
  /// `[1, H, W, 3]`，与预处理输出一致
  Nhwc,
  /// `[1, 3, H, W]`，常见的 YOLOv8 导出格式，推理前需转置
  Nchw,
}

impl InputLayout {
  /// 从声明的四维输入中识别排布，返回排布和 (H, W)
  fn detect(dims: &[Option<usize>; 4]) -> (Self, Option<usize>, Option<usize>) {
    match dims {
      [_, Some(3), h, w] if *w != Some(3) => (InputLayout::Nchw, *h, *w),
      [_, h, w, _] => (InputLayout::Nhwc, *h, *w),
    }
  }

  fn input_dims(self, width: u32, height: u32) -> TVec<usize> {
    let (h, w) = (height as usize, width as usize);
    match self {
      InputLayout::Nhwc => tvec!(1, h, w, 3),
      InputLayout::Nchw => tvec!(1, 3, h, w),
    }
  }
}

pub struct OnnxModel {
  plan: TypedRunnableModel<TypedModel>,
  shape: ModelShape,
  layout: InputLayout,
}

impl OnnxModel {
  pub fn layout(&self) -> InputLayout {
    self.layout
  }
}

pub struct OnnxModelBuilder {
  model_path: String,
  width: Option<u32>,
  height: Option<u32>,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = urlencoding::decode(url.path())
      .map_err(|e| OnnxModelError::ModelPathError(e.to_string()))?
      .into_owned();

    let mut builder = OnnxModelBuilder {
      model_path,
      width: None,
      height: None,
    };
    for (k, v) in url.query_pairs() {
      let parsed = v
        .parse::<u32>()
        .map_err(|e| OnnxModelError::ModelPathError(format!("参数 {}={} 无效: {}", k, v, e)));
      match &*k {
        "width" => builder.width = Some(parsed?),
        "height" => builder.height = Some(parsed?),
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }
    Ok(builder)
  }
}

impl OnnxModelBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      width: None,
      height: None,
    }
  }

  /// 模型输入维度为符号维度时使用的尺寸
  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.width = Some(width);
    self.height = Some(height);
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model = tract_onnx::onnx().model_for_path(&self.model_path)?;

    if model.inputs.len() != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", model.inputs.len());
      return Err(OnnxModelError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        model.inputs.len()
      )));
    }

    // 输入形状只在加载时读取一次；符号维度回退到参数或默认值
    let declared: Vec<Option<usize>> = model
      .input_fact(0)?
      .shape
      .dims()
      .map(|d| d.concretize().and_then(|d| d.to_usize().ok()))
      .collect();
    debug!("模型声明的输入形状: {:?}", declared);

    let (layout, height, width) = match declared.as_slice() {
      [b, c, h, w] => {
        let (layout, h, w) = InputLayout::detect(&[*b, *c, *h, *w]);
        (
          layout,
          self
            .height
            .or(h.map(|h| h as u32))
            .unwrap_or(ONNX_DEFAULT_INPUT_SIZE),
          self
            .width
            .or(w.map(|w| w as u32))
            .unwrap_or(ONNX_DEFAULT_INPUT_SIZE),
        )
      }
      [] => (
        InputLayout::Nhwc,
        self.height.unwrap_or(ONNX_DEFAULT_INPUT_SIZE),
        self.width.unwrap_or(ONNX_DEFAULT_INPUT_SIZE),
      ),
      other => {
        return Err(OnnxModelError::ModelInvalid(format!(
          "预期四维图像输入, 实际为 {:?}",
          other
        )));
      }
    };

    info!("创建推理计划, 输入 {}x{}, 排布 {:?}", width, height, layout);
    let plan = model
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), layout.input_dims(width, height)),
      )?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成");

    Ok(OnnxModel {
      plan,
      shape: ModelShape::new(width, height),
      layout,
    })
  }
}

impl Model for OnnxModel {
  fn input_shape(&self) -> ModelShape {
    self.shape
  }

  fn infer(&self, input: &PreprocessedInput) -> Result<RawOutput, InferenceError> {
    let view = match self.layout {
      InputLayout::Nhwc => input.tensor.view(),
      InputLayout::Nchw => input.tensor.view().permuted_axes([0, 3, 1, 2]),
    };
    let dims = view.shape().to_vec();
    let standard = view.as_standard_layout();
    let data = standard
      .as_slice()
      .ok_or_else(|| InferenceError::InputShape(dims.clone()))?;

    // 输入副本和推理结果都在本函数内释放
    let tensor = Tensor::from_shape::<f32>(&dims, data)
      .map_err(|e| InferenceError::Backend(format!("{:#}", e)))?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| InferenceError::Backend(format!("{:#}", e)))?;

    let output = outputs
      .first()
      .ok_or_else(|| InferenceError::Backend("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| InferenceError::Backend(format!("{:#}", e)))?;

    let shape = view.shape().to_vec();
    if shape.len() != ONNX_OUTPUT_RANK {
      return Err(InferenceError::Backend(format!(
        "预期三维输出, 实际为 {:?}",
        shape
      )));
    }
    debug!("模型输出形状: {:?}", shape);

    RawOutput::from_shape_vec([shape[0], shape[1], shape[2]], view.iter().copied().collect())
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use ndarray::Array4;
  use prost::Message;
  use tract_onnx::pb::{
    self, tensor_proto::DataType, tensor_shape_proto::dimension::Value as Dim,
    type_proto::Value as TypeValue,
  };

  use super::*;
  use crate::preprocess::Ratios;

  enum D {
    V(i64),
    P(&'static str),
  }

  fn value_info(name: &str, dims: Option<&[D]>) -> pb::ValueInfoProto {
    let shape = dims.map(|dims| pb::TensorShapeProto {
      dim: dims
        .iter()
        .map(|d| pb::tensor_shape_proto::Dimension {
          value: Some(match d {
            D::V(v) => Dim::DimValue(*v),
            D::P(p) => Dim::DimParam(p.to_string()),
          }),
          ..Default::default()
        })
        .collect(),
    });
    pb::ValueInfoProto {
      name: name.to_string(),
      r#type: Some(pb::TypeProto {
        value: Some(TypeValue::TensorType(pb::type_proto::Tensor {
          elem_type: DataType::Float as i32,
          shape,
        })),
        ..Default::default()
      }),
      ..Default::default()
    }
  }

  /// 单节点模型：`images` 经过 `op` 得到 `output`
  fn write_model(
    path: &Path,
    input: &[D],
    op: &str,
    initializer: Vec<pb::TensorProto>,
  ) {
    let mut inputs = vec!["images".to_string()];
    inputs.extend(initializer.iter().map(|t| t.name.clone()));
    let graph = pb::GraphProto {
      name: "fixture".to_string(),
      node: vec![pb::NodeProto {
        input: inputs,
        output: vec!["output".to_string()],
        op_type: op.to_string(),
        ..Default::default()
      }],
      initializer,
      input: vec![value_info("images", Some(input))],
      output: vec![value_info("output", None)],
      ..Default::default()
    };
    let model = pb::ModelProto {
      ir_version: 7,
      opset_import: vec![pb::OperatorSetIdProto {
        domain: String::new(),
        version: 13,
      }],
      graph: Some(graph),
      ..Default::default()
    };
    std::fs::write(path, model.encode_to_vec()).unwrap();
  }

  fn reshape_to(dims: &[i64]) -> pb::TensorProto {
    pb::TensorProto {
      name: "shape".to_string(),
      dims: vec![dims.len() as i64],
      data_type: DataType::Int64 as i32,
      int64_data: dims.to_vec(),
      ..Default::default()
    }
  }

  fn input_for(shape: ModelShape) -> PreprocessedInput {
    let (h, w) = (shape.height as usize, shape.width as usize);
    let tensor = Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
      (c * 100 + y * w + x) as f32
    });
    PreprocessedInput {
      tensor,
      ratios: Ratios { x: 1.0, y: 1.0 },
      padded_size: w.max(h) as u32,
    }
  }

  #[test]
  fn nhwc_input_shape_is_read_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nhwc.onnx");
    write_model(
      &path,
      &[D::V(1), D::V(8), D::V(6), D::V(3)],
      "Reshape",
      vec![reshape_to(&[1, 3, -1])],
    );

    let model = OnnxModelBuilder::new(path.to_string_lossy()).build().unwrap();
    assert_eq!(model.input_shape(), ModelShape::new(6, 8));
    assert_eq!(model.layout(), InputLayout::Nhwc);

    let output = model.infer(&input_for(model.input_shape())).unwrap();
    assert_eq!(output.shape(), [1, 3, 48]);
  }

  #[test]
  fn channels_first_model_is_transposed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nchw.onnx");
    write_model(
      &path,
      &[D::V(1), D::V(3), D::V(8), D::V(6)],
      "Reshape",
      vec![reshape_to(&[1, 3, -1])],
    );

    let model = OnnxModelBuilder::new(path.to_string_lossy()).build().unwrap();
    assert_eq!(model.input_shape(), ModelShape::new(6, 8));
    assert_eq!(model.layout(), InputLayout::Nchw);

    let input = input_for(model.input_shape());
    let output = model.infer(&input).unwrap();
    assert_eq!(output.shape(), [1, 3, 48]);
    // 每个通道平面连续排列
    let tensor = output.tensor();
    for c in 0..3 {
      for (i, &v) in tensor.slice(ndarray::s![0, c, ..]).iter().enumerate() {
        let (y, x) = (i / 6, i % 6);
        assert_eq!(v, input.tensor[[0, y, x, c]]);
      }
    }
  }

  #[test]
  fn symbolic_dims_use_override_or_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dynamic.onnx");
    write_model(
      &path,
      &[D::P("batch"), D::P("height"), D::P("width"), D::V(3)],
      "Identity",
      Vec::new(),
    );

    let url = Url::parse(&format!(
      "onnx://{}?width=32&height=16",
      path.to_string_lossy()
    ))
    .unwrap();
    let model = OnnxModelBuilder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(model.input_shape(), ModelShape::new(32, 16));

    let model = OnnxModelBuilder::new(path.to_string_lossy()).build().unwrap();
    assert_eq!(
      model.input_shape(),
      ModelShape::new(ONNX_DEFAULT_INPUT_SIZE, ONNX_DEFAULT_INPUT_SIZE)
    );
  }

  #[test]
  fn non_rank_three_output_is_a_backend_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.onnx");
    write_model(
      &path,
      &[D::V(1), D::V(2), D::V(2), D::V(3)],
      "Flatten",
      Vec::new(),
    );

    let model = OnnxModelBuilder::new(path.to_string_lossy()).build().unwrap();
    let err = model.infer(&input_for(model.input_shape())).unwrap_err();
    assert!(matches!(err, InferenceError::Backend(_)));
  }

  #[test]
  fn url_must_use_onnx_scheme() {
    let url = Url::parse("file:///models/yolo.onnx").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::ModelPathError(_))
    ));

    let url = Url::parse("onnx:///models/yolo.onnx?width=abc").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.onnx");
    assert!(matches!(
      OnnxModelBuilder::new(path.to_string_lossy()).build(),
      Err(OnnxModelError::ModelLoadError(_))
    ));
  }
}
