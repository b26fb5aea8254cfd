// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/error.rs - 流水线错误分类
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

/// 输入帧无效（空帧、尺寸为零、缓冲区长度不符）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidFrameError {
  #[error("帧尺寸为零: {width}x{height}")]
  ZeroDimension { width: u32, height: u32 },
  #[error("模型输入尺寸为零: {width}x{height}")]
  ZeroModelDimension { width: u32, height: u32 },
  #[error("帧数据长度不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 推理或推理输出解析失败
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出形状错误: 期望 [1, {expected_attributes}, N], 实际 {actual:?}")]
  OutputShape {
    expected_attributes: usize,
    actual: Vec<usize>,
  },
  #[error("模型输入形状错误: {0:?}")]
  InputShape(Vec<usize>),
}

/// 张量分配超出预算，或帧结束时仍有未释放的张量
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceExhaustionError {
  #[error("张量分配超出预算: 已占用 {live} 字节, 申请 {requested} 字节, 上限 {limit} 字节")]
  BudgetExceeded {
    live: usize,
    requested: usize,
    limit: usize,
  },
  #[error("帧处理结束后仍有 {0} 字节张量未释放")]
  Leaked(usize),
}

/// 单帧流水线错误
///
/// `InvalidFrame` 和 `Inference` 只影响当前帧，驱动循环会记录日志后继续；
/// `ResourceExhaustion` 表示系统性泄漏，会终止驱动循环。
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无效帧: {0}")]
  InvalidFrame(#[from] InvalidFrameError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("资源耗尽: {0}")]
  ResourceExhaustion(#[from] ResourceExhaustionError),
}

impl PipelineError {
  /// 是否应当终止驱动循环
  pub fn is_fatal(&self) -> bool {
    matches!(self, PipelineError::ResourceExhaustion(_))
  }
}
