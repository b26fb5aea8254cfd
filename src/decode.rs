// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/decode.rs - 模型输出解码
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

use ndarray::{Axis, s};
use tracing::debug;

use crate::{error::InferenceError, model::RawOutput};

const BOX_ATTRIBUTES: usize = 4;

/// 单个候选框，坐标为模型输入空间的像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub y1: f32,
  pub x1: f32,
  pub y2: f32,
  pub x2: f32,
  pub score: f32,
  pub class_index: usize,
}

/// 解码后的全部候选，三个数组按候选序号对齐
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
  /// `[y1, x1, y2, x2]`
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub classes: Vec<usize>,
}

impl Candidates {
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<Candidate> {
    let [y1, x1, y2, x2] = *self.boxes.get(index)?;
    Some(Candidate {
      y1,
      x1,
      y2,
      x2,
      score: *self.scores.get(index)?,
      class_index: *self.classes.get(index)?,
    })
  }

  pub fn byte_len(&self) -> usize {
    let per_candidate =
      std::mem::size_of::<[f32; 4]>() + std::mem::size_of::<f32>() + std::mem::size_of::<usize>();
    self.len() * per_candidate
  }

  /// 按 NMS 返回的序号取出最终检测结果，顺序与 `indices` 一致
  pub fn gather(&self, indices: &[usize]) -> Vec<Detection> {
    indices
      .iter()
      .filter_map(|&index| {
        self.get(index).map(|c| Detection {
          index,
          bbox: [c.y1, c.x1, c.y2, c.x2],
          score: c.score,
          class_index: c.class_index,
        })
      })
      .collect()
  }
}

/// 经过 NMS 保留下来的候选
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  /// 在本帧候选数组中的序号
  pub index: usize,
  /// `[y1, x1, y2, x2]`，模型输入空间
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_index: usize,
}

/// 中心点编码 + 逐类置信度 → 角点框 + 最高分 + 类别
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
  num_classes: usize,
}

impl Decoder {
  pub fn new(num_classes: usize) -> Self {
    Self { num_classes }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn decode(&self, output: &RawOutput) -> Result<Candidates, InferenceError> {
    let shape = output.shape();
    let attributes = BOX_ATTRIBUTES + self.num_classes;
    if shape[0] != 1 || shape[1] != attributes || self.num_classes == 0 {
      return Err(InferenceError::OutputShape {
        expected_attributes: attributes,
        actual: shape.to_vec(),
      });
    }

    // [1, 属性, 候选] => [候选, 属性]
    let transposed = output.tensor().index_axis(Axis(0), 0).reversed_axes();
    let count = transposed.nrows();

    let mut candidates = Candidates {
      boxes: Vec::with_capacity(count),
      scores: Vec::with_capacity(count),
      classes: Vec::with_capacity(count),
    };

    for row in transposed.rows() {
      let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
      let x1 = cx - w / 2.0;
      let y1 = cy - h / 2.0;
      candidates.boxes.push([y1, x1, y1 + h, x1 + w]);

      // 单类别模型同样得到一维分数
      let confidences = row.slice(s![BOX_ATTRIBUTES..]);
      let (class_index, score) = confidences.iter().copied().enumerate().fold(
        (0, f32::NEG_INFINITY),
        |(best_idx, best), (idx, score)| {
          if score > best {
            (idx, score)
          } else {
            (best_idx, best)
          }
        },
      );
      candidates.scores.push(score);
      candidates.classes.push(class_index);
    }

    debug!("解码得到 {} 个候选框", candidates.len());
    Ok(candidates)
  }
}
