// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::config::SuppressionConfig;

/// 计算两个 `[y1, x1, y2, x2]` 框的 IoU，角点顺序颠倒时按最小/最大值处理
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let (a_ymin, a_ymax) = (a[0].min(a[2]), a[0].max(a[2]));
  let (a_xmin, a_xmax) = (a[1].min(a[3]), a[1].max(a[3]));
  let (b_ymin, b_ymax) = (b[0].min(b[2]), b[0].max(b[2]));
  let (b_xmin, b_xmax) = (b[1].min(b[3]), b[1].max(b[3]));

  let area_a = (a_ymax - a_ymin) * (a_xmax - a_xmin);
  let area_b = (b_ymax - b_ymin) * (b_xmax - b_xmin);
  if !(area_a > 0.0 && area_b > 0.0) {
    return 0.0;
  }

  let inter_h = (a_ymax.min(b_ymax) - a_ymin.max(b_ymin)).max(0.0);
  let inter_w = (a_xmax.min(b_xmax) - a_xmin.max(b_xmin)).max(0.0);
  let intersection = inter_h * inter_w;
  intersection / (area_a + area_b - intersection)
}

/// 贪心非极大值抑制（不区分类别）
#[derive(Debug, Clone, Copy)]
pub struct Suppressor {
  config: SuppressionConfig,
}

impl Suppressor {
  pub fn new(config: SuppressionConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &SuppressionConfig {
    &self.config
  }

  /// 返回保留下来的候选序号，按选中顺序（分数从高到低）排列
  pub fn suppress(&self, boxes: &[[f32; 4]], scores: &[f32]) -> Vec<usize> {
    let SuppressionConfig {
      max_output_size,
      iou_threshold,
      score_threshold,
    } = self.config;

    // NaN 不满足比较，直接被过滤
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
      .filter(|&i| scores[i] >= score_threshold)
      .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut selected: Vec<usize> = Vec::with_capacity(max_output_size.min(order.len()));
    for candidate in order {
      if selected.len() >= max_output_size {
        break;
      }
      let overlaps = selected
        .iter()
        .any(|&kept| iou(&boxes[kept], &boxes[candidate]) > iou_threshold);
      if !overlaps {
        selected.push(candidate);
      }
    }

    debug!("NMS: {} 个候选保留 {} 个", boxes.len(), selected.len());
    selected
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn suppressor() -> Suppressor {
    Suppressor::new(SuppressionConfig::default())
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let b = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[5.0, 5.0, 6.0, 6.0]), 0.0);
  }

  #[test]
  fn iou_handles_flipped_corners() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let flipped = [10.0, 10.0, 0.0, 0.0];
    assert!((iou(&a, &flipped) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn degenerate_box_never_overlaps() {
    assert_eq!(iou(&[0.0, 0.0, 0.0, 10.0], &[0.0, 0.0, 10.0, 10.0]), 0.0);
  }

  #[test]
  fn keeps_highest_of_overlapping_pair() {
    let boxes = [
      [0.0, 0.0, 10.0, 10.0],
      [0.5, 0.5, 10.5, 10.5],
      [50.0, 50.0, 60.0, 60.0],
    ];
    let scores = [0.6, 0.9, 0.5];
    assert_eq!(suppressor().suppress(&boxes, &scores), vec![1, 2]);
  }

  #[test]
  fn drops_low_scores_and_nan() {
    let boxes = [
      [0.0, 0.0, 1.0, 1.0],
      [10.0, 10.0, 11.0, 11.0],
      [20.0, 20.0, 21.0, 21.0],
    ];
    let scores = [0.19, f32::NAN, 0.2];
    assert_eq!(suppressor().suppress(&boxes, &scores), vec![2]);
  }

  #[test]
  fn respects_max_output_size() {
    let boxes: Vec<[f32; 4]> = (0..20)
      .map(|i| {
        let o = i as f32 * 100.0;
        [o, o, o + 10.0, o + 10.0]
      })
      .collect();
    let scores: Vec<f32> = (0..20).map(|i| 0.3 + i as f32 * 0.01).collect();
    let suppressor = Suppressor::new(SuppressionConfig {
      max_output_size: 5,
      ..SuppressionConfig::default()
    });

    let kept = suppressor.suppress(&boxes, &scores);
    assert_eq!(kept, vec![19, 18, 17, 16, 15]);
  }

  #[test]
  fn output_satisfies_all_guarantees() {
    // 网格上互相重叠的一批框
    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    for i in 0..15 {
      for j in 0..15 {
        let (y, x) = (i as f32 * 4.0, j as f32 * 4.0);
        boxes.push([y, x, y + 10.0, x + 10.0]);
        scores.push(((i * 31 + j * 17) % 100) as f32 / 100.0);
      }
    }
    let config = SuppressionConfig::default();
    let kept = Suppressor::new(config).suppress(&boxes, &scores);

    assert!(!kept.is_empty());
    assert!(kept.len() <= config.max_output_size);
    for (n, &a) in kept.iter().enumerate() {
      assert!(scores[a] >= config.score_threshold);
      for &b in &kept[n + 1..] {
        assert!(iou(&boxes[a], &boxes[b]) <= config.iou_threshold);
        assert!(scores[a] >= scores[b]);
      }
    }
  }

  #[test]
  fn suppression_is_deterministic() {
    let boxes = [
      [0.0, 0.0, 10.0, 10.0],
      [1.0, 1.0, 11.0, 11.0],
      [0.0, 20.0, 10.0, 30.0],
    ];
    let scores = [0.5, 0.5, 0.5];
    let first = suppressor().suppress(&boxes, &scores);
    let second = suppressor().suppress(&boxes, &scores);
    assert_eq!(first, second);
    // 同分时保持原有顺序
    assert_eq!(first, vec![0, 2]);
  }
}
