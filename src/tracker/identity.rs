// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/tracker/identity.rs - 目标身份分配
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

use crate::{decode::Detection, nms::iou, tracker::EntityKey};

/// 为本帧每个检测分配目标键，返回值与 `detections` 一一对应且互不重复
pub trait IdentityAssigner: Send {
  fn assign(&mut self, detections: &[Detection]) -> Vec<EntityKey>;

  /// 目标被跟踪器清除后调用，之后不再匹配该键
  fn forget(&mut self, _key: &EntityKey) {}
}

/// 以候选序号作为身份
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexIdentity;

impl IdentityAssigner for IndexIdentity {
  fn assign(&mut self, detections: &[Detection]) -> Vec<EntityKey> {
    detections
      .iter()
      .map(|d| EntityKey::person(d.index))
      .collect()
  }
}

/// 与每个已知目标最后出现的框做贪心 IoU 匹配，未匹配的检测分配新键
///
/// 缺席的目标保留最后的框，直到跟踪器将其清除，因此短暂丢失后仍能找回原来的键。
#[derive(Debug, Clone)]
pub struct IouMatchIdentity {
  threshold: f32,
  known: Vec<(EntityKey, [f32; 4])>,
  next_id: usize,
}

impl IouMatchIdentity {
  pub fn new(threshold: f32) -> Self {
    Self {
      threshold,
      known: Vec::new(),
      next_id: 0,
    }
  }

  /// 当前仍在记忆中的目标数量
  pub fn known_len(&self) -> usize {
    self.known.len()
  }
}

impl IdentityAssigner for IouMatchIdentity {
  fn assign(&mut self, detections: &[Detection]) -> Vec<EntityKey> {
    let mut claimed = vec![false; self.known.len()];
    let mut keys = Vec::with_capacity(detections.len());
    let mut fresh = Vec::new();

    // 检测已按分数从高到低排列，高分的先挑选
    for detection in detections {
      let best = self
        .known
        .iter()
        .enumerate()
        .filter(|(i, _)| !claimed[*i])
        .map(|(i, (_, bbox))| (i, iou(bbox, &detection.bbox)))
        .filter(|(_, overlap)| *overlap >= self.threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1));

      let key = match best {
        Some((i, _)) => {
          claimed[i] = true;
          self.known[i].1 = detection.bbox;
          self.known[i].0.clone()
        }
        None => {
          let key = EntityKey::person(self.next_id);
          self.next_id += 1;
          fresh.push((key.clone(), detection.bbox));
          key
        }
      };
      keys.push(key);
    }

    // 新目标在本帧匹配结束后才加入，避免同帧内互相匹配
    self.known.extend(fresh);
    keys
  }

  fn forget(&mut self, key: &EntityKey) {
    self.known.retain(|(known, _)| known != key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(index: usize, bbox: [f32; 4]) -> Detection {
    Detection {
      index,
      bbox,
      score: 0.9,
      class_index: 0,
    }
  }

  #[test]
  fn index_identity_uses_candidate_index() {
    let keys = IndexIdentity.assign(&[
      detection(12, [0.0; 4]),
      detection(3, [0.0; 4]),
    ]);
    assert_eq!(keys, vec![EntityKey::person(12), EntityKey::person(3)]);
  }

  #[test]
  fn iou_identity_follows_moving_box() {
    let mut identity = IouMatchIdentity::new(0.3);
    let first = identity.assign(&[
      detection(5, [0.0, 0.0, 10.0, 10.0]),
      detection(9, [100.0, 100.0, 110.0, 110.0]),
    ]);
    assert_eq!(first, vec![EntityKey::person(0), EntityKey::person(1)]);

    // 顺序和候选序号都变了，但位置连续
    let second = identity.assign(&[
      detection(2, [101.0, 101.0, 111.0, 111.0]),
      detection(40, [1.0, 1.0, 11.0, 11.0]),
    ]);
    assert_eq!(second, vec![EntityKey::person(1), EntityKey::person(0)]);
  }

  #[test]
  fn iou_identity_assigns_fresh_key_to_new_entity() {
    let mut identity = IouMatchIdentity::new(0.3);
    identity.assign(&[detection(0, [0.0, 0.0, 10.0, 10.0])]);
    let keys = identity.assign(&[
      detection(0, [0.0, 0.0, 10.0, 10.0]),
      detection(1, [50.0, 50.0, 60.0, 60.0]),
    ]);
    assert_eq!(keys, vec![EntityKey::person(0), EntityKey::person(1)]);
  }

  #[test]
  fn iou_identity_recovers_key_after_missed_frames() {
    let mut identity = IouMatchIdentity::new(0.3);
    identity.assign(&[
      detection(0, [0.0, 0.0, 10.0, 10.0]),
      detection(1, [50.0, 50.0, 60.0, 60.0]),
    ]);
    identity.assign(&[detection(0, [0.0, 0.0, 10.0, 10.0])]);
    identity.assign(&[]);

    let keys = identity.assign(&[detection(3, [51.0, 51.0, 61.0, 61.0])]);
    assert_eq!(keys, vec![EntityKey::person(1)]);
    assert_eq!(identity.known_len(), 2);
  }

  #[test]
  fn forgotten_key_is_not_matched_again() {
    let mut identity = IouMatchIdentity::new(0.3);
    identity.assign(&[detection(0, [0.0, 0.0, 10.0, 10.0])]);
    identity.forget(&EntityKey::person(0));
    assert_eq!(identity.known_len(), 0);

    let keys = identity.assign(&[detection(0, [0.0, 0.0, 10.0, 10.0])]);
    assert_eq!(keys, vec![EntityKey::person(1)]);
  }
}
