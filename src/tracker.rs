// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/tracker.rs - 目标在场/缺席时长跟踪
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

//! # 在场跟踪
//!
//! [`PresenceTracker`] 是跨帧保存状态的唯一组件，由帧驱动器持有，每帧以
//! NMS 之后的检测结果和当前时间戳调用一次 [`PresenceTracker::update`]：
//!
//! 1. 所有已知目标先标记为不在场；
//! 2. 本帧的每个检测通过 [`IdentityAssigner`] 得到目标键，新目标以当前时间创建，
//!    已有目标刷新最后出现时间并标记为在场；
//! 3. 仍不在场的目标累加 `now - last_detection_time` 到缺席时长。
//!
//! 默认的 [`IndexIdentity`] 以候选序号作为身份，候选集合的数量或顺序变化时会把
//! 不同的实体混为同一个键，因此时长只能作为近似的占用指标。

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
  config::{IdentityStrategy, TrackerConfig},
  decode::Detection,
};

mod identity;
mod store;

pub use self::identity::{IdentityAssigner, IndexIdentity, IouMatchIdentity};
pub use self::store::{MemoryStore, PresenceStore};

/// 目标键，形如 `person_3`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
  pub fn person(id: usize) -> Self {
    EntityKey(format!("person_{}", id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for EntityKey {
  fn from(value: &str) -> Self {
    EntityKey(value.to_string())
  }
}

/// 单个目标的时间记录，时间单位均为毫秒
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedEntity {
  pub first_detection_time: u64,
  pub last_detection_time: u64,
  /// 各次缺席累加的时长
  pub total_absence_duration: u64,
  /// 当前帧是否出现
  pub present: bool,
}

impl TrackedEntity {
  pub fn first_seen(now: u64) -> Self {
    Self {
      first_detection_time: now,
      last_detection_time: now,
      total_absence_duration: 0,
      present: true,
    }
  }

  /// 从首次出现到最近一次出现的跨度
  pub fn span(&self) -> u64 {
    self
      .last_detection_time
      .saturating_sub(self.first_detection_time)
  }
}

/// 一次更新的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerUpdate {
  /// 本帧检测数量
  pub detection_count: usize,
  /// 本帧新建的目标数量
  pub created: usize,
  /// 本帧被清除的目标数量
  pub evicted: usize,
}

pub struct PresenceTracker<S = MemoryStore> {
  store: S,
  identity: Box<dyn IdentityAssigner>,
  max_absence_ms: Option<u64>,
}

impl PresenceTracker<MemoryStore> {
  pub fn new(config: &TrackerConfig) -> Self {
    let identity: Box<dyn IdentityAssigner> = match config.identity {
      IdentityStrategy::Index => Box::new(IndexIdentity),
      IdentityStrategy::Iou => Box::new(IouMatchIdentity::new(config.match_iou_threshold)),
    };
    info!(
      "创建在场跟踪器: 身份策略 {:?}, 缺席清除阈值 {:?} ms",
      config.identity, config.max_absence_ms
    );
    Self::with_parts(MemoryStore::default(), identity, config.max_absence_ms)
  }
}

impl Default for PresenceTracker<MemoryStore> {
  fn default() -> Self {
    Self::new(&TrackerConfig::default())
  }
}

impl<S: PresenceStore> PresenceTracker<S> {
  pub fn with_parts(
    store: S,
    identity: Box<dyn IdentityAssigner>,
    max_absence_ms: Option<u64>,
  ) -> Self {
    Self {
      store,
      identity,
      max_absence_ms,
    }
  }

  pub fn update(&mut self, detections: &[Detection], now: u64) -> TrackerUpdate {
    self.store.for_each_mut(&mut |_, entity| entity.present = false);

    let mut created = 0;
    for key in self.identity.assign(detections) {
      let entity = match self.store.get(&key) {
        None => {
          created += 1;
          TrackedEntity::first_seen(now)
        }
        Some(existing) => TrackedEntity {
          last_detection_time: existing.last_detection_time.max(now),
          present: true,
          ..*existing
        },
      };
      self.store.upsert(key, entity);
    }

    self.store.for_each_mut(&mut |_, entity| {
      if !entity.present {
        entity.total_absence_duration += now.saturating_sub(entity.last_detection_time);
      }
    });

    let identity = &mut self.identity;
    let evicted = match self.max_absence_ms {
      Some(max_absence) => self.store.sweep(&mut |key, entity| {
        let keep = entity.present || now.saturating_sub(entity.last_detection_time) <= max_absence;
        if !keep {
          debug!("清除长期缺席的目标: {}", key);
          identity.forget(key);
        }
        keep
      }),
      None => 0,
    };

    TrackerUpdate {
      detection_count: detections.len(),
      created,
      evicted,
    }
  }

  pub fn get(&self, key: &EntityKey) -> Option<&TrackedEntity> {
    self.store.get(key)
  }

  pub fn snapshot(&self) -> Vec<(EntityKey, TrackedEntity)> {
    self.store.snapshot()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.len() == 0
  }

  pub fn present_count(&self) -> usize {
    self
      .store
      .snapshot()
      .iter()
      .filter(|(_, entity)| entity.present)
      .count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detections(indices: &[usize]) -> Vec<Detection> {
    indices
      .iter()
      .map(|&index| {
        let o = index as f32 * 100.0;
        Detection {
          index,
          bbox: [o, o, o + 50.0, o + 50.0],
          score: 0.9,
          class_index: 0,
        }
      })
      .collect()
  }

  fn entity(tracker: &PresenceTracker, key: &str) -> TrackedEntity {
    *tracker.get(&EntityKey::from(key)).unwrap()
  }

  #[test]
  fn gap_is_accumulated_as_absence() {
    let mut tracker = PresenceTracker::default();

    tracker.update(&detections(&[0, 1]), 0);
    assert_eq!(entity(&tracker, "person_0").total_absence_duration, 0);

    tracker.update(&detections(&[0]), 100);
    let absent = entity(&tracker, "person_1");
    assert!(!absent.present);
    assert_eq!(absent.total_absence_duration, 100);
    assert_eq!(entity(&tracker, "person_0").total_absence_duration, 0);

    tracker.update(&detections(&[0, 1]), 200);
    let back = entity(&tracker, "person_1");
    assert!(back.present);
    assert_eq!(back.total_absence_duration, 100);
    assert_eq!(back.last_detection_time, 200);
    assert_eq!(back.first_detection_time, 0);

    let steady = entity(&tracker, "person_0");
    assert_eq!(steady.total_absence_duration, 0);
    assert_eq!(steady.span(), 200);
  }

  #[test]
  fn consecutive_absent_frames_add_time_since_last_seen() {
    let mut tracker = PresenceTracker::default();
    tracker.update(&detections(&[3]), 0);
    tracker.update(&[], 100);
    tracker.update(&[], 250);
    // 每帧累加距最后出现的时长: 100 + 250
    assert_eq!(entity(&tracker, "person_3").total_absence_duration, 350);
  }

  #[test]
  fn new_entity_starts_present() {
    let mut tracker = PresenceTracker::default();
    let update = tracker.update(&detections(&[7]), 42);
    assert_eq!(update.detection_count, 1);
    assert_eq!(update.created, 1);

    let e = entity(&tracker, "person_7");
    assert!(e.present);
    assert_eq!(e.first_detection_time, 42);
    assert_eq!(e.last_detection_time, 42);
  }

  #[test]
  fn entities_are_kept_without_eviction() {
    let mut tracker = PresenceTracker::default();
    tracker.update(&detections(&[0, 1, 2]), 0);
    tracker.update(&[], 1_000_000);
    assert_eq!(tracker.len(), 3);
    assert_eq!(tracker.present_count(), 0);
  }

  #[test]
  fn eviction_removes_only_long_absent_entities() {
    let mut tracker = PresenceTracker::new(&TrackerConfig {
      max_absence_ms: Some(500),
      ..TrackerConfig::default()
    });
    tracker.update(&detections(&[0, 1]), 0);
    tracker.update(&detections(&[0]), 400);
    assert_eq!(tracker.len(), 2);

    let update = tracker.update(&detections(&[0]), 600);
    assert_eq!(update.evicted, 1);
    assert!(tracker.get(&EntityKey::person(1)).is_none());
    assert!(tracker.get(&EntityKey::person(0)).is_some());
  }

  fn iou_tracker(max_absence_ms: Option<u64>) -> PresenceTracker {
    PresenceTracker::new(&TrackerConfig {
      identity: IdentityStrategy::Iou,
      max_absence_ms,
      ..TrackerConfig::default()
    })
  }

  #[test]
  fn iou_identity_keeps_key_across_a_missed_frame() {
    let mut tracker = iou_tracker(None);
    let seen = detections(&[2]);
    tracker.update(&seen, 0);
    tracker.update(&[], 100);
    let update = tracker.update(&seen, 200);

    assert_eq!(update.created, 0);
    assert_eq!(tracker.len(), 1);
    let e = entity(&tracker, "person_0");
    assert!(e.present);
    assert_eq!(e.first_detection_time, 0);
    assert_eq!(e.last_detection_time, 200);
    assert_eq!(e.total_absence_duration, 100);
  }

  #[test]
  fn iou_identity_starts_over_after_eviction() {
    let mut tracker = iou_tracker(Some(50));
    let seen = detections(&[2]);
    tracker.update(&seen, 0);
    let update = tracker.update(&[], 100);
    assert_eq!(update.evicted, 1);

    tracker.update(&seen, 200);
    assert!(tracker.get(&EntityKey::person(0)).is_none());
    assert_eq!(entity(&tracker, "person_1").first_detection_time, 200);
  }

  #[test]
  fn timestamps_going_backwards_do_not_regress() {
    let mut tracker = PresenceTracker::default();
    tracker.update(&detections(&[0, 1]), 1000);
    tracker.update(&detections(&[0]), 900);

    let e0 = entity(&tracker, "person_0");
    assert_eq!(e0.last_detection_time, 1000);
    let e1 = entity(&tracker, "person_1");
    assert_eq!(e1.total_absence_duration, 0);
  }
}
