// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/tracker/store.rs - 目标存储
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

use std::collections::BTreeMap;

use crate::tracker::{EntityKey, TrackedEntity};

/// 目标记录的存储能力
pub trait PresenceStore {
  fn get(&self, key: &EntityKey) -> Option<&TrackedEntity>;

  fn upsert(&mut self, key: EntityKey, entity: TrackedEntity);

  /// 只保留 `keep` 返回 true 的记录，返回被删除的数量
  fn sweep(&mut self, keep: &mut dyn FnMut(&EntityKey, &TrackedEntity) -> bool) -> usize;

  fn for_each_mut(&mut self, f: &mut dyn FnMut(&EntityKey, &mut TrackedEntity));

  fn snapshot(&self) -> Vec<(EntityKey, TrackedEntity)>;

  fn len(&self) -> usize;
}

/// 进程内的有序存储
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  entities: BTreeMap<EntityKey, TrackedEntity>,
}

impl PresenceStore for MemoryStore {
  fn get(&self, key: &EntityKey) -> Option<&TrackedEntity> {
    self.entities.get(key)
  }

  fn upsert(&mut self, key: EntityKey, entity: TrackedEntity) {
    self.entities.insert(key, entity);
  }

  fn sweep(&mut self, keep: &mut dyn FnMut(&EntityKey, &TrackedEntity) -> bool) -> usize {
    let before = self.entities.len();
    self.entities.retain(|key, entity| keep(key, entity));
    before - self.entities.len()
  }

  fn for_each_mut(&mut self, f: &mut dyn FnMut(&EntityKey, &mut TrackedEntity)) {
    for (key, entity) in self.entities.iter_mut() {
      f(key, entity);
    }
  }

  fn snapshot(&self) -> Vec<(EntityKey, TrackedEntity)> {
    self
      .entities
      .iter()
      .map(|(key, entity)| (key.clone(), *entity))
      .collect()
  }

  fn len(&self) -> usize {
    self.entities.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upsert_replaces_and_sweep_counts_removed() {
    let mut store = MemoryStore::default();
    store.upsert(EntityKey::person(0), TrackedEntity::first_seen(0));
    store.upsert(EntityKey::person(1), TrackedEntity::first_seen(5));
    store.upsert(EntityKey::person(0), TrackedEntity::first_seen(10));
    assert_eq!(store.len(), 2);
    assert_eq!(
      store.get(&EntityKey::person(0)).unwrap().first_detection_time,
      10
    );

    let removed = store.sweep(&mut |_, e| e.first_detection_time > 5);
    assert_eq!(removed, 1);
    assert_eq!(store.snapshot().len(), 1);
  }
}
