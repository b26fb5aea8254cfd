// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/scope.rs - 单帧张量作用域
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

//! # 单帧张量作用域
//!
//! 每一帧处理开始时通过 [`TensorBudget::enter`] 进入一个 [`FrameScope`]，
//! 帧内分配的张量（填充图、缩放图、归一化输入、转置输出等）都通过
//! [`FrameScope::track`] 登记。登记得到的 [`Scoped`] 在析构时自动归还字节数，
//! 因此无论帧处理是正常结束还是提前返回，占用都会被释放。
//!
//! 帧结束时调用 [`FrameScope::close`]，若仍有未归还的字节则报告泄漏。

use std::{
  ops::{Deref, DerefMut},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use ndarray::{ArrayBase, Dimension, OwnedRepr};
use tracing::{debug, warn};

use crate::error::ResourceExhaustionError;

/// 张量字节预算，在多帧之间共享
#[derive(Debug, Clone)]
pub struct TensorBudget {
  live: Arc<AtomicUsize>,
  limit: usize,
}

impl Default for TensorBudget {
  fn default() -> Self {
    Self::unlimited()
  }
}

impl TensorBudget {
  pub fn new(limit: usize) -> Self {
    Self {
      live: Arc::new(AtomicUsize::new(0)),
      limit,
    }
  }

  pub fn unlimited() -> Self {
    Self::new(usize::MAX)
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  /// 当前仍被占用的字节数
  pub fn live_bytes(&self) -> usize {
    self.live.load(Ordering::Acquire)
  }

  /// 进入新的帧作用域
  pub fn enter(&self) -> FrameScope {
    let baseline = self.live_bytes();
    debug!("进入帧作用域, 当前占用 {} 字节", baseline);
    FrameScope {
      budget: self.clone(),
      baseline,
    }
  }

  fn acquire(&self, bytes: usize) -> Result<(), ResourceExhaustionError> {
    let mut live = self.live.load(Ordering::Acquire);
    loop {
      let next = live
        .checked_add(bytes)
        .filter(|next| *next <= self.limit)
        .ok_or(ResourceExhaustionError::BudgetExceeded {
          live,
          requested: bytes,
          limit: self.limit,
        })?;
      match self
        .live
        .compare_exchange_weak(live, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return Ok(()),
        Err(current) => live = current,
      }
    }
  }

  fn release(&self, bytes: usize) {
    self.live.fetch_sub(bytes, Ordering::AcqRel);
  }
}

/// 一帧处理期间的张量作用域
#[derive(Debug)]
pub struct FrameScope {
  budget: TensorBudget,
  baseline: usize,
}

impl FrameScope {
  /// 登记一个占用 `bytes` 字节的值
  pub fn track<T>(&self, value: T, bytes: usize) -> Result<Scoped<T>, ResourceExhaustionError> {
    self.budget.acquire(bytes)?;
    Ok(Scoped {
      value,
      bytes,
      budget: self.budget.clone(),
    })
  }

  /// 登记一个 ndarray 张量，字节数按元素个数计算
  pub fn track_array<A, D: Dimension>(
    &self,
    array: ArrayBase<OwnedRepr<A>, D>,
  ) -> Result<Scoped<ArrayBase<OwnedRepr<A>, D>>, ResourceExhaustionError> {
    let bytes = array.len() * std::mem::size_of::<A>();
    self.track(array, bytes)
  }

  /// 本作用域内尚未释放的字节数
  pub fn live_bytes(&self) -> usize {
    self.budget.live_bytes().saturating_sub(self.baseline)
  }

  /// 结束作用域，检查是否有张量逃逸出本帧
  pub fn close(self) -> Result<(), ResourceExhaustionError> {
    let leaked = self.live_bytes();
    if leaked > 0 {
      warn!("帧作用域结束时仍有 {} 字节未释放", leaked);
      return Err(ResourceExhaustionError::Leaked(leaked));
    }
    debug!("离开帧作用域");
    Ok(())
  }
}

/// 被作用域登记的值，析构时归还预算
#[derive(Debug)]
pub struct Scoped<T> {
  value: T,
  bytes: usize,
  budget: TensorBudget,
}

impl<T> Scoped<T> {
  pub fn bytes(&self) -> usize {
    self.bytes
  }
}

impl<T> Deref for Scoped<T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.value
  }
}

impl<T> DerefMut for Scoped<T> {
  fn deref_mut(&mut self) -> &mut T {
    &mut self.value
  }
}

impl<T> Drop for Scoped<T> {
  fn drop(&mut self) {
    self.budget.release(self.bytes);
  }
}

#[cfg(test)]
mod tests {
  use ndarray::Array2;

  use super::*;

  #[test]
  fn tracked_values_are_released_on_drop() {
    let budget = TensorBudget::new(1024);
    let scope = budget.enter();
    {
      let tensor = scope.track_array(Array2::<f32>::zeros((4, 4))).unwrap();
      assert_eq!(tensor.bytes(), 64);
      assert_eq!(budget.live_bytes(), 64);
    }
    assert_eq!(budget.live_bytes(), 0);
    scope.close().unwrap();
  }

  #[test]
  fn allocation_past_limit_fails() {
    let budget = TensorBudget::new(100);
    let scope = budget.enter();
    let _held = scope.track((), 80).unwrap();
    let err = scope.track((), 40).unwrap_err();
    assert_eq!(
      err,
      ResourceExhaustionError::BudgetExceeded {
        live: 80,
        requested: 40,
        limit: 100
      }
    );
  }

  #[test]
  fn escaped_tensor_is_reported_as_leak() {
    let budget = TensorBudget::new(1024);
    let scope = budget.enter();
    let escaped = scope.track(vec![0u8; 16], 16).unwrap();
    assert_eq!(scope.close(), Err(ResourceExhaustionError::Leaked(16)));
    drop(escaped);
    assert_eq!(budget.live_bytes(), 0);
  }
}
