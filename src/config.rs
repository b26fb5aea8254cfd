// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/config.rs - 流水线参数配置
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

use std::{path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const DEFAULT_MAX_OUTPUT_SIZE: usize = 500;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.2;
/// 默认张量预算 1 GiB
const DEFAULT_TENSOR_BUDGET: usize = 1 << 30;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// NMS 参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
  pub max_output_size: usize,
  pub iou_threshold: f32,
  pub score_threshold: f32,
}

impl Default for SuppressionConfig {
  fn default() -> Self {
    Self {
      max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
    }
  }
}

/// 目标身份的分配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStrategy {
  /// 以 NMS 结果中的候选序号作为身份
  #[default]
  Index,
  /// 与上一帧的框做贪心 IoU 匹配
  Iou,
}

impl FromStr for IdentityStrategy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "index" => Ok(IdentityStrategy::Index),
      "iou" => Ok(IdentityStrategy::Iou),
      other => Err(ConfigError::Invalid(format!("未知的身份策略: {}", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
  pub identity: IdentityStrategy,
  /// IoU 匹配时认为是同一目标的最小 IoU
  pub match_iou_threshold: f32,
  /// 缺席超过该毫秒数的目标被清除；`None` 表示永不清除
  pub max_absence_ms: Option<u64>,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      identity: IdentityStrategy::Index,
      match_iou_threshold: 0.3,
      max_absence_ms: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
  /// 目标帧率；`None` 表示上一帧结束后立即开始下一帧
  pub fps: Option<f64>,
  /// 处理指定帧数后停止
  pub frame_number: Option<usize>,
  /// 单帧张量预算（字节）
  pub tensor_budget: usize,
}

impl Default for DriverConfig {
  fn default() -> Self {
    Self {
      fps: None,
      frame_number: None,
      tensor_budget: DEFAULT_TENSOR_BUDGET,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub suppression: SuppressionConfig,
  pub tracker: TrackerConfig,
  pub driver: DriverConfig,
}

impl PipelineConfig {
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&content)?;
    config.validate()?;
    info!("从 {} 加载配置", path.display());
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let s = &self.suppression;
    if !(0.0..=1.0).contains(&s.iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "iou_threshold 需在 [0, 1] 内, 实际为 {}",
        s.iou_threshold
      )));
    }
    if !s.score_threshold.is_finite() {
      return Err(ConfigError::Invalid("score_threshold 不是有限数".to_string()));
    }
    if !(0.0..=1.0).contains(&self.tracker.match_iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "match_iou_threshold 需在 [0, 1] 内, 实际为 {}",
        self.tracker.match_iou_threshold
      )));
    }
    if let Some(fps) = self.driver.fps
      && !(fps > 0.0 && fps.is_finite())
    {
      return Err(ConfigError::Invalid(format!("fps 需为正数, 实际为 {}", fps)));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn defaults_match_documented_constants() {
    let config = PipelineConfig::default();
    assert_eq!(config.suppression.max_output_size, 500);
    assert_eq!(config.suppression.iou_threshold, 0.45);
    assert_eq!(config.suppression.score_threshold, 0.2);
    assert_eq!(config.tracker.identity, IdentityStrategy::Index);
    assert_eq!(config.tracker.max_absence_ms, None);
  }

  #[test]
  fn partial_json_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file
      .write_all(br#"{ "suppression": { "iou_threshold": 0.5 }, "tracker": { "identity": "iou", "max_absence_ms": 5000 } }"#)
      .unwrap();

    let config = PipelineConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.suppression.iou_threshold, 0.5);
    assert_eq!(config.suppression.max_output_size, 500);
    assert_eq!(config.tracker.identity, IdentityStrategy::Iou);
    assert_eq!(config.tracker.max_absence_ms, Some(5000));
    assert_eq!(config.driver.fps, None);
  }

  #[test]
  fn identity_strategy_parses_case_insensitively() {
    assert_eq!("IoU".parse::<IdentityStrategy>().unwrap(), IdentityStrategy::Iou);
    assert_eq!("index".parse::<IdentityStrategy>().unwrap(), IdentityStrategy::Index);
    assert!("hungarian".parse::<IdentityStrategy>().is_err());
  }

  #[test]
  fn rejects_out_of_range_threshold() {
    let mut config = PipelineConfig::default();
    config.suppression.iou_threshold = 1.5;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = PipelineConfig::default();
    config.driver.fps = Some(0.0);
    assert!(config.validate().is_err());
  }
}
