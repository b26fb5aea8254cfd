// 该文件是 Dwell （驻留检测） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::output::{FrameDetections, RenderItem};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 22;
const LABEL_CHAR_WIDTH: f32 = 10.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const PALETTE_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在原始帧上画框，设置字体后同时绘制类别和分数
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个类别一种颜色，色相均匀分布
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb(i as f32 / PALETTE_SIZE as f32 * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
    }
  }
}

impl Draw {
  /// 从 TTF/OTF 文件加载标签字体
  pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, FontError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    self.font = Some(FontArc::try_from_vec(data)?);
    info!("加载标签字体: {}", path.display());
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &FrameDetections<'_>) {
    for item in result.items() {
      self.draw_bbox_with_label(image, &item);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &RenderItem<'_>) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let color = self.colors[item.class_index % self.colors.len()];

    // 归一化坐标换算到像素并裁剪到画面内
    let x_min = (item.bbox[0] * w).floor().clamp(0.0, w - 1.0) as i32;
    let y_min = (item.bbox[1] * h).floor().clamp(0.0, h - 1.0) as i32;
    let x_max = (item.bbox[2] * w).ceil().clamp(0.0, w - 1.0) as i32;
    let y_max = (item.bbox[3] * h).ceil().clamp(0.0, h - 1.0) as i32;
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let width = (x_max - x_min) as u32;
    let height = (y_max - y_min) as u32;
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(width, height), color);
    // 第二道边框加粗
    if width > 2 && height > 2 {
      let inner = Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.1}%", item.label, item.score * 100.0);
    let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_x = x_min;
    let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
    let label_width = text_width.min(w as i32 - label_x).max(0) as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, LABEL_TEXT_HEIGHT as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        self.font_scale,
        font,
        &label,
      );
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 以文本形式记录检测结果，每行 `类别, 分数, x1, y1, x2, y2`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, result: &FrameDetections<'_>) -> Vec<String> {
    result
      .items()
      .map(|item| {
        let name = if self.label_with_name {
          item.label.to_string()
        } else {
          item.class_index.to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect()
  }

  pub fn record(&self, result: &FrameDetections<'_>, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(result).join("\n"))
  }
}
