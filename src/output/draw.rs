// 该文件是 Kanjian （看见） 项目的一部分。
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{info, warn};

use crate::{detection::Detection, output::OutputError};

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONTS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

const MIN_FONT_SIZE: f32 = 12.0;
const TEXT_COLOR: [u8; 3] = [0, 0, 0]; // 绿/黄底上用黑字
const LABEL_PADDING: u32 = 2;

fn read_font(path: &Path) -> Result<FontVec, OutputError> {
  let name = path.display().to_string();
  let data = std::fs::read(path).map_err(|e| OutputError::FontIoError(name.clone(), e))?;
  FontVec::try_from_vec(data).map_err(|_| OutputError::InvalidFont(name))
}

/// 加载标签字体；指定的字体读不出来是错误，系统字体都找不到时只画框
pub fn load_font(path: Option<&Path>) -> Result<Option<FontVec>, OutputError> {
  if let Some(path) = path {
    info!("加载字体: {}", path.display());
    return read_font(path).map(Some);
  }

  for candidate in SYSTEM_FONTS.iter().map(Path::new) {
    if candidate.is_file()
      && let Ok(font) = read_font(candidate)
    {
      info!("使用系统字体: {}", candidate.display());
      return Ok(Some(font));
    }
  }

  warn!("未找到可用字体，只绘制检测框不绘制标签");
  Ok(None)
}

/// 在帧上绘制检测框和标签，颜色取自每个检测结果
pub struct Annotator {
  font: Option<FontVec>,
  line_thickness: u32,
  font_scale: PxScale,
}

impl Annotator {
  pub fn new(font: Option<FontVec>, line_thickness: u32) -> Self {
    let line_thickness = line_thickness.max(1);
    let font_size = (line_thickness as f32 * 6.0).max(MIN_FONT_SIZE);
    Self {
      font,
      line_thickness,
      font_scale: PxScale::from(font_size),
    }
  }

  pub fn annotate(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_detection(image, detection);
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (detection.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (detection.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (detection.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (detection.bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(detection.color);

    // 向内逐像素加粗
    for t in 0..self.line_thickness as i32 {
      let width = x_max - x_min + 1 - 2 * t;
      let height = y_max - y_min + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = detection.label();
    let (text_width, text_height) = text_size(self.font_scale, font, &label);
    let label_width = text_width + 2 * LABEL_PADDING;
    let label_height = text_height + 2 * LABEL_PADDING;

    // 框上方放不下时放到框内
    let label_x = x_min;
    let label_y = if y_min >= label_height as i32 {
      y_min - label_height as i32
    } else {
      y_min
    };

    let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x + LABEL_PADDING as i32,
      label_y + LABEL_PADDING as i32,
      self.font_scale,
      font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::{DetectionTier, GREEN, YELLOW};

  fn detection(bbox: [f32; 4], color: [u8; 3]) -> Detection {
    Detection {
      class_name: "person".to_string(),
      confidence: 0.9,
      bbox,
      tier: DetectionTier::Confident,
      color,
    }
  }

  #[test]
  fn boxes_use_each_detection_color() {
    let mut image = RgbImage::new(100, 100);
    let annotator = Annotator::new(None, 2);
    annotator.annotate(
      &mut image,
      &[
        detection([10.0, 10.0, 40.0, 40.0], GREEN),
        detection([50.0, 50.0, 90.0, 90.0], YELLOW),
      ],
    );

    assert_eq!(image.get_pixel(10, 20), &Rgb(GREEN));
    assert_eq!(image.get_pixel(11, 20), &Rgb(GREEN));
    assert_eq!(image.get_pixel(12, 20), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(70, 90), &Rgb(YELLOW));
    assert_eq!(image.get_pixel(25, 25), &Rgb([0, 0, 0]));
  }

  #[test]
  fn line_thickness_controls_border_width() {
    let mut image = RgbImage::new(64, 64);
    Annotator::new(None, 4).annotate(&mut image, &[detection([8.0, 8.0, 56.0, 56.0], GREEN)]);

    for x in 8..12 {
      assert_eq!(image.get_pixel(x, 30), &Rgb(GREEN));
    }
    assert_eq!(image.get_pixel(12, 30), &Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_frame_boxes_are_clipped_and_degenerate_ones_skipped() {
    let mut image = RgbImage::new(32, 32);
    let annotator = Annotator::new(None, 1);
    annotator.annotate(
      &mut image,
      &[
        detection([-20.0, -20.0, 100.0, 100.0], GREEN),
        detection([5.0, 5.0, 5.0, 20.0], YELLOW),
      ],
    );

    assert_eq!(image.get_pixel(0, 0), &Rgb(GREEN));
    assert_eq!(image.get_pixel(31, 31), &Rgb(GREEN));
    assert_eq!(image.get_pixel(5, 10), &Rgb([0, 0, 0]));
  }

  #[test]
  fn missing_explicit_font_is_an_error() {
    let result = load_font(Some(Path::new("/nonexistent/font.ttf")));
    assert!(matches!(result, Err(OutputError::FontIoError(..))));
  }

  #[test]
  fn garbage_font_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();

    assert!(matches!(
      load_font(Some(&path)),
      Err(OutputError::InvalidFont(_))
    ));
  }
}
