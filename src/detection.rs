// 该文件是 Kanjian （看见） 项目的一部分。
// src/detection.rs - 按置信度分级的检测结果
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

use crate::model::{DetectItem, labels::class_name};

/// 不低于该值为确定目标
pub const CONFIDENT_THRESHOLD: f32 = 0.7;
/// 高于该值为可能目标
pub const POSSIBLE_THRESHOLD: f32 = 0.5;
/// 可能目标统一使用的标签
pub const POSSIBLE_LABEL: &str = "Object";

pub const GREEN: [u8; 3] = [0, 255, 0];
pub const YELLOW: [u8; 3] = [255, 255, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionTier {
  Confident,
  Possible,
  Ignored,
}

impl DetectionTier {
  pub fn of(confidence: f32) -> Self {
    if confidence >= CONFIDENT_THRESHOLD {
      DetectionTier::Confident
    } else if confidence > POSSIBLE_THRESHOLD {
      DetectionTier::Possible
    } else {
      DetectionTier::Ignored
    }
  }

  /// RGB 显示颜色，忽略的目标没有颜色
  pub fn color(&self) -> Option<[u8; 3]> {
    match self {
      DetectionTier::Confident => Some(GREEN),
      DetectionTier::Possible => Some(YELLOW),
      DetectionTier::Ignored => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 显示用名称，可能目标为 "Object"
  pub class_name: String,
  pub confidence: f32,
  /// 原图坐标 [x_min, y_min, x_max, y_max]
  pub bbox: [f32; 4],
  pub tier: DetectionTier,
  pub color: [u8; 3],
}

impl Detection {
  pub fn label(&self) -> String {
    format!("{} {:.2}", self.class_name, self.confidence)
  }
}

/// 分级并丢弃置信度不超过 0.5 的结果，每个结果带各自的颜色
pub fn classify(items: &[DetectItem], names: &[String]) -> Vec<Detection> {
  items
    .iter()
    .filter_map(|item| {
      let tier = DetectionTier::of(item.score);
      let color = tier.color()?;
      let class_name = match tier {
        DetectionTier::Confident => class_name(names, item.class_id),
        _ => POSSIBLE_LABEL.to_string(),
      };
      Some(Detection {
        class_name,
        confidence: item.score,
        bbox: item.bbox,
        tier,
        color,
      })
    })
    .collect()
}
