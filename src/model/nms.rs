// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/nms.rs - 置信度过滤与非极大值抑制
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

use std::cmp::Ordering;

use tracing::debug;

use super::{DetectItem, DetectResult, Predictions};

/// 进入 NMS 的最大候选框数量
const MAX_NMS_CANDIDATES: usize = 30000;

#[derive(Debug, Clone, PartialEq)]
pub struct NmsSettings {
  pub conf_thres: f32,
  pub iou_thres: f32,
  pub classes: Option<Vec<usize>>,
  pub agnostic: bool,
  pub max_det: usize,
}

impl Default for NmsSettings {
  fn default() -> Self {
    Self {
      conf_thres: 0.25,
      iou_thres: 0.45,
      classes: None,
      agnostic: false,
      max_det: 1000,
    }
  }
}

/// 过滤低置信度候选框并去除重叠框
pub fn non_max_suppression(preds: &Predictions, settings: &NmsSettings) -> DetectResult {
  let mut candidates = Vec::new();

  for row in preds.rows() {
    let objectness = row[4];
    if objectness <= settings.conf_thres {
      continue;
    }

    // 找到最高类别分数
    let Some((class_id, class_score)) = row[5..]
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
    else {
      continue;
    };

    let score = objectness * class_score;
    if score <= settings.conf_thres {
      continue;
    }
    if let Some(classes) = &settings.classes
      && !classes.contains(&class_id)
    {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    candidates.push(DetectItem {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  // 按置信度降序排序
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
  candidates.truncate(MAX_NMS_CANDIDATES);

  let mut suppressed = vec![false; candidates.len()];
  let mut kept = Vec::new();

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    if kept.len() >= settings.max_det {
      break;
    }
    let best = &candidates[i];
    for j in (i + 1)..candidates.len() {
      if suppressed[j] {
        continue;
      }
      let other = &candidates[j];
      if !settings.agnostic && other.class_id != best.class_id {
        continue;
      }
      if iou(&best.bbox, &other.bbox) > settings.iou_thres {
        suppressed[j] = true;
      }
    }
    kept.push(best.clone());
  }

  debug!("NMS: {} 个候选框保留 {} 个", candidates.len(), kept.len());

  DetectResult {
    items: kept.into_boxed_slice(),
  }
}

/// 计算两个 xyxy 边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // 两个类别: [cx, cy, w, h, obj, c0, c1]
  fn preds(rows: &[[f32; 7]]) -> Predictions {
    Predictions::new(2, rows.iter().flatten().copied().collect())
  }

  #[test]
  fn score_is_objectness_times_class_probability() {
    let result = non_max_suppression(
      &preds(&[[50.0, 50.0, 20.0, 10.0, 0.9, 0.1, 0.8]]),
      &NmsSettings::default(),
    );
    assert_eq!(result.items.len(), 1);
    let item = &result.items[0];
    assert_eq!(item.class_id, 1);
    assert!((item.score - 0.72).abs() < 1e-6);
    assert_eq!(item.bbox, [40.0, 45.0, 60.0, 55.0]);
  }

  #[test]
  fn low_confidence_candidates_are_dropped() {
    let result = non_max_suppression(
      &preds(&[
        [50.0, 50.0, 20.0, 20.0, 0.2, 0.9, 0.1],
        [50.0, 50.0, 20.0, 20.0, 0.9, 0.2, 0.1],
      ]),
      &NmsSettings::default(),
    );
    assert!(result.is_empty());
  }

  #[test]
  fn overlapping_boxes_of_same_class_are_suppressed() {
    let rows = [
      [50.0, 50.0, 20.0, 20.0, 0.9, 0.9, 0.0],
      [51.0, 51.0, 20.0, 20.0, 0.8, 0.9, 0.0],
      [51.0, 51.0, 20.0, 20.0, 0.8, 0.0, 0.9],
    ];
    let result = non_max_suppression(&preds(&rows), &NmsSettings::default());
    let classes: Vec<usize> = result.items.iter().map(|item| item.class_id).collect();
    assert_eq!(classes, vec![0, 1]);

    let agnostic = NmsSettings {
      agnostic: true,
      ..NmsSettings::default()
    };
    let result = non_max_suppression(&preds(&rows), &agnostic);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].class_id, 0);
  }

  #[test]
  fn class_filter_and_max_det_are_applied() {
    let rows = [
      [10.0, 10.0, 5.0, 5.0, 0.9, 0.9, 0.0],
      [100.0, 100.0, 5.0, 5.0, 0.9, 0.0, 0.8],
      [200.0, 200.0, 5.0, 5.0, 0.9, 0.0, 0.7],
    ];
    let only_second = NmsSettings {
      classes: Some(vec![1]),
      ..NmsSettings::default()
    };
    let result = non_max_suppression(&preds(&rows), &only_second);
    assert_eq!(result.items.len(), 2);
    assert!(result.items.iter().all(|item| item.class_id == 1));

    let one = NmsSettings {
      max_det: 1,
      ..NmsSettings::default()
    };
    let result = non_max_suppression(&preds(&rows), &one);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].class_id, 0);
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
  }
}
