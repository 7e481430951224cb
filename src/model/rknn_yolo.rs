// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/rknn_yolo.rs - 基于 RKNPU 的 YOLOv5 推理
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use super::{Model, ModelError, Predictions, YOLO_STRIDE};
use crate::frame::{AsNhwcFrame, LetterboxFrame};

const YOLOV5_NUM_INPUTS: u32 = 1;
const YOLOV5_NUM_OUTPUTS: u32 = 3;
const YOLOV5_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
const YOLOV5_ANCHORS: [[(f32, f32); 3]; 3] = [
  [(10.0, 13.0), (16.0, 30.0), (33.0, 23.0)],
  [(30.0, 61.0), (62.0, 45.0), (59.0, 119.0)],
  [(116.0, 90.0), (156.0, 198.0), (373.0, 326.0)],
];

/// RKNN 导出的 YOLOv5 模型，三个检测头 `[1, 3 * (5 + C), H, W]`，sigmoid 已在模型内完成
pub struct RknnYolo {
  context: Context,
  size: u32,
  names: Vec<String>,
}

impl RknnYolo {
  pub fn load(path: &Path, imgsz: u32, names: Vec<String>) -> Result<Self, ModelError> {
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != YOLOV5_NUM_INPUTS || num_outputs != YOLOV5_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLOV5_NUM_INPUTS, YOLOV5_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(ModelError::OutputShape(format!(
        "预期 {} 个输入和 {} 个输出，实际为 {} 和 {}",
        YOLOV5_NUM_INPUTS, YOLOV5_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }
    info!("RKNN 模型加载完成");

    Ok(Self {
      context,
      size: imgsz,
      names,
    })
  }
}

/// 将三个检测头解码为 `[cx, cy, w, h, obj, cls..]` 行
fn decode_heads(heads: &[&[f32]], size: u32, num_classes: usize) -> Result<Vec<f32>, ModelError> {
  let row_len = 5 + num_classes;
  let mut rows = Vec::new();

  for (head_idx, (data, stride)) in heads.iter().zip(YOLOV5_STRIDES).enumerate() {
    let grid = (size as f32 / stride) as usize;
    let spatial = grid * grid;
    let expected = YOLOV5_ANCHORS[head_idx].len() * row_len * spatial;
    if data.len() != expected {
      return Err(ModelError::OutputShape(format!(
        "检测头 {} 期望 {} 个元素，实际为 {}",
        head_idx,
        expected,
        data.len()
      )));
    }

    for (anchor_idx, &(anchor_w, anchor_h)) in YOLOV5_ANCHORS[head_idx].iter().enumerate() {
      let base = anchor_idx * row_len;
      for h in 0..grid {
        for w in 0..grid {
          let idx = h * grid + w;
          let at = |channel: usize| data[(base + channel) * spatial + idx];

          let cx = (at(0) * 2.0 - 0.5 + w as f32) * stride;
          let cy = (at(1) * 2.0 - 0.5 + h as f32) * stride;
          let bw = (at(2) * 2.0).powi(2) * anchor_w;
          let bh = (at(3) * 2.0).powi(2) * anchor_h;

          rows.extend_from_slice(&[cx, cy, bw, bh]);
          rows.extend((4..row_len).map(at));
        }
      }
    }
  }

  Ok(rows)
}

impl Model for RknnYolo {
  type Input = LetterboxFrame;
  type Output = Predictions;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let heads = (0..YOLOV5_NUM_OUTPUTS as usize)
      .map(|idx| output.get_f32(idx))
      .collect::<Result<Vec<_>, _>>()?;

    let num_classes = self.names.len();
    let rows = decode_heads(&heads, self.size, num_classes)?;
    Ok(Predictions::new(num_classes, rows))
  }

  fn stride(&self) -> u32 {
    YOLO_STRIDE
  }

  fn names(&self) -> &[String] {
    &self.names
  }

  fn fp16(&self) -> bool {
    true
  }
}
