// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/tract_yolo.rs - 基于 tract 的 CPU 推理
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

use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use super::{Model, ModelError, Predictions, YOLO_STRIDE};
use crate::frame::{AsNchwFrame, LetterboxFrame};

type TractPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// YOLOv5 ONNX 导出模型，输出 `[1, N, 5 + C]`
pub struct TractYolo {
  plan: TractPlan,
  size: usize,
  names: Vec<String>,
}

impl TractYolo {
  pub fn load(path: &Path, imgsz: u32, names: Vec<String>) -> Result<Self, ModelError> {
    let size = imgsz as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(path)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )?
      .into_optimized()?
      .into_runnable()?;
    info!("ONNX 模型加载完成，输入尺寸 {}x{}", size, size);

    Ok(Self { plan, size, names })
  }

  fn to_predictions(&self, outputs: TVec<TValue>) -> Result<Predictions, ModelError> {
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::OutputShape("模型没有输出".to_string()))?;
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[2] < 6 {
      return Err(ModelError::OutputShape(format!(
        "期望 [1, N, 5 + C]，实际为 {:?}",
        shape
      )));
    }

    let num_classes = shape[2] - 5;
    if num_classes != self.names.len() {
      warn!(
        "模型类别数 {} 与类别表长度 {} 不一致",
        num_classes,
        self.names.len()
      );
    }
    let data = output.as_slice::<f32>()?.to_vec();
    debug!("模型输出 {} 个候选框", shape[1]);

    Ok(Predictions::new(num_classes, data))
  }
}

impl Model for TractYolo {
  type Input = LetterboxFrame;
  type Output = Predictions;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if input.size() as usize != self.size {
      return Err(ModelError::OutputShape(format!(
        "输入尺寸 {} 与模型尺寸 {} 不一致",
        input.size(),
        self.size
      )));
    }

    let data = input.to_nchw_normalized();
    let tensor = Tensor::from_shape::<f32>(&[1, input.channels(), self.size, self.size], &data)?;

    debug!("执行模型推理");
    let outputs = self.plan.run(tvec!(tensor.into_tvalue()))?;
    self.to_predictions(outputs)
  }

  fn stride(&self) -> u32 {
    YOLO_STRIDE
  }

  fn names(&self) -> &[String] {
    &self.names
  }
}
