// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::{info, warn};

use crate::{device::Device, frame::LetterboxFrame};

pub mod labels;
pub mod nms;

#[cfg(feature = "backend_tract")]
mod tract_yolo;
#[cfg(feature = "backend_tract")]
pub use self::tract_yolo::TractYolo;

#[cfg(feature = "backend_rknpu")]
mod rknn_yolo;
#[cfg(feature = "backend_rknpu")]
pub use self::rknn_yolo::RknnYolo;

/// YOLOv5 系列模型的最大下采样步长
pub const YOLO_STRIDE: u32 = 32;
/// 推理尺寸上限
pub const MAX_IMG_SIZE: u32 = 8192;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  fn stride(&self) -> u32;
  fn names(&self) -> &[String];
  fn fp16(&self) -> bool {
    false
  }
}

/// 模型原始输出，每行 `[cx, cy, w, h, obj, cls_0 .. cls_n]`，坐标位于模型输入空间
#[derive(Debug, Clone, Default)]
pub struct Predictions {
  num_classes: usize,
  data: Vec<f32>,
}

impl Predictions {
  pub fn new(num_classes: usize, data: Vec<f32>) -> Self {
    debug_assert_eq!(data.len() % (5 + num_classes), 0);
    Self { num_classes, data }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn row_len(&self) -> usize {
    5 + self.num_classes
  }

  pub fn len(&self) -> usize {
    self.data.len() / self.row_len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
    self.data.chunks_exact(self.row_len())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 将框从 letterbox 坐标映射回原图
  pub fn scaled_to_source(mut self, frame: &LetterboxFrame) -> Self {
    for item in self.items.iter_mut() {
      item.bbox = frame.scale_box(item.bbox);
    }
    self
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("权重文件 {path} 不适用于设备 {device}，需要 .{expected} 文件")]
  WeightsMismatch {
    path: String,
    device: Device,
    expected: &'static str,
  },
  #[error("权重文件不存在: {0}")]
  WeightsNotFound(String),
  #[error("设备 {0} 没有可用的推理后端")]
  NoBackend(Device),
  #[error("类别文件错误: {0}")]
  NamesError(#[from] std::io::Error),
  #[error("类别文件为空: {0}")]
  EmptyNames(String),
  #[error("模型输出形状不符: {0}")]
  OutputShape(String),
  #[cfg(feature = "backend_tract")]
  #[error("tract 错误: {0}")]
  TractError(#[from] tract_onnx::prelude::TractError),
  #[cfg(feature = "backend_rknpu")]
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
}

/// 将推理尺寸向上对齐到步长的整数倍
pub fn check_img_size(imgsz: u32, stride: u32) -> u32 {
  let stride = stride.clamp(1, MAX_IMG_SIZE);
  let snapped = imgsz.min(MAX_IMG_SIZE).div_ceil(stride).max(1) * stride;
  if snapped != imgsz {
    warn!(
      "推理尺寸 {} 不是最大步长 {} 的倍数，已调整为 {}",
      imgsz, stride, snapped
    );
  }
  snapped
}

pub enum ModelWrapper {
  #[cfg(feature = "backend_tract")]
  Tract(TractYolo),
  #[cfg(feature = "backend_rknpu")]
  Rknn(RknnYolo),
}

/// 按设备和权重类型加载模型
pub fn load_model(
  weights: &Path,
  device: Device,
  imgsz: u32,
  names: Vec<String>,
) -> Result<ModelWrapper, ModelError> {
  if !weights.exists() {
    return Err(ModelError::WeightsNotFound(weights.display().to_string()));
  }
  if !device.accepts(weights) {
    return Err(ModelError::WeightsMismatch {
      path: weights.display().to_string(),
      device,
      expected: device.weights_extension(),
    });
  }

  info!("加载模型文件: {}", weights.display());
  match device {
    #[cfg(feature = "backend_tract")]
    Device::Cpu => Ok(ModelWrapper::Tract(TractYolo::load(weights, imgsz, names)?)),
    #[cfg(feature = "backend_rknpu")]
    Device::Npu => Ok(ModelWrapper::Rknn(RknnYolo::load(weights, imgsz, names)?)),
    #[allow(unreachable_patterns)]
    other => {
      let _ = (imgsz, names);
      Err(ModelError::NoBackend(other))
    }
  }
}

impl Model for ModelWrapper {
  type Input = LetterboxFrame;
  type Output = Predictions;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.infer(input),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.infer(input),
    }
  }

  fn stride(&self) -> u32 {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.stride(),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.stride(),
    }
  }

  fn names(&self) -> &[String] {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.names(),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.names(),
    }
  }

  fn fp16(&self) -> bool {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.fp16(),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Rknn(model) => model.fp16(),
    }
  }
}
