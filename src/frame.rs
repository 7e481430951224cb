// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 帧与 letterbox 预处理
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

use image::{Rgb, RgbImage, imageops};

const RGB_CHANNELS: usize = 3;
const LETTERBOX_FILL: u8 = 114;

/// 输入源产生的一帧
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 帧来源（文件路径、设备或地址）
  pub origin: String,
  /// 多路输入中的流编号，单路输入为 0
  pub stream: usize,
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

pub trait AsNchwFrame {
  /// 归一化到 [0, 1] 的 NCHW 浮点数据，批大小为 1
  fn to_nchw_normalized(&self) -> Vec<f32>;
}

/// 等比缩放并填充到 `size × size` 的模型输入
#[derive(Debug, Clone)]
pub struct LetterboxFrame {
  image: RgbImage,
  gain: f32,
  pad: (f32, f32),
  source_size: (u32, u32),
}

impl LetterboxFrame {
  pub fn new(source: &RgbImage, size: u32) -> Self {
    let (src_w, src_h) = source.dimensions();
    let gain = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
    let new_w = ((src_w as f32 * gain).round() as u32).clamp(1, size);
    let new_h = ((src_h as f32 * gain).round() as u32).clamp(1, size);

    let dw = (size - new_w) as f32 / 2.0;
    let dh = (size - new_h) as f32 / 2.0;
    let left = (dw - 0.1).round().max(0.0) as i64;
    let top = (dh - 0.1).round().max(0.0) as i64;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    if (new_w, new_h) == (src_w, src_h) {
      imageops::replace(&mut canvas, source, left, top);
    } else {
      let resized = imageops::resize(source, new_w, new_h, imageops::FilterType::Triangle);
      imageops::replace(&mut canvas, &resized, left, top);
    }

    Self {
      image: canvas,
      gain,
      pad: (left as f32, top as f32),
      source_size: (src_w, src_h),
    }
  }

  /// 用于预热的灰色空帧
  pub fn blank(size: u32) -> Self {
    Self {
      image: RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3])),
      gain: 1.0,
      pad: (0.0, 0.0),
      source_size: (size, size),
    }
  }

  pub fn size(&self) -> u32 {
    self.image.width()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 将模型输入坐标系中的 xyxy 框映射回原图并裁剪到图像范围
  pub fn scale_box(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (w, h) = (self.source_size.0 as f32, self.source_size.1 as f32);
    let (pad_x, pad_y) = self.pad;
    [
      ((bbox[0] - pad_x) / self.gain).clamp(0.0, w),
      ((bbox[1] - pad_y) / self.gain).clamp(0.0, h),
      ((bbox[2] - pad_x) / self.gain).clamp(0.0, w),
      ((bbox[3] - pad_y) / self.gain).clamp(0.0, h),
    ]
  }
}

impl AsNhwcFrame for LetterboxFrame {
  fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }
}

impl AsNchwFrame for LetterboxFrame {
  fn to_nchw_normalized(&self) -> Vec<f32> {
    let size = self.size() as usize;
    let plane = size * size;
    let data = self.image.as_raw();
    let mut out = vec![0f32; plane * RGB_CHANNELS];
    for (idx, pixel) in data.chunks_exact(RGB_CHANNELS).enumerate() {
      for c in 0..RGB_CHANNELS {
        out[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    out
  }
}
