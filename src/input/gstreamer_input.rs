// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持三种视频源，统一转换为 RGB 后从 appsink 取帧：
//! - 视频文件：`filesrc ! decodebin`
//! - 摄像头（V4L2）：`v4l2src device=/dev/videoN`
//! - 网络流（RTSP/RTMP/HTTP）：`uridecodebin uri=...`
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 文件会逐帧读取，不丢帧；实时源只保留最新的一帧。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::frame::Frame;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GStreamerInputItem {
  FileSource(String),
  CameraSource { device: String },
  UriSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputItem::CameraSource { device } => format!("v4l2src device={}", device),
      GStreamerInputItem::UriSource(uri) => format!("uridecodebin uri=\"{}\"", uri),
      GStreamerInputItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }

  pub fn file(path: &Path) -> GStreamerInputPipelineBuilder {
    GStreamerInputPipelineBuilder::new(
      GStreamerInputItem::FileSource(path.display().to_string()),
      false,
    )
  }

  pub fn camera(device: &str) -> GStreamerInputPipelineBuilder {
    GStreamerInputPipelineBuilder::new(
      GStreamerInputItem::CameraSource {
        device: device.to_string(),
      },
      true,
    )
  }

  pub fn uri(url: &Url) -> GStreamerInputPipelineBuilder {
    GStreamerInputPipelineBuilder::new(GStreamerInputItem::UriSource(url.to_string()), true)
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  origin: String,
  items: Vec<GStreamerInputItem>,
  live: bool,
}

impl GStreamerInputPipelineBuilder {
  fn new(source: GStreamerInputItem, live: bool) -> Self {
    let origin = match &source {
      GStreamerInputItem::FileSource(path) => path.clone(),
      GStreamerInputItem::CameraSource { device } => device.clone(),
      GStreamerInputItem::UriSource(uri) => uri.clone(),
      GStreamerInputItem::TargetFormat { .. } => String::new(),
    };
    Self {
      origin,
      items: vec![
        source,
        GStreamerInputItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
      live,
    }
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    // 实时源丢弃旧帧，文件逐帧读取
    let sink = if self.live {
      "appsink name=sink max-buffers=1 drop=true sync=false"
    } else {
      "appsink name=sink max-buffers=4 drop=false sync=false"
    };
    format!("{} ! {}", basic_pipeline, sink)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      origin: self.origin,
      index: 0,
    })
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  origin: String,
  index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  /// 取样失败时从总线上找出原因
  fn pipeline_error(&self) -> GStreamerInputError {
    let message = self
      .pipeline
      .bus()
      .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]));

    match message.as_ref().map(|msg| msg.view()) {
      Some(gst::MessageView::Error(err)) => GStreamerInputError::PipelineError(format!(
        "{} ({})",
        err.error(),
        err
          .debug()
          .map(|d| d.to_string())
          .unwrap_or_else(|| "no debug info".to_string())
      )),
      _ => GStreamerInputError::PipelineError(format!("Failed to pull sample from {}", self.origin)),
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self.appsink.pull_sample() {
      Ok(sample) => {
        let index = self.index;
        self.index += 1;
        Some(convert_sample_to_rgb(&sample).map(|image| Frame {
          image,
          index,
          origin: self.origin.clone(),
          stream: 0,
        }))
      }
      Err(_) if self.appsink.is_eos() => {
        info!("输入结束: {}", self.origin);
        None
      }
      Err(_) => Some(Err(self.pipeline_error())),
    }
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in 0..height {
        let start = row * stride;
        for bgr in data[start..start + row_bytes].chunks_exact(3) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  }

  debug!("取得一帧: {}x{}", width, height);
  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_pipeline_reads_every_frame() {
    let desc = GStreamerInputItem::file(Path::new("/tmp/clip one.mp4")).description();
    assert_eq!(
      desc,
      "filesrc location=\"/tmp/clip one.mp4\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=4 drop=false sync=false"
    );
  }

  #[test]
  fn live_pipelines_drop_stale_frames() {
    let camera = GStreamerInputItem::camera("/dev/video0").description();
    assert!(camera.starts_with("v4l2src device=/dev/video0 ! videoconvert"));
    assert!(camera.ends_with("max-buffers=1 drop=true sync=false"));

    let url = Url::parse("rtsp://192.168.1.10:554/live").unwrap();
    let stream = GStreamerInputItem::uri(&url).description();
    assert!(stream.starts_with("uridecodebin uri=\"rtsp://192.168.1.10:554/live\""));
    assert!(stream.contains("drop=true"));
  }
}
