// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口显示
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

//! # GStreamer 窗口显示模块
//!
//! 管道：`appsrc ! videoconvert ! autovideosink`
//!
//! 每路输入流一个窗口，第一个窗口在启动时打开，其余在该路第一帧到来时打开。
//! 帧尺寸变化时重新设置 caps。任一窗口中按 `q`、`Q` 或 `Escape`，
//! 关闭窗口（视频接收端报错）或管道结束时，`poll_quit` 返回 true。

use std::time::Duration;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

const PIPELINE_DESCRIPTION: &str = "appsrc name=src is-live=true do-timestamp=true format=time \
   ! videoconvert ! autovideosink name=sink sync=false";

const NAVIGATION_MESSAGE: &str = "GstNavigationMessage";
const QUIT_KEYS: [&str; 3] = ["q", "Q", "Escape"];

/// GStreamer 显示错误类型
#[derive(Error, Debug)]
pub enum GStreamerDisplayError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 按流编号分窗口显示
pub struct GStreamerDisplay {
  windows: Vec<DisplayWindow>,
}

impl GStreamerDisplay {
  pub fn new() -> Result<Self, GStreamerDisplayError> {
    gst::init()?;
    Ok(Self {
      windows: vec![DisplayWindow::new(0)?],
    })
  }

  pub fn show(&mut self, stream: usize, image: &RgbImage) -> Result<(), GStreamerDisplayError> {
    while self.windows.len() <= stream {
      let window = DisplayWindow::new(self.windows.len())?;
      self.windows.push(window);
    }
    self.windows[stream].show(image)
  }

  /// 第一个窗口最多等待 `wait`，其余窗口只处理已到达的消息
  pub fn poll_quit(&mut self, wait: Duration) -> Result<bool, GStreamerDisplayError> {
    let mut wait = wait;
    for window in &mut self.windows {
      if window.poll_quit(wait)? {
        return Ok(true);
      }
      wait = Duration::ZERO;
    }
    Ok(false)
  }
}

struct DisplayWindow {
  stream: usize,
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  size: Option<(u32, u32)>,
  frame_count: u64,
}

impl DisplayWindow {
  fn new(stream: usize) -> Result<Self, GStreamerDisplayError> {
    info!("Creating display pipeline #{}: {}", stream, PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      stream,
      pipeline,
      appsrc,
      size: None,
      frame_count: 0,
    })
  }

  fn update_caps(&mut self, width: u32, height: u32) {
    if self.size == Some((width, height)) {
      return;
    }
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(0, 1))
      .build();
    self.appsrc.set_caps(Some(&caps));
    self.size = Some((width, height));
    info!("窗口 #{} 显示尺寸: {}x{}", self.stream, width, height);
  }

  fn show(&mut self, image: &RgbImage) -> Result<(), GStreamerDisplayError> {
    self.update_caps(image.width(), image.height());

    // RGB 每行 3 字节一像素，videoconvert 需要 4 字节对齐的行
    let data = padded_rows(image);
    let buffer = gst::Buffer::from_mut_slice(data);
    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    self.frame_count += 1;
    debug!("窗口 #{} 显示第 {} 帧", self.stream, self.frame_count);
    Ok(())
  }

  /// 处理总线上积压的消息，第一条最多等待 `wait`
  fn poll_quit(&mut self, wait: Duration) -> Result<bool, GStreamerDisplayError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(false);
    };

    let mut timeout = gst::ClockTime::from_nseconds(wait.as_nanos() as u64);
    while let Some(message) = bus.timed_pop(timeout) {
      timeout = gst::ClockTime::ZERO;
      match message.view() {
        gst::MessageView::Eos(..) => {
          info!("窗口 #{} 显示管道结束", self.stream);
          return Ok(true);
        }
        gst::MessageView::Error(err) => {
          warn!("窗口 #{} 已关闭: {}", self.stream, err.error());
          return Ok(true);
        }
        gst::MessageView::Element(element) => {
          if let Some(structure) = element.structure()
            && is_quit_key(structure)
          {
            info!("收到退出按键");
            return Ok(true);
          }
        }
        _ => {}
      }
    }
    Ok(false)
  }
}

impl Drop for DisplayWindow {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }
    info!("窗口 #{} 关闭，共显示 {} 帧", self.stream, self.frame_count);
  }
}

/// GStreamer 的 RGB 行按 4 字节对齐
fn padded_rows(image: &RgbImage) -> Vec<u8> {
  let row_bytes = image.width() as usize * 3;
  let stride = row_bytes.next_multiple_of(4);
  if stride == row_bytes {
    return image.as_raw().clone();
  }

  let mut data = vec![0u8; stride * image.height() as usize];
  for (row, chunk) in image.as_raw().chunks_exact(row_bytes).enumerate() {
    data[row * stride..row * stride + row_bytes].copy_from_slice(chunk);
  }
  data
}

/// 导航消息中的按键是否为退出键
fn is_quit_key(message: &gst::StructureRef) -> bool {
  if !message.has_name(NAVIGATION_MESSAGE) {
    return false;
  }
  let Ok(event) = message.get::<gst::Event>("event") else {
    return false;
  };
  let Some(structure) = event.structure() else {
    return false;
  };
  is_quit_key_event(structure)
}

fn is_quit_key_event(event: &gst::StructureRef) -> bool {
  matches!(event.get::<&str>("event"), Ok("key-press"))
    && event
      .get::<&str>("key")
      .map(|key| QUIT_KEYS.contains(&key))
      .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  fn key_event(event: &str, key: &str) -> gst::Structure {
    gst::Structure::builder("application/x-gst-navigation")
      .field("event", event)
      .field("key", key)
      .build()
  }

  #[test]
  fn quit_keys_are_recognized() {
    gst::init().unwrap();
    assert!(is_quit_key_event(&key_event("key-press", "q")));
    assert!(is_quit_key_event(&key_event("key-press", "Q")));
    assert!(is_quit_key_event(&key_event("key-press", "Escape")));
  }

  #[test]
  fn other_keys_and_releases_are_ignored() {
    gst::init().unwrap();
    assert!(!is_quit_key_event(&key_event("key-press", "space")));
    assert!(!is_quit_key_event(&key_event("key-release", "q")));

    let mouse = gst::Structure::builder("application/x-gst-navigation")
      .field("event", "mouse-move")
      .build();
    assert!(!is_quit_key_event(&mouse));
  }

  #[test]
  fn rows_are_padded_to_four_bytes() {
    let image = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
    let data = padded_rows(&image);
    assert_eq!(data.len(), 12 * 2);
    assert_eq!(&data[0..9], &[1, 2, 3, 1, 2, 3, 1, 2, 3]);
    assert_eq!(&data[9..12], &[0, 0, 0]);

    let aligned = RgbImage::new(4, 2);
    assert_eq!(padded_rows(&aligned).len(), 4 * 3 * 2);
  }
}
