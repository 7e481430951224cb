// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::args::DisplayMode;

pub mod draw;

#[cfg(feature = "gstreamer_display")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_display")]
pub use self::gstreamer_display::{GStreamerDisplay, GStreamerDisplayError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_display")]
  #[error("GStreamer 显示错误: {0}")]
  GStreamerDisplayError(#[from] GStreamerDisplayError),
  #[error("无法读取字体文件 {0}: {1}")]
  FontIoError(String, std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 显示标注后的帧，并报告用户是否要求退出
pub trait Display {
  /// `stream` 为帧所属的输入流编号，多路输入时各路分开显示
  fn show(&mut self, stream: usize, image: &RgbImage) -> Result<(), OutputError>;

  /// 最多等待 `wait`，返回 true 表示应当退出
  fn poll_quit(&mut self, wait: Duration) -> Result<bool, OutputError>;
}

/// 不打开窗口，只计数
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
  frames: u64,
}

impl HeadlessDisplay {
  pub fn frames(&self) -> u64 {
    self.frames
  }
}

impl Display for HeadlessDisplay {
  fn show(&mut self, stream: usize, image: &RgbImage) -> Result<(), OutputError> {
    self.frames += 1;
    debug!(
      "丢弃第 {} 帧 (流 #{}, {}x{})",
      self.frames,
      stream,
      image.width(),
      image.height()
    );
    Ok(())
  }

  fn poll_quit(&mut self, _wait: Duration) -> Result<bool, OutputError> {
    Ok(false)
  }
}

pub enum DisplayWrapper {
  Headless(HeadlessDisplay),
  #[cfg(feature = "gstreamer_display")]
  GStreamer(GStreamerDisplay),
}

impl DisplayWrapper {
  pub fn open(mode: DisplayMode) -> Result<Self, OutputError> {
    match mode {
      DisplayMode::None => {
        info!("不显示画面");
        Ok(DisplayWrapper::Headless(HeadlessDisplay::default()))
      }
      #[cfg(feature = "gstreamer_display")]
      DisplayMode::Auto => Ok(DisplayWrapper::GStreamer(GStreamerDisplay::new()?)),
      #[cfg(not(feature = "gstreamer_display"))]
      DisplayMode::Auto => {
        tracing::warn!("未启用 gstreamer_display 特性，不显示画面");
        Ok(DisplayWrapper::Headless(HeadlessDisplay::default()))
      }
    }
  }
}

impl Display for DisplayWrapper {
  fn show(&mut self, stream: usize, image: &RgbImage) -> Result<(), OutputError> {
    match self {
      DisplayWrapper::Headless(display) => display.show(stream, image),
      #[cfg(feature = "gstreamer_display")]
      DisplayWrapper::GStreamer(display) => display
        .show(stream, image)
        .map_err(OutputError::from),
    }
  }

  fn poll_quit(&mut self, wait: Duration) -> Result<bool, OutputError> {
    match self {
      DisplayWrapper::Headless(display) => display.poll_quit(wait),
      #[cfg(feature = "gstreamer_display")]
      DisplayWrapper::GStreamer(display) => display.poll_quit(wait).map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn headless_counts_frames_and_never_quits() {
    let mut display = DisplayWrapper::open(DisplayMode::None).unwrap();
    let image = RgbImage::new(8, 8);
    display.show(0, &image).unwrap();
    display.show(1, &image).unwrap();
    assert!(!display.poll_quit(Duration::from_millis(1)).unwrap());

    match display {
      DisplayWrapper::Headless(headless) => assert_eq!(headless.frames(), 2),
      #[cfg(feature = "gstreamer_display")]
      DisplayWrapper::GStreamer(_) => panic!("expected headless display"),
    }
  }
}
