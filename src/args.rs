// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::{
  model::{MAX_IMG_SIZE, nms::NmsSettings},
  speech::SpeechSettings,
  task::DetectSettings,
};

/// 实时检测并语音播报
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型权重文件（.onnx 使用 CPU，.rknn 使用 NPU）
  #[arg(long, default_value = "yolov5s.onnx", value_name = "FILE")]
  pub weights: PathBuf,

  /// 输入来源
  /// 支持格式:
  /// - 摄像头编号: 0, 1, ...
  /// - 网络流: rtsp://, rtmp://, http://, https:// 或 *.streams
  /// - 图片/视频文件或目录
  #[arg(long, default_value = "0", value_name = "SOURCE")]
  pub source: String,

  /// 推理尺寸（会对齐到模型步长）
  #[arg(
    long,
    default_value = "640",
    value_name = "PIXELS",
    value_parser = clap::value_parser!(u32).range(1..=MAX_IMG_SIZE as i64)
  )]
  pub imgsz: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub conf_thres: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou_thres: f32,

  /// 每帧最多保留的检测数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub max_det: usize,

  /// 推理设备：cpu、npu，留空自动选择
  #[arg(long, default_value = "", value_name = "DEVICE")]
  pub device: String,

  /// 边框线宽
  #[arg(long, default_value = "2", value_name = "PIXELS")]
  pub line_thickness: u32,

  /// 类别无关的 NMS
  #[arg(long)]
  pub agnostic_nms: bool,

  /// 只检测指定类别
  #[arg(long, num_args = 1.., value_name = "CLASS_ID")]
  pub classes: Option<Vec<usize>>,

  /// 类别名称文件（每行一个），默认使用 COCO 类别
  #[arg(long, value_name = "FILE")]
  pub names: Option<PathBuf>,

  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 显示方式
  #[arg(long, value_enum, default_value_t = DisplayMode::Auto)]
  pub display: DisplayMode,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 语音合成程序（路径或 PATH 中的程序名）
  #[arg(long, env = "KANJIAN_TTS_EXE", default_value = "espeak-ng", value_name = "PROGRAM")]
  pub tts_exe: PathBuf,

  /// 语音
  #[arg(long, default_value = "en", value_name = "VOICE")]
  pub tts_voice: String,

  /// 语速（每分钟词数）
  #[arg(long, default_value = "130", value_name = "WPM")]
  pub tts_speed: u32,

  /// 播报间隔（秒）
  #[arg(long, default_value = "8", value_name = "SECONDS")]
  pub announce_interval: u64,

  /// 只记录播报内容，不调用语音合成
  #[arg(long)]
  pub no_speech: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
  /// 打开显示窗口
  Auto,
  /// 不显示
  None,
}

impl DisplayMode {
  fn as_str(&self) -> &'static str {
    match self {
      DisplayMode::Auto => "auto",
      DisplayMode::None => "none",
    }
  }
}

impl Args {
  pub fn nms_settings(&self) -> NmsSettings {
    NmsSettings {
      conf_thres: self.conf_thres,
      iou_thres: self.iou_thres,
      classes: self.classes.clone(),
      agnostic: self.agnostic_nms,
      max_det: self.max_det,
    }
  }

  /// `imgsz` 为已对齐到模型步长的推理尺寸
  pub fn detect_settings(&self, imgsz: u32) -> DetectSettings {
    DetectSettings {
      imgsz,
      max_frames: self.max_frames,
      nms: self.nms_settings(),
    }
  }

  pub fn speech_settings(&self) -> SpeechSettings {
    SpeechSettings {
      program: self.tts_exe.clone(),
      voice: self.tts_voice.clone(),
      speed: self.tts_speed,
    }
  }

  pub fn announce_interval(&self) -> Duration {
    Duration::from_secs(self.announce_interval)
  }

  /// 所有参数的单行回显，形如 `detect: weights=..., source=...`
  pub fn summary(&self) -> String {
    let classes = match &self.classes {
      Some(ids) => format!(
        "[{}]",
        ids
          .iter()
          .map(|id| id.to_string())
          .collect::<Vec<_>>()
          .join(", ")
      ),
      None => "None".to_string(),
    };
    let optional_path = |path: &Option<PathBuf>| match path {
      Some(path) => path.display().to_string(),
      None => "None".to_string(),
    };

    let pairs = [
      ("weights", self.weights.display().to_string()),
      ("source", self.source.clone()),
      ("imgsz", self.imgsz.to_string()),
      ("conf_thres", self.conf_thres.to_string()),
      ("iou_thres", self.iou_thres.to_string()),
      ("max_det", self.max_det.to_string()),
      ("device", self.device.clone()),
      ("line_thickness", self.line_thickness.to_string()),
      ("agnostic_nms", self.agnostic_nms.to_string()),
      ("classes", classes),
      ("names", optional_path(&self.names)),
      ("font", optional_path(&self.font)),
      ("display", self.display.as_str().to_string()),
      ("max_frames", self.max_frames.to_string()),
      ("tts_exe", self.tts_exe.display().to_string()),
      ("tts_voice", self.tts_voice.clone()),
      ("tts_speed", self.tts_speed.to_string()),
      ("announce_interval", self.announce_interval.to_string()),
      ("no_speech", self.no_speech.to_string()),
    ];

    let body = pairs
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join(", ");
    format!("detect: {}", body)
  }
}
