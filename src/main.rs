// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

use std::{sync::mpsc, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use kanjian::{
  args::Args,
  device::Device,
  input::{SourceSpec, open_source},
  model::{
    Model, YOLO_STRIDE, check_img_size,
    labels::{coco_names, load_names},
    load_model,
  },
  notifier::Notifier,
  output::{
    DisplayWrapper,
    draw::{Annotator, load_font},
  },
  speech::{LogSpeaker, ProcessSpeaker, Speaker},
  task::DetectTask,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("{}", args.summary());

  let device = Device::select(&args.device)?;

  let names = match &args.names {
    Some(path) => load_names(path)?,
    None => coco_names(),
  };

  let imgsz = check_img_size(args.imgsz, YOLO_STRIDE);
  let model = load_model(&args.weights, device, imgsz, names)?;
  let imgsz = check_img_size(imgsz, model.stride());
  info!(
    "模型加载完成: {} 个类别, 推理尺寸 {}, fp16={}",
    model.names().len(),
    imgsz,
    model.fp16()
  );

  let source_spec = SourceSpec::parse(&args.source)?;
  let source = open_source(&source_spec)?;

  let speaker: Box<dyn Speaker> = if args.no_speech {
    Box::new(LogSpeaker)
  } else {
    Box::new(ProcessSpeaker::new(args.speech_settings()))
  };
  let notifier = Notifier::new(speaker, args.announce_interval());

  let annotator = Annotator::new(load_font(args.font.as_deref())?, args.line_thickness);
  let display = DisplayWrapper::open(args.display)?;

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let mut task = DetectTask::new(
    model,
    notifier,
    annotator,
    display,
    args.detect_settings(imgsz),
    rx,
  );
  let summary = task.run(source)?;
  info!("退出原因: {:?}, 共 {} 帧", summary.reason, summary.frames);

  Ok(())
}
