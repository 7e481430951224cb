// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 检测主循环
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

use std::{
  sync::mpsc::Receiver,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::{
  detection::{Detection, classify},
  frame::{Frame, LetterboxFrame},
  model::{
    Model, Predictions,
    nms::{NmsSettings, non_max_suppression},
  },
  notifier::Notifier,
  output::{Display, draw::Annotator},
  speech::Speaker,
};

/// 每帧等待窗口事件的时间
const POLL_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct DetectSettings {
  /// 已对齐到步长的推理尺寸
  pub imgsz: u32,
  /// 0 表示无限制
  pub max_frames: u64,
  pub nms: NmsSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Initializing,
  Streaming,
  Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  EndOfSource,
  QuitRequested,
  Interrupted,
  FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: u64,
  pub reason: StopReason,
}

pub struct DetectTask<M, S, D> {
  model: M,
  notifier: Notifier<S>,
  annotator: Annotator,
  display: D,
  settings: DetectSettings,
  stop: Receiver<()>,
  state: LoopState,
}

impl<M, S, D> DetectTask<M, S, D>
where
  M: Model<Input = LetterboxFrame, Output = Predictions>,
  M::Error: std::error::Error + Send + Sync + 'static,
  S: Speaker,
  D: Display,
{
  pub fn new(
    model: M,
    notifier: Notifier<S>,
    annotator: Annotator,
    display: D,
    settings: DetectSettings,
    stop: Receiver<()>,
  ) -> Self {
    Self {
      model,
      notifier,
      annotator,
      display,
      settings,
      stop,
      state: LoopState::Initializing,
    }
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  pub fn display(&self) -> &D {
    &self.display
  }

  /// 用灰色空帧推理一次
  pub fn warmup(&mut self) -> anyhow::Result<()> {
    let now = Instant::now();
    self
      .model
      .infer(&LetterboxFrame::blank(self.settings.imgsz))
      .context("模型预热失败")?;
    info!("模型预热完成，耗时: {:.2?}", now.elapsed());
    self.state = LoopState::Streaming;
    Ok(())
  }

  /// 推理、分级、播报、绘制并显示一帧
  pub fn process_frame(&mut self, frame: Frame, now: Instant) -> anyhow::Result<Vec<Detection>> {
    let Frame {
      mut image,
      index,
      origin,
      stream,
    } = frame;

    let started = Instant::now();
    let input = LetterboxFrame::new(&image, self.settings.imgsz);
    let predictions = self
      .model
      .infer(&input)
      .with_context(|| format!("第 {} 帧推理失败 ({})", index, origin))?;
    let elapsed_infer = started.elapsed();

    let result = non_max_suppression(&predictions, &self.settings.nms).scaled_to_source(&input);
    let detections = classify(&result.items, self.model.names());
    debug!(
      "{} 第 {} 帧: {} 个候选, {} 个检测结果",
      origin,
      index,
      result.items.len(),
      detections.len()
    );

    self.notifier.notify(&detections, now);

    self.annotator.annotate(&mut image, &detections);
    self.display.show(stream, &image)?;
    debug!(
      "推理完成，耗时: {:.2?} / {:.2?}",
      elapsed_infer,
      started.elapsed()
    );

    Ok(detections)
  }

  pub fn run<I, E>(&mut self, mut input: I) -> anyhow::Result<TaskSummary>
  where
    I: Iterator<Item = Result<Frame, E>>,
    E: std::error::Error + Send + Sync + 'static,
  {
    info!("开始任务...");
    self.warmup()?;

    let mut frames = 0u64;
    let reason = loop {
      if self.settings.max_frames > 0 && frames >= self.settings.max_frames {
        info!("达到指定帧数 {}, 退出任务循环", frames);
        break StopReason::FrameLimit;
      }
      if self.stop.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break StopReason::Interrupted;
      }

      let Some(frame) = input.next() else {
        info!("输入结束，退出任务循环");
        break StopReason::EndOfSource;
      };
      let frame = frame.context("读取输入帧失败")?;

      self.process_frame(frame, Instant::now())?;
      frames += 1;

      if self.display.poll_quit(POLL_WAIT)? {
        info!("用户请求退出");
        break StopReason::QuitRequested;
      }
    };

    self.state = LoopState::Terminating;
    info!("任务完成，共处理 {} 帧", frames);
    Ok(TaskSummary { frames, reason })
  }
}

#[cfg(test)]
mod tests {
  use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::mpsc,
  };

  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{
    detection::{GREEN, YELLOW},
    input::InputError,
    output::OutputError,
    speech::SpeechError,
  };

  const SIZE: u32 = 64;

  /// 输出固定结果：一个人 (0.85) 和一辆车 (0.55)
  struct FakeModel {
    names: Vec<String>,
    calls: Rc<Cell<usize>>,
  }

  impl FakeModel {
    fn new() -> Self {
      Self {
        names: vec!["person".to_string(), "car".to_string()],
        calls: Rc::default(),
      }
    }
  }

  #[derive(Debug, thiserror::Error)]
  #[error("fake model error")]
  struct FakeModelError;

  impl Model for FakeModel {
    type Input = LetterboxFrame;
    type Output = Predictions;
    type Error = FakeModelError;

    fn infer(&self, input: &LetterboxFrame) -> Result<Predictions, FakeModelError> {
      assert_eq!(input.size(), SIZE);
      self.calls.set(self.calls.get() + 1);
      #[rustfmt::skip]
      let data = vec![
        20.0, 20.0, 20.0, 20.0, 1.0, 0.85, 0.0,
        48.0, 48.0, 16.0, 16.0, 1.0, 0.0, 0.55,
      ];
      Ok(Predictions::new(2, data))
    }

    fn stride(&self) -> u32 {
      32
    }

    fn names(&self) -> &[String] {
      &self.names
    }
  }

  #[derive(Clone, Default)]
  struct RecordingSpeaker {
    spoken: Rc<RefCell<Vec<String>>>,
  }

  impl Speaker for RecordingSpeaker {
    fn announce(&self, text: &str) -> Result<(), SpeechError> {
      self.spoken.borrow_mut().push(text.to_string());
      Ok(())
    }
  }

  #[derive(Default)]
  struct ScriptedDisplay {
    shown: Vec<RgbImage>,
    streams: Vec<usize>,
    quit_after: Option<usize>,
  }

  impl Display for ScriptedDisplay {
    fn show(&mut self, stream: usize, image: &RgbImage) -> Result<(), OutputError> {
      self.shown.push(image.clone());
      self.streams.push(stream);
      Ok(())
    }

    fn poll_quit(&mut self, _wait: Duration) -> Result<bool, OutputError> {
      Ok(self.quit_after.is_some_and(|n| self.shown.len() >= n))
    }
  }

  fn frames(count: u64) -> impl Iterator<Item = Result<Frame, InputError>> {
    (0..count).map(|index| {
      Ok(Frame {
        image: RgbImage::new(SIZE, SIZE),
        index,
        origin: "test".to_string(),
        stream: 0,
      })
    })
  }

  fn settings(max_frames: u64) -> DetectSettings {
    DetectSettings {
      imgsz: SIZE,
      max_frames,
      nms: NmsSettings::default(),
    }
  }

  fn task(
    display: ScriptedDisplay,
    max_frames: u64,
  ) -> (
    DetectTask<FakeModel, RecordingSpeaker, ScriptedDisplay>,
    RecordingSpeaker,
    Rc<Cell<usize>>,
    mpsc::Sender<()>,
  ) {
    let model = FakeModel::new();
    let calls = model.calls.clone();
    let speaker = RecordingSpeaker::default();
    let notifier = Notifier::new(speaker.clone(), Duration::ZERO);
    let (tx, rx) = mpsc::channel();
    let task = DetectTask::new(
      model,
      notifier,
      Annotator::new(None, 2),
      display,
      settings(max_frames),
      rx,
    );
    (task, speaker, calls, tx)
  }

  #[test]
  fn runs_until_the_source_ends() {
    let (mut task, speaker, calls, _tx) = task(ScriptedDisplay::default(), 0);
    assert_eq!(task.state(), LoopState::Initializing);

    let summary = task.run(frames(3)).unwrap();

    assert_eq!(
      summary,
      TaskSummary {
        frames: 3,
        reason: StopReason::EndOfSource
      }
    );
    assert_eq!(task.state(), LoopState::Terminating);
    // 预热一次加三帧
    assert_eq!(calls.get(), 4);
    assert_eq!(task.display().shown.len(), 3);
    assert_eq!(
      speaker.spoken.borrow().as_slice(),
      &["Person and Object detected."; 3]
    );
  }

  #[test]
  fn detections_are_tiered_and_drawn_in_their_colors() {
    let (mut task, _speaker, _calls, _tx) = task(ScriptedDisplay::default(), 0);
    task.warmup().unwrap();

    let frame = Frame {
      image: RgbImage::new(SIZE, SIZE),
      index: 0,
      origin: "test".to_string(),
      stream: 0,
    };
    let detections = task.process_frame(frame, Instant::now()).unwrap();

    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].class_name, "person");
    assert_eq!(detections[0].bbox, [10.0, 10.0, 30.0, 30.0]);
    assert_eq!(detections[1].class_name, "Object");

    let shown = &task.display().shown[0];
    assert_eq!(shown.get_pixel(10, 20), &Rgb(GREEN));
    assert_eq!(shown.get_pixel(40, 48), &Rgb(YELLOW));
    assert_eq!(shown.get_pixel(20, 20), &Rgb([0, 0, 0]));
  }

  #[test]
  fn frame_limit_stops_the_loop() {
    let (mut task, _speaker, _calls, _tx) = task(ScriptedDisplay::default(), 2);
    let summary = task.run(frames(10)).unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.reason, StopReason::FrameLimit);
  }

  #[test]
  fn quit_key_stops_the_loop() {
    let display = ScriptedDisplay {
      quit_after: Some(2),
      ..Default::default()
    };
    let (mut task, _speaker, _calls, _tx) = task(display, 0);
    let summary = task.run(frames(10)).unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.reason, StopReason::QuitRequested);
  }

  #[test]
  fn interrupt_signal_stops_before_the_next_frame() {
    let (mut task, _speaker, calls, tx) = task(ScriptedDisplay::default(), 0);
    tx.send(()).unwrap();

    let summary = task.run(frames(10)).unwrap();
    assert_eq!(summary.frames, 0);
    assert_eq!(summary.reason, StopReason::Interrupted);
    assert_eq!(calls.get(), 1);
  }

  #[test]
  fn frame_read_errors_terminate_the_run() {
    let (mut task, _speaker, _calls, _tx) = task(ScriptedDisplay::default(), 0);
    let input = frames(1).chain(std::iter::once(Err(InputError::NotFound(
      "/dev/video9".to_string(),
    ))));

    let err = task.run(input).unwrap_err();
    assert!(format!("{:#}", err).contains("/dev/video9"));
    assert_eq!(task.display().shown.len(), 1);
  }

  #[test]
  fn frames_are_shown_on_their_own_stream() {
    let (mut task, _speaker, _calls, _tx) = task(ScriptedDisplay::default(), 0);
    let input = (0..4u64).map(|index| {
      Ok::<_, InputError>(Frame {
        image: RgbImage::new(SIZE, SIZE),
        index: index / 2,
        origin: format!("rtsp://cam{}/live", index % 2),
        stream: (index % 2) as usize,
      })
    });

    let summary = task.run(input).unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!(task.display().streams, vec![0, 1, 0, 1]);
  }

  #[test]
  fn announcements_respect_the_interval() {
    let model = FakeModel::new();
    let speaker = RecordingSpeaker::default();
    let notifier = Notifier::new(speaker.clone(), Duration::from_secs(8));
    let (_tx, rx) = mpsc::channel();
    let mut task = DetectTask::new(
      model,
      notifier,
      Annotator::new(None, 2),
      ScriptedDisplay::default(),
      settings(0),
      rx,
    );

    task.run(frames(5)).unwrap();
    assert!(speaker.spoken.borrow().is_empty());
  }
}
