// 该文件是 Kanjian （看见） 项目的一部分。
// src/notifier.rs - 定时语音播报
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

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
  detection::{Detection, POSSIBLE_THRESHOLD},
  speech::Speaker,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(8);

/// 每个间隔最多播报一次当前检测到的类别
pub struct Notifier<S> {
  speaker: S,
  interval: Duration,
  last_fired: Instant,
}

impl<S: Speaker> Notifier<S> {
  /// 计时从创建时开始，第一次播报在一个间隔之后
  pub fn new(speaker: S, interval: Duration) -> Self {
    Self::with_last_fired(speaker, interval, Instant::now())
  }

  pub fn with_last_fired(speaker: S, interval: Duration, last_fired: Instant) -> Self {
    Self {
      speaker,
      interval,
      last_fired,
    }
  }

  pub fn last_fired(&self) -> Instant {
    self.last_fired
  }

  /// 每帧调用一次；到达间隔时返回本次播报的内容（可能为空），并重置计时
  pub fn notify(&mut self, detections: &[Detection], now: Instant) -> Option<String> {
    if now.saturating_duration_since(self.last_fired) < self.interval {
      return None;
    }
    self.last_fired = now;

    let message = compose_message(detections);
    match &message {
      Some(text) => {
        info!("{}", text);
        if let Err(e) = self.speaker.announce(text) {
          warn!("TTS failed: {}", e);
        }
      }
      None => debug!("当前没有可播报的目标"),
    }
    message
  }
}

/// 首字母大写，其余小写
pub fn capitalize(name: &str) -> String {
  let mut chars = name.chars();
  match chars.next() {
    Some(first) => first
      .to_uppercase()
      .chain(chars.flat_map(char::to_lowercase))
      .collect(),
    None => String::new(),
  }
}

/// 按首次出现顺序去重后的类别名
pub fn distinct_classes(detections: &[Detection]) -> Vec<String> {
  let mut classes: Vec<String> = Vec::new();
  for detection in detections {
    if detection.confidence <= POSSIBLE_THRESHOLD {
      continue;
    }
    let name = capitalize(&detection.class_name);
    if !classes.contains(&name) {
      classes.push(name);
    }
  }
  classes
}

pub fn compose_message(detections: &[Detection]) -> Option<String> {
  let classes = distinct_classes(detections);
  if classes.is_empty() {
    None
  } else {
    Some(format!("{} detected.", classes.join(" and ")))
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;
  use crate::{
    detection::classify,
    model::DetectItem,
    speech::SpeechError,
  };

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

  struct BrokenSpeaker;

  impl Speaker for BrokenSpeaker {
    fn announce(&self, _text: &str) -> Result<(), SpeechError> {
      Err(SpeechError::SpawnFailed {
        program: "espeak-ng".to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
      })
    }
  }

  fn detections(items: &[(usize, f32)]) -> Vec<Detection> {
    let names: Vec<String> = ["person", "car", "dog", "cat", "traffic light"]
      .iter()
      .map(|s| s.to_string())
      .collect();
    let items: Vec<DetectItem> = items
      .iter()
      .map(|&(class_id, score)| DetectItem {
        class_id,
        score,
        bbox: [0.0, 0.0, 10.0, 10.0],
      })
      .collect();
    classify(&items, &names)
  }

  fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
  }

  #[test]
  fn capitalize_lowers_the_rest() {
    assert_eq!(capitalize("dog"), "Dog");
    assert_eq!(capitalize("traffic light"), "Traffic light");
    assert_eq!(capitalize("TV"), "Tv");
    assert_eq!(capitalize(""), "");
  }

  #[test]
  fn single_class_message() {
    let message = compose_message(&detections(&[(2, 0.9), (2, 0.8)]));
    assert_eq!(message.as_deref(), Some("Dog detected."));
  }

  #[test]
  fn multiple_classes_are_joined_with_and() {
    let message = compose_message(&detections(&[(2, 0.9), (3, 0.95)])).unwrap();
    assert!(message == "Dog and Cat detected." || message == "Cat and Dog detected.");
  }

  #[test]
  fn fires_at_most_once_per_interval() {
    let speaker = RecordingSpeaker::default();
    let start = Instant::now();
    let mut notifier = Notifier::with_last_fired(speaker.clone(), DEFAULT_INTERVAL, start);
    let dets = detections(&[(2, 0.9)]);

    for ms in (0..8000).step_by(33) {
      assert!(notifier.notify(&dets, start + Duration::from_millis(ms)).is_none());
    }
    assert!(notifier.notify(&dets, start + secs(8)).is_some());
    assert!(notifier.notify(&dets, start + secs(9)).is_none());
    assert!(notifier.notify(&dets, start + secs(16)).is_some());

    assert_eq!(speaker.spoken.borrow().len(), 2);
  }

  #[test]
  fn empty_set_resets_timer_without_speaking() {
    let speaker = RecordingSpeaker::default();
    let start = Instant::now();
    let mut notifier = Notifier::with_last_fired(speaker.clone(), DEFAULT_INTERVAL, start);

    assert!(notifier.notify(&[], start + secs(10)).is_none());
    assert_eq!(notifier.last_fired(), start + secs(10));
    assert!(speaker.spoken.borrow().is_empty());

    // 计时已重置，不会积压到下一帧
    let dets = detections(&[(0, 0.9)]);
    assert!(notifier.notify(&dets, start + secs(11)).is_none());
    assert!(notifier.notify(&dets, start + secs(18)).is_some());
  }

  #[test]
  fn speech_failure_is_swallowed_and_timer_still_resets() {
    let start = Instant::now();
    let mut notifier = Notifier::with_last_fired(BrokenSpeaker, DEFAULT_INTERVAL, start);

    let message = notifier.notify(&detections(&[(0, 0.9)]), start + secs(8));
    assert_eq!(message.as_deref(), Some("Person detected."));
    assert_eq!(notifier.last_fired(), start + secs(8));
  }

  #[test]
  fn person_and_possible_car_after_nine_seconds() {
    let speaker = RecordingSpeaker::default();
    let now = Instant::now() + secs(9);
    let mut notifier = Notifier::with_last_fired(speaker.clone(), DEFAULT_INTERVAL, now - secs(9));

    let message = notifier
      .notify(&detections(&[(0, 0.85), (1, 0.55)]), now)
      .unwrap();
    assert!(
      message == "Person and Object detected." || message == "Object and Person detected."
    );
    assert_eq!(notifier.last_fired(), now);
    assert_eq!(speaker.spoken.borrow().as_slice(), &[message]);
  }
}
