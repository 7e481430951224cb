// 该文件是 Kanjian （看见） 项目的一部分。
// src/speech.rs - 语音合成
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

//! # 语音播报
//!
//! `Speaker` 只负责把一句话交出去，不等待播放结束。
//!
//! - [`ProcessSpeaker`] 启动外部语音合成程序（默认 `espeak-ng`），
//!   参数为 `-v <voice> -s <speed> <text>`
//! - [`LogSpeaker`] 只写日志，用于 `--no-speech` 或无声环境

use std::{
  path::PathBuf,
  process::{Command, Output, Stdio},
  thread,
};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SpeechError {
  #[error("无法启动语音程序 {program}: {source}")]
  SpawnFailed {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

pub trait Speaker {
  fn announce(&self, text: &str) -> Result<(), SpeechError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSettings {
  /// 程序路径，或在 PATH 中查找的程序名
  pub program: PathBuf,
  pub voice: String,
  /// 每分钟词数
  pub speed: u32,
}

impl Default for SpeechSettings {
  fn default() -> Self {
    Self {
      program: PathBuf::from("espeak-ng"),
      voice: "en".to_string(),
      speed: 130,
    }
  }
}

pub struct ProcessSpeaker {
  settings: SpeechSettings,
}

impl ProcessSpeaker {
  pub fn new(settings: SpeechSettings) -> Self {
    info!(
      "语音合成程序: {} (voice={}, speed={})",
      settings.program.display(),
      settings.voice,
      settings.speed
    );
    Self { settings }
  }

  fn command(&self, text: &str) -> Command {
    let mut command = Command::new(&self.settings.program);
    command
      .arg("-v")
      .arg(&self.settings.voice)
      .arg("-s")
      .arg(self.settings.speed.to_string())
      .arg(text)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped());
    command
  }
}

impl Speaker for ProcessSpeaker {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    let mut child = self
      .command(text)
      .spawn()
      .map_err(|source| SpeechError::SpawnFailed {
        program: self.settings.program.display().to_string(),
        source,
      })?;
    debug!("语音进程已启动: pid {}", child.id());

    // 回收子进程，stderr 转入日志
    thread::spawn(move || match child.wait_with_output() {
      Ok(output) => {
        if let Some(report) = failure_report(&output) {
          warn!("语音进程退出异常: {}", report);
        }
      }
      Err(e) => warn!("等待语音进程失败: {}", e),
    });

    Ok(())
  }
}

/// 进程失败或写了 stderr 时的日志内容
fn failure_report(output: &Output) -> Option<String> {
  let stderr = String::from_utf8_lossy(&output.stderr);
  let stderr = stderr.trim();
  match (output.status.success(), stderr.is_empty()) {
    (true, true) => None,
    (_, true) => Some(output.status.to_string()),
    (_, false) => Some(format!("{}: {}", output.status, stderr)),
  }
}

#[derive(Debug, Default)]
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    info!("播报: {}", text);
    Ok(())
  }
}

impl<S: Speaker + ?Sized> Speaker for Box<S> {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    (**self).announce(text)
  }
}
