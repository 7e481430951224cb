// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 视频/图像输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::frame::Frame;

mod image_file;
pub use self::image_file::{ImageFileError, read_image_file};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputItem};

const STREAM_PREFIXES: [&str; 4] = ["rtsp://", "rtmp://", "http://", "https://"];
const STREAMS_FILE_SUFFIX: &str = ".streams";

pub const IMAGE_EXTENSIONS: [&str; 6] = ["bmp", "jpeg", "jpg", "png", "webp", "gif"];
pub const VIDEO_EXTENSIONS: [&str; 11] = [
  "asf", "avi", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ts", "wmv", "webm",
];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileError(#[from] ImageFileError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid stream address {0}: {1}")]
  InvalidUrl(String, url::ParseError),
  #[error("No stream address in {0}")]
  EmptyStreams(String),
  #[error("Not a camera or stream address in {0}: {1}")]
  InvalidStreamEntry(String, String),
  #[error("Source not found: {0}")]
  NotFound(String),
  #[error("No images or videos in directory: {0}")]
  EmptyDirectory(String),
  #[error("Unsupported file type: {0}")]
  UnsupportedFile(String),
  #[error("Source {0} needs the gstreamer_input feature")]
  NotCompiled(String),
}

/// `--source` 的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
  /// 摄像头编号，对应 /dev/video<N>
  Camera(u32),
  /// 网络流
  Stream(Url),
  /// 图片、视频或目录
  Path(PathBuf),
  /// `.streams` 文件中列出的多路摄像头或网络流
  Streams(Vec<SourceSpec>),
}

impl SourceSpec {
  pub fn parse(source: &str) -> Result<Self, InputError> {
    let source = source.trim();

    if !source.is_empty() && source.chars().all(|c| c.is_ascii_digit()) {
      let index = source
        .parse::<u32>()
        .map_err(|_| InputError::NotFound(source.to_string()))?;
      return Ok(SourceSpec::Camera(index));
    }

    let lower = source.to_lowercase();
    if STREAM_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
      let url = Url::parse(source).map_err(|e| InputError::InvalidUrl(source.to_string(), e))?;
      return Ok(SourceSpec::Stream(url));
    }

    if lower.ends_with(STREAMS_FILE_SUFFIX) {
      return Self::from_streams_file(Path::new(source));
    }

    Ok(SourceSpec::Path(PathBuf::from(source)))
  }

  /// `.streams` 文件每行一个摄像头编号或网络流地址，全部打开
  fn from_streams_file(path: &Path) -> Result<Self, InputError> {
    let content = std::fs::read_to_string(path)?;
    let streams = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(|line| match Self::parse(line)? {
        parsed @ (SourceSpec::Camera(_) | SourceSpec::Stream(_)) => Ok(parsed),
        _ => Err(InputError::InvalidStreamEntry(
          path.display().to_string(),
          line.to_string(),
        )),
      })
      .collect::<Result<Vec<_>, _>>()?;

    if streams.is_empty() {
      return Err(InputError::EmptyStreams(path.display().to_string()));
    }
    info!("{} 中共 {} 路输入", path.display(), streams.len());
    Ok(SourceSpec::Streams(streams))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
  Image,
  Video,
}

pub fn file_kind(path: &Path) -> Option<FileKind> {
  let ext = path.extension()?.to_str()?.to_lowercase();
  if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
    Some(FileKind::Image)
  } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
    Some(FileKind::Video)
  } else {
    None
  }
}

/// 按文件名排序依次读取图片和视频
pub struct FileSequence {
  paths: VecDeque<PathBuf>,
  #[cfg(feature = "gstreamer_input")]
  current: Option<GStreamerInput>,
  index: u64,
}

impl FileSequence {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    if !path.exists() {
      return Err(InputError::NotFound(path.display().to_string()));
    }

    let paths = if path.is_dir() {
      let mut entries = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
      entries.retain(|p| p.is_file() && file_kind(p).is_some());
      entries.sort();
      if entries.is_empty() {
        return Err(InputError::EmptyDirectory(path.display().to_string()));
      }
      entries
    } else {
      if file_kind(path).is_none() {
        return Err(InputError::UnsupportedFile(path.display().to_string()));
      }
      vec![path.to_path_buf()]
    };

    info!("共 {} 个输入文件", paths.len());
    Ok(Self {
      paths: paths.into(),
      #[cfg(feature = "gstreamer_input")]
      current: None,
      index: 0,
    })
  }

  fn next_index(&mut self) -> u64 {
    let index = self.index;
    self.index += 1;
    index
  }

  fn open_next(&mut self) -> Option<Result<Frame, InputError>> {
    let path = self.paths.pop_front()?;
    match file_kind(&path) {
      Some(FileKind::Image) => {
        let index = self.next_index();
        Some(
          read_image_file(&path)
            .map(|image| Frame {
              image,
              index,
              origin: path.display().to_string(),
              stream: 0,
            })
            .map_err(InputError::from),
        )
      }
      Some(FileKind::Video) => self.open_video(&path),
      None => Some(Err(InputError::UnsupportedFile(path.display().to_string()))),
    }
  }

  #[cfg(feature = "gstreamer_input")]
  fn open_video(&mut self, path: &Path) -> Option<Result<Frame, InputError>> {
    info!("打开视频文件: {}", path.display());
    match GStreamerInputItem::file(path).build() {
      Ok(input) => {
        self.current = Some(input);
        self.next()
      }
      Err(e) => Some(Err(e.into())),
    }
  }

  #[cfg(not(feature = "gstreamer_input"))]
  fn open_video(&mut self, path: &Path) -> Option<Result<Frame, InputError>> {
    Some(Err(InputError::NotCompiled(path.display().to_string())))
  }
}

/// 多路输入轮流取帧，并在帧上标注所属的流编号
///
/// 某一路结束后从轮转中移除，全部结束时迭代结束；任一路的读取错误原样返回。
pub struct Interleave<I> {
  inputs: Vec<(usize, I)>,
  cursor: usize,
}

impl<I> Interleave<I> {
  pub fn new(inputs: Vec<I>) -> Self {
    Self {
      inputs: inputs.into_iter().enumerate().collect(),
      cursor: 0,
    }
  }
}

impl<I, E> Iterator for Interleave<I>
where
  I: Iterator<Item = Result<Frame, E>>,
{
  type Item = Result<Frame, E>;

  fn next(&mut self) -> Option<Self::Item> {
    while !self.inputs.is_empty() {
      let pos = self.cursor % self.inputs.len();
      let (stream, input) = &mut self.inputs[pos];
      let stream = *stream;
      match input.next() {
        Some(item) => {
          self.cursor = pos + 1;
          return Some(item.map(|mut frame| {
            frame.stream = stream;
            frame
          }));
        }
        None => {
          info!("第 {} 路输入结束，剩余 {} 路", stream, self.inputs.len() - 1);
          self.inputs.remove(pos);
          self.cursor = pos;
        }
      }
    }
    None
  }
}

impl Iterator for FileSequence {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    #[cfg(feature = "gstreamer_input")]
    {
      if let Some(video) = self.current.as_mut() {
        match video.next() {
          Some(Ok(mut frame)) => {
            frame.index = self.next_index();
            return Some(Ok(frame));
          }
          Some(Err(e)) => return Some(Err(e.into())),
          None => self.current = None,
        }
      }
    }

    self.open_next()
  }
}

pub enum Source {
  Files(FileSequence),
  #[cfg(feature = "gstreamer_input")]
  Live(GStreamerInput),
  #[cfg(feature = "gstreamer_input")]
  Streams(Interleave<GStreamerInput>),
}

#[cfg(feature = "gstreamer_input")]
fn open_live(source: &SourceSpec) -> Result<GStreamerInput, InputError> {
  match source {
    SourceSpec::Camera(index) => {
      let device = format!("/dev/video{}", index);
      info!("打开摄像头: {}", device);
      Ok(GStreamerInputItem::camera(&device).build()?)
    }
    SourceSpec::Stream(url) => {
      info!("打开网络流: {}", url);
      Ok(GStreamerInputItem::uri(url).build()?)
    }
    other => Err(InputError::NotFound(format!("{:?}", other))),
  }
}

/// 按 `--source` 打开输入源
pub fn open_source(source: &SourceSpec) -> Result<Source, InputError> {
  match source {
    SourceSpec::Path(path) => Ok(Source::Files(FileSequence::open(path)?)),
    #[cfg(feature = "gstreamer_input")]
    SourceSpec::Camera(_) | SourceSpec::Stream(_) => Ok(Source::Live(open_live(source)?)),
    #[cfg(feature = "gstreamer_input")]
    SourceSpec::Streams(streams) => {
      let inputs = streams
        .iter()
        .map(open_live)
        .collect::<Result<Vec<_>, _>>()?;
      info!("已打开 {} 路输入，轮流取帧", inputs.len());
      Ok(Source::Streams(Interleave::new(inputs)))
    }
    #[cfg(not(feature = "gstreamer_input"))]
    SourceSpec::Camera(index) => Err(InputError::NotCompiled(index.to_string())),
    #[cfg(not(feature = "gstreamer_input"))]
    SourceSpec::Stream(url) => Err(InputError::NotCompiled(url.to_string())),
    #[cfg(not(feature = "gstreamer_input"))]
    SourceSpec::Streams(streams) => Err(InputError::NotCompiled(format!(
      "{} 路输入",
      streams.len()
    ))),
  }
}

impl Iterator for Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      Source::Files(files) => files.next(),
      #[cfg(feature = "gstreamer_input")]
      Source::Live(input) => input.next().map(|frame| frame.map_err(InputError::from)),
      #[cfg(feature = "gstreamer_input")]
      Source::Streams(inputs) => inputs.next().map(|frame| frame.map_err(InputError::from)),
    }
  }
}
