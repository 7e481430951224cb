// 该文件是 Kanjian （看见） 项目的一部分。
// src/device.rs - 推理设备选择
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

use std::{fmt, path::Path};

use thiserror::Error;
use tracing::info;

/// RKNPU 驱动在不同内核上暴露的节点
#[cfg(feature = "backend_rknpu")]
const RKNPU_DRIVER_NODES: [&str; 3] = [
  "/sys/kernel/debug/rknpu/version",
  "/proc/debug/rknpu/version",
  "/dev/rknpu",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Npu,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeviceError {
  #[error("不支持的设备: {0}")]
  Unsupported(String),
  #[error("设备 {0} 未编译进当前程序，请启用对应特性")]
  NotCompiled(&'static str),
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Npu => write!(f, "npu"),
    }
  }
}

impl Device {
  /// 根据 `--device` 选择设备，空字符串表示自动选择
  pub fn select(requested: &str) -> Result<Self, DeviceError> {
    let device = match requested.trim().to_lowercase().as_str() {
      "" => Self::auto(),
      "cpu" => Device::Cpu,
      "npu" | "rknpu" => {
        if !cfg!(feature = "backend_rknpu") {
          return Err(DeviceError::NotCompiled("npu"));
        }
        Device::Npu
      }
      other => return Err(DeviceError::Unsupported(other.to_string())),
    };
    info!("使用推理设备: {}", device);
    Ok(device)
  }

  fn auto() -> Self {
    #[cfg(feature = "backend_rknpu")]
    {
      if RKNPU_DRIVER_NODES.iter().any(|node| Path::new(node).exists()) {
        return Device::Npu;
      }
    }
    Device::Cpu
  }

  /// 设备对应的权重文件扩展名
  pub fn weights_extension(&self) -> &'static str {
    match self {
      Device::Cpu => "onnx",
      Device::Npu => "rknn",
    }
  }

  pub fn accepts(&self, weights: &Path) -> bool {
    weights
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| ext.eq_ignore_ascii_case(self.weights_extension()))
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_cpu_is_always_available() {
    assert_eq!(Device::select("cpu"), Ok(Device::Cpu));
    assert_eq!(Device::select(" CPU "), Ok(Device::Cpu));
  }

  #[test]
  fn unknown_device_is_rejected() {
    assert_eq!(
      Device::select("cuda:0"),
      Err(DeviceError::Unsupported("cuda:0".to_string()))
    );
  }

  #[cfg(not(feature = "backend_rknpu"))]
  #[test]
  fn npu_requires_the_backend_feature() {
    assert_eq!(Device::select("npu"), Err(DeviceError::NotCompiled("npu")));
    assert_eq!(Device::select(""), Ok(Device::Cpu));
  }

  #[test]
  fn weights_extension_follows_device() {
    assert!(Device::Cpu.accepts(Path::new("yolov5s.onnx")));
    assert!(Device::Npu.accepts(Path::new("/models/yolov5s.RKNN")));
    assert!(!Device::Cpu.accepts(Path::new("yolov5s.pt")));
    assert!(!Device::Npu.accepts(Path::new("weights")));
  }
}
