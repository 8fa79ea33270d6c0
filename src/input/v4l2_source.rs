// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, url_file_path};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4l2SourceError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("无法打开设备 {0}: {1}")]
  OpenError(String, std::io::Error),
  #[error("V4L2 错误: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("无效的参数: {0}")]
  InvalidParameter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
}

/// V4L2 摄像头输入源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Box<Device> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
/// 摄像头在析构时释放。
pub struct V4l2Source {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  device_path: String,
  pixel_format: PixelFormat,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4l2Source {
  type Error = V4l2SourceError;

  /// `v4l:///dev/video0?width=640&height=480`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4l2SourceError::SchemaMismatch);
    }

    let device_path = match url.path() {
      "" | "/" => DEFAULT_DEVICE.to_string(),
      _ => url_file_path(url).to_string_lossy().into_owned(),
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (k, v) in url.query_pairs() {
      let parse = |v: &str| {
        v.parse::<u32>()
          .map_err(|_| V4l2SourceError::InvalidParameter(format!("{}={}", k, v)))
      };
      match k.as_ref() {
        "width" => width = parse(v.as_ref())?,
        "height" => height = parse(v.as_ref())?,
        _ => warn!("忽略未知的摄像头参数: {}", k),
      }
    }

    Self::open(&device_path, width, height)
  }
}

impl V4l2Source {
  /// 打开摄像头并开始捕获
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4l2SourceError> {
    info!("打开摄像头: {}", device_path);
    let device = Box::pin(
      Device::with_path(device_path)
        .map_err(|e| V4l2SourceError::OpenError(device_path.to_string(), e))?,
    );

    // 设置视频格式，优先 YUYV，不支持时退回 MJPG
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let mut format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      format.fourcc = FourCC::new(b"MJPG");
      format = device.set_format(&format)?;
    }

    let pixel_format = if format.fourcc == FourCC::new(b"YUYV") {
      PixelFormat::Yuyv
    } else if format.fourcc == FourCC::new(b"MJPG") {
      PixelFormat::Mjpg
    } else {
      return Err(V4l2SourceError::UnsupportedPixelFormat(format.fourcc.to_string()));
    };

    info!(
      "摄像头格式: {}x{} {:?}",
      format.width, format.height, pixel_format
    );

    let mut source = Self {
      device,
      stream: None,
      device_path: device_path.to_string(),
      pixel_format,
      width: format.width,
      height: format.height,
    };

    // SAFETY: device 被 Pin<Box> 固定，不会移动，所以引用始终有效
    // Stream 的生命周期通过 source 的 Drop 来管理
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      // 1. device 被 Pin<Box> 固定在堆上，不会移动
      // 2. stream 存储在同一个结构体中，会在 device 之前被 drop
      // 3. Drop 顺序：stream (Option::take) -> device
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn decode(&self, buffer: &[u8]) -> Option<RgbImage> {
    match self.pixel_format {
      PixelFormat::Yuyv => {
        RgbImage::from_raw(self.width, self.height, yuyv_to_rgb(buffer, self.width, self.height))
      }
      PixelFormat::Mjpg => match image::load_from_memory_with_format(buffer, image::ImageFormat::Jpeg) {
        Ok(image) => Some(image.to_rgb8()),
        Err(e) => {
          warn!("MJPG 帧解码失败: {}", e);
          None
        }
      },
    }
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    info!("释放摄像头: {}", self.device_path);
  }
}

impl Iterator for V4l2Source {
  type Item = RgbImage;

  /// 读取失败视为输入结束
  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let buffer = match stream.next() {
      Ok((buffer, meta)) => {
        let used = (meta.bytesused as usize).min(buffer.len());
        let used = if used == 0 { buffer.len() } else { used };
        buffer[..used].to_vec()
      }
      Err(e) => {
        warn!("无法捕获帧: {}", e);
        return None;
      }
    };

    let frame = self.decode(&buffer);
    if frame.is_none() {
      debug!("帧数据无法转换为图像，结束捕获");
    }
    frame
  }
}
