// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// tests/common/mod.rs - 测试用检测器
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

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};

use fenlei::{
  category::CategoryTable,
  model::{DetectError, DetectResult, Detection, Detector},
  output::draw::Draw,
  pipeline::Pipeline,
};

pub const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// 返回固定检测结果的检测器，并记录收到的置信度阈值
#[derive(Default)]
pub struct FixedDetector {
  pub detections: Vec<Detection>,
  pub seen_confidence: Mutex<Vec<f32>>,
  pub fail: bool,
}

impl FixedDetector {
  pub fn new(detections: Vec<Detection>) -> Self {
    Self {
      detections,
      ..Default::default()
    }
  }

  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Default::default()
    }
  }
}

impl Detector for FixedDetector {
  fn infer(&self, _image: &RgbImage, confidence: f32) -> Result<DetectResult, DetectError> {
    self.seen_confidence.lock().unwrap().push(confidence);
    if self.fail {
      return Err(DetectError::InferError("模拟推理失败".to_string()));
    }
    Ok(DetectResult::from(self.detections.clone()))
  }
}

pub fn detection(label: &str, confidence: f32, bbox: [f32; 4]) -> Detection {
  Detection {
    label: label.to_string(),
    confidence,
    bbox,
  }
}

pub fn table() -> Arc<CategoryTable> {
  Arc::new(CategoryTable::new(
    ["glass_bottle", "plastic_bottle", "can"],
    ["plastic_bag", "straw"],
    ["battery", "light_bulb"],
  ))
}

pub fn pipeline(detector: Arc<FixedDetector>) -> Pipeline {
  Pipeline::new(detector, table()).with_draw(Draw::without_font())
}

pub fn gray_frame() -> RgbImage {
  RgbImage::from_pixel(640, 360, GRAY)
}

/// 玻璃瓶与电池各一个
pub fn bottle_and_battery() -> Vec<Detection> {
  vec![
    detection("glass_bottle", 0.91, [100.0, 100.0, 200.0, 200.0]),
    detection("battery", 0.72, [300.0, 100.0, 400.0, 200.0]),
  ]
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
  let mut buffer = std::io::Cursor::new(Vec::new());
  image
    .write_to(&mut buffer, image::ImageFormat::Png)
    .unwrap();
  buffer.into_inner()
}
