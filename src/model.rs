// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/model.rs - 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::output::draw::Draw;

/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.6;

/// 单个检测框
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，工作分辨率下的像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn labels(&self) -> impl Iterator<Item = &str> {
    self.items.iter().map(|item| item.label.as_str())
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("推理错误: {0}")]
  InferError(String),
  #[error("模型状态错误: {0}")]
  StateError(String),
}

/// 目标检测器
///
/// 推理在调用线程上同步完成；不可重入的实现需要在内部串行化。
pub trait Detector: Send + Sync {
  /// 对工作分辨率的图像进行推理，低于 `confidence` 的结果在模型内部丢弃
  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, DetectError>;

  /// 模型自带的结果可视化，默认不绘制任何内容
  fn plot(&self, image: &RgbImage, _result: &DetectResult) -> RgbImage {
    image.clone()
  }
}

impl<D: Detector + ?Sized> Detector for Arc<D> {
  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, DetectError> {
    (**self).infer(image, confidence)
  }

  fn plot(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    (**self).plot(image, result)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_onnx")]
  #[error("YOLO 模型错误: {0}")]
  YoloError(#[from] YoloError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 根据 URL 方案加载检测器，`draw` 用于检测器自带的结果可视化
#[cfg_attr(not(feature = "model_onnx"), allow(unused_variables))]
pub fn load_detector(url: &Url, draw: &Draw) -> Result<Arc<dyn Detector>, ModelError> {
  #[cfg(feature = "model_onnx")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == YoloBuilder::SCHEME {
      let model = YoloBuilder::from_url(url)?.draw(draw.clone()).build()?;
      return Ok(Arc::new(model));
    }
  }
  Err(ModelError::SchemeMismatch(url.scheme().to_string()))
}

#[cfg(feature = "model_onnx")]
mod yolo;
#[cfg(feature = "model_onnx")]
pub use self::yolo::{Yolo, YoloBuilder, YoloError};
