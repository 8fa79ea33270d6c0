// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/pipeline.rs - 分类与标注流水线
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

//! 一帧图像的处理流程：
//!
//! 1. 缩放到 640×360 工作分辨率；
//! 2. 运行检测器；
//! 3. 在检测器自带的可视化结果上再绘制绿色检测框与 "名称: 置信度%" 标签；
//! 4. 汇总不重复的标签并与类别表求交；
//! 5. 在左上角逐行绘制非空类别的摘要。

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  category::{CategorySummary, CategoryTable},
  frame::{AnnotatedFrame, resize_to_working},
  model::{DEFAULT_CONFIDENCE, DetectError, Detector},
  output::draw::Draw,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("检测失败: {0}")]
  DetectError(#[from] DetectError),
}

/// 检测器、类别表与绘图工具在启动时构造一次，之后只读共享
#[derive(Clone)]
pub struct Pipeline {
  detector: Arc<dyn Detector>,
  table: Arc<CategoryTable>,
  draw: Draw,
  confidence: f32,
}

impl Pipeline {
  pub fn new(detector: Arc<dyn Detector>, table: Arc<CategoryTable>) -> Self {
    Self {
      detector,
      table,
      draw: Draw::default(),
      confidence: DEFAULT_CONFIDENCE,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn table(&self) -> &CategoryTable {
    &self.table
  }

  pub fn process(
    &self,
    image: &RgbImage,
  ) -> Result<(AnnotatedFrame, CategorySummary), PipelineError> {
    let resized = resize_to_working(image);

    let result = self.detector.infer(&resized, self.confidence)?;
    debug!("检测到 {} 个物体", result.len());

    let mut annotated = self.detector.plot(&resized, &result);
    let box_labels: Vec<String> = result
      .items
      .iter()
      .map(|item| self.draw.draw_detection(&mut annotated, item))
      .collect();

    let summary = self.table.classify(result.labels());
    let overlay = summary.overlay_lines();
    self.draw.draw_summary(&mut annotated, &overlay);
    if !overlay.is_empty() {
      debug!("分类结果: {}", overlay.join(" | "));
    }

    Ok((
      AnnotatedFrame {
        image: annotated,
        box_labels,
        overlay,
      },
      summary,
    ))
  }
}
