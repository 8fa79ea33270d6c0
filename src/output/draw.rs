// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/output/draw.rs - 检测结果与分类摘要可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::{debug, warn};

use crate::model::{DetectResult, Detection};

// 检测框与标签
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_BASELINE_OFFSET: i32 = 10;

// 分类摘要
const SUMMARY_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const SUMMARY_MARGIN_X: i32 = 10;
const SUMMARY_FIRST_BASELINE: i32 = 30;
const SUMMARY_LINE_SPACING: i32 = 25;

// 模型自带的结果可视化
const PLOT_FONT_SIZE: f32 = 20.0;
const PLOT_TEXT_HEIGHT: i32 = 24;
const PLOT_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const PLOT_TEXT_VERTICAL_PADDING: i32 = 2;
const PLOT_PALETTE_SIZE: usize = 80;

const FONT_CANDIDATES: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 检测框的标签文本，置信度以百分比保留一位小数
pub fn confidence_label(label: &str, confidence: f32) -> String {
  format!("{}: {:.1}%", label, f64::from(confidence) * 100.0)
}

/// 绘图工具
///
/// 没有可用字体时只绘制检测框，文本被跳过。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  label_scale: PxScale,
  plot_scale: PxScale,
  box_color: Rgb<u8>,
  summary_color: Rgb<u8>,
  palette: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::with_font(None)
  }
}

impl Draw {
  /// 优先使用指定字体，否则搜索系统常见字体
  pub fn with_font(path: Option<&Path>) -> Self {
    let font = path
      .and_then(Self::load_font)
      .or_else(|| FONT_CANDIDATES.iter().find_map(|p| Self::load_font(Path::new(p))));
    if font.is_none() {
      warn!("未找到可用字体，叠加文本将被跳过");
    }
    Self::from_font(font)
  }

  pub fn without_font() -> Self {
    Self::from_font(None)
  }

  fn from_font(font: Option<FontArc>) -> Self {
    // 生成 80 种不同的颜色
    let palette = (0..PLOT_PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PLOT_PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      plot_scale: PxScale::from(PLOT_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      summary_color: Rgb(SUMMARY_COLOR),
      palette,
    }
  }

  fn load_font(path: &Path) -> Option<FontArc> {
    let data = std::fs::read(path).ok()?;
    match FontArc::try_from_vec(data) {
      Ok(font) => {
        debug!("加载字体: {}", path.display());
        Some(font)
      }
      Err(e) => {
        warn!("无法解析字体 {}: {}", path.display(), e);
        None
      }
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 绘制矩形边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_rect(&self, image: &mut RgbImage, bbox: &[f32; 4], color: Rgb<u8>) -> Option<Rect> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return None;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    let outer = Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32);
    // 向内逐像素加粗
    for t in 0..BOX_THICKNESS {
      let (rw, rh) = (outer.width().saturating_sub(2 * t), outer.height().saturating_sub(2 * t));
      if rw == 0 || rh == 0 {
        break;
      }
      let rect = Rect::at(x_min + t as i32, y_min + t as i32).of_size(rw, rh);
      draw_hollow_rect_mut(image, rect, color);
    }

    Some(outer)
  }

  /// 以基线位置绘制文本
  fn draw_text_at_baseline(
    &self,
    image: &mut RgbImage,
    text: &str,
    x: i32,
    baseline: i32,
    scale: PxScale,
    color: Rgb<u8>,
  ) {
    let Some(font) = &self.font else {
      return;
    };
    let ascent = font.as_scaled(scale).ascent().round() as i32;
    draw_text_mut(image, color, x, baseline - ascent, scale, font, text);
  }

  /// 绘制一个检测框及其上方的 "名称: 置信度%" 标签，返回标签文本
  pub fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) -> String {
    let label = confidence_label(&detection.label, detection.confidence);
    if let Some(rect) = self.draw_rect(image, &detection.bbox, self.box_color) {
      self.draw_text_at_baseline(
        image,
        &label,
        rect.left(),
        rect.top() - LABEL_BASELINE_OFFSET,
        self.label_scale,
        self.box_color,
      );
    }
    label
  }

  /// 在左上角逐行绘制分类摘要
  pub fn draw_summary(&self, image: &mut RgbImage, lines: &[String]) {
    for (i, line) in lines.iter().enumerate() {
      let baseline = SUMMARY_FIRST_BASELINE + SUMMARY_LINE_SPACING * i as i32;
      self.draw_text_at_baseline(
        image,
        line,
        SUMMARY_MARGIN_X,
        baseline,
        self.label_scale,
        self.summary_color,
      );
    }
  }

  fn color_of(&self, label: &str) -> Rgb<u8> {
    let index = label.bytes().map(usize::from).sum::<usize>() % self.palette.len();
    self.palette[index]
  }

  /// 模型自带风格的可视化：每类一种颜色，标签带填充背景
  pub fn plot(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut image = image.clone();
    for item in result.items.iter() {
      let color = self.color_of(&item.label);
      let Some(rect) = self.draw_rect(&mut image, &item.bbox, color) else {
        continue;
      };

      let Some(font) = &self.font else {
        continue;
      };

      let label = format!("{} {:.2}", item.label, item.confidence);
      let text_width = (label.len() as f32 * PLOT_CHAR_WIDTH) as i32;
      let label_x = rect.left();
      let label_y = (rect.top() - PLOT_TEXT_HEIGHT).max(0);
      let label_width = text_width.min(image.width() as i32 - label_x).max(0) as u32;

      // 仅在标签有空间时绘制
      if label_width > 0 {
        let background = Rect::at(label_x, label_y).of_size(label_width, PLOT_TEXT_HEIGHT as u32);
        draw_filled_rect_mut(&mut image, background, color);
        draw_text_mut(
          &mut image,
          Rgb([255u8, 255u8, 255u8]),
          label_x,
          label_y + PLOT_TEXT_VERTICAL_PADDING,
          self.plot_scale,
          font,
          &label,
        );
      }
    }
    image
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
