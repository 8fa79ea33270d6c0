// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, sync::Mutex};

use image::{Rgb, RgbImage, imageops::FilterType};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectError, DetectResult, Detection, Detector},
  output::draw::Draw,
  url_file_path,
};

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_PAD_VALUE: u8 = 114;
const YOLO_IOU_THRESH: f32 = 0.7;
const YOLO_MAX_DETECTIONS: usize = 300;
const YOLO_BOX_ROWS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("标签文件错误: {0}")]
  LabelError(#[from] toml::de::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl YoloError {
  fn ort(e: impl std::fmt::Display) -> Self {
    YoloError::OrtError(e.to_string())
  }
}

#[derive(Debug, Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 加载 YOLO 模型
///
/// URL 格式：`yolo:///path/to/model.onnx?labels=/path/to/labels.toml&threads=4`，
/// 未指定 `labels` 时使用与模型同名的 `.toml` 文件。
pub struct YoloBuilder {
  model_path: PathBuf,
  labels_path: PathBuf,
  intra_threads: Option<usize>,
  draw: Draw,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = url_file_path(url);
    let mut labels_path = model_path.with_extension("toml");
    let mut intra_threads = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "labels" => labels_path = PathBuf::from(v.as_ref()),
        "threads" => {
          intra_threads = Some(v.parse().map_err(|_| {
            YoloError::ModelPathError(format!("无效的线程数: {}", v))
          })?)
        }
        _ => warn!("忽略未知的模型参数: {}", k),
      }
    }

    Ok(YoloBuilder {
      model_path,
      labels_path,
      intra_threads,
      draw: Draw::default(),
    })
  }
}

impl YoloBuilder {
  pub fn draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    info!("加载模型文件: {}", self.model_path.display());
    let size = std::fs::metadata(&self.model_path)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    info!("加载标签文件: {}", self.labels_path.display());
    let labels: LabelFile = toml::from_str(&std::fs::read_to_string(&self.labels_path)?)?;
    if labels.names.is_empty() {
      return Err(YoloError::ModelInvalid("标签列表为空".to_string()));
    }
    debug!("模型类别数: {}", labels.names.len());

    info!("创建 ONNX Runtime 推理会话");
    let mut builder = Session::builder()
      .map_err(YoloError::ort)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(YoloError::ort)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads).map_err(YoloError::ort)?;
    }
    let session = builder
      .commit_from_file(&self.model_path)
      .map_err(YoloError::ort)?;

    if session.inputs.len() != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", session.inputs.len());
      return Err(YoloError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    if session.outputs.is_empty() {
      return Err(YoloError::ModelInvalid("模型没有输出".to_string()));
    }
    info!("模型加载完成");

    Ok(Yolo {
      session: Mutex::new(session),
      labels: labels.names,
      draw: self.draw,
    })
  }
}

pub struct Yolo {
  // ONNX Runtime 会话推理需要独占访问
  session: Mutex<Session>,
  labels: Vec<String>,
  draw: Draw,
}

impl Yolo {
  pub fn labels(&self) -> &[String] {
    &self.labels
  }
}

impl Detector for Yolo {
  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, DetectError> {
    let infer_err = |e: ort::Error| DetectError::InferError(e.to_string());

    debug!("设置模型输入");
    let (data, letterbox) = letterbox(image);
    let size = YOLO_INPUT_SIZE as usize;
    let input = Tensor::from_array(([1usize, 3, size, size], data.into_boxed_slice()))
      .map_err(infer_err)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| DetectError::StateError("推理会话锁已损坏".to_string()))?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![input]).map_err(infer_err)?;

    debug!("获取模型输出");
    let (shape, raw) = outputs[0].try_extract_tensor::<f32>().map_err(infer_err)?;
    let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

    let items = decode(&shape, raw, &letterbox, confidence, &self.labels)?;
    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }

  fn plot(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    self.draw.plot(image, result)
  }
}

/// 输入图像到模型方形输入之间的映射
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  width: f32,
  height: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32) -> Self {
    let size = YOLO_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((size - new_w) / 2.0).floor(),
      pad_y: ((size - new_h) / 2.0).floor(),
      width: width as f32,
      height: height as f32,
    }
  }

  /// 将模型坐标 (cx, cy, w, h) 还原为原图的 [x_min, y_min, x_max, y_max]
  fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    let x_min = (cx - w / 2.0 - self.pad_x) / self.scale;
    let y_min = (cy - h / 2.0 - self.pad_y) / self.scale;
    let x_max = (cx + w / 2.0 - self.pad_x) / self.scale;
    let y_max = (cy + h / 2.0 - self.pad_y) / self.scale;
    [
      x_min.clamp(0.0, self.width),
      y_min.clamp(0.0, self.height),
      x_max.clamp(0.0, self.width),
      y_max.clamp(0.0, self.height),
    ]
  }
}

/// 等比缩放并填充到 640×640，输出 NCHW 归一化张量数据
fn letterbox(image: &RgbImage) -> (Vec<f32>, Letterbox) {
  let letterbox = Letterbox::new(image.width(), image.height());
  let new_w = (letterbox.width * letterbox.scale).round() as u32;
  let new_h = (letterbox.height * letterbox.scale).round() as u32;
  let resized = if (new_w, new_h) == image.dimensions() {
    image.clone()
  } else {
    image::imageops::resize(image, new_w, new_h, FilterType::Triangle)
  };

  let mut canvas = RgbImage::from_pixel(
    YOLO_INPUT_SIZE,
    YOLO_INPUT_SIZE,
    Rgb([YOLO_PAD_VALUE; 3]),
  );
  image::imageops::replace(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let plane = (YOLO_INPUT_SIZE * YOLO_INPUT_SIZE) as usize;
  let mut data = vec![0f32; 3 * plane];
  for (idx, pixel) in canvas.pixels().enumerate() {
    data[idx] = pixel[0] as f32 / 255.0;
    data[plane + idx] = pixel[1] as f32 / 255.0;
    data[2 * plane + idx] = pixel[2] as f32 / 255.0;
  }

  (data, letterbox)
}

/// 解码 `[1, 4 + 类别数, 候选数]` 形状的输出
fn decode(
  shape: &[usize],
  data: &[f32],
  letterbox: &Letterbox,
  confidence: f32,
  labels: &[String],
) -> Result<Vec<Detection>, DetectError> {
  let [batch, rows, proposals] = shape else {
    return Err(DetectError::InferError(format!("模型输出形状异常: {:?}", shape)));
  };
  if *batch != 1 || *rows <= YOLO_BOX_ROWS || data.len() < rows * proposals {
    return Err(DetectError::InferError(format!(
      "模型输出形状异常: {:?}, 数据长度 {}",
      shape,
      data.len()
    )));
  }

  let (rows, proposals) = (*rows, *proposals);
  let class_num = rows - YOLO_BOX_ROWS;
  if class_num != labels.len() {
    warn!("模型类别数 {} 与标签数 {} 不一致", class_num, labels.len());
  }

  let mut candidates = Vec::new();
  for i in 0..proposals {
    let (class_id, score) = (0..class_num)
      .map(|c| (c, data[(YOLO_BOX_ROWS + c) * proposals + i]))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    // 只保留严格高于阈值的候选
    if score <= confidence {
      continue;
    }

    let cx = data[i];
    let cy = data[proposals + i];
    let w = data[2 * proposals + i];
    let h = data[3 * proposals + i];
    let bbox = letterbox.unmap(cx, cy, w, h);
    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
      continue;
    }

    candidates.push((class_id, score, bbox));
  }

  debug!("置信度过滤后候选框数: {}", candidates.len());
  let kept = nms(candidates, YOLO_IOU_THRESH, YOLO_MAX_DETECTIONS);

  Ok(
    kept
      .into_iter()
      .map(|(class_id, score, bbox)| Detection {
        label: labels
          .get(class_id)
          .cloned()
          .unwrap_or_else(|| format!("class_{}", class_id)),
        confidence: score,
        bbox,
      })
      .collect(),
  )
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  if inter == 0.0 {
    return 0.0;
  }
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  inter / (area_a + area_b - inter)
}

/// 按类别的贪心 NMS
fn nms(
  mut candidates: Vec<(usize, f32, [f32; 4])>,
  iou_thresh: f32,
  max_detections: usize,
) -> Vec<(usize, f32, [f32; 4])> {
  candidates.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));

  let mut kept: Vec<(usize, f32, [f32; 4])> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.0 == candidate.0 && iou(&k.2, &candidate.2) > iou_thresh);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels() -> Vec<String> {
    vec!["glass_bottle".to_string(), "battery".to_string()]
  }

  /// 构造 [1, 6, n] 的输出，每个候选为 (cx, cy, w, h, s0, s1)
  fn output(proposals: &[[f32; 6]]) -> (Vec<usize>, Vec<f32>) {
    let n = proposals.len();
    let mut data = vec![0f32; 6 * n];
    for (i, p) in proposals.iter().enumerate() {
      for (row, value) in p.iter().enumerate() {
        data[row * n + i] = *value;
      }
    }
    (vec![1, 6, n], data)
  }

  #[test]
  fn letterbox_pads_working_frame_vertically() {
    let lb = Letterbox::new(640, 360);
    assert_eq!(lb.scale, 1.0);
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 140.0);

    let image = RgbImage::from_pixel(640, 360, Rgb([255, 0, 0]));
    let (data, _) = letterbox(&image);
    let plane = 640 * 640;
    assert_eq!(data.len(), 3 * plane);
    // 顶部填充区域
    assert!((data[0] - 114.0 / 255.0).abs() < 1e-6);
    // 图像区域
    let inside = 200 * 640 + 10;
    assert_eq!(data[inside], 1.0);
    assert_eq!(data[plane + inside], 0.0);
  }

  #[test]
  fn decode_filters_by_confidence_and_unmaps_boxes() {
    let lb = Letterbox::new(640, 360);
    let (shape, data) = output(&[
      [100.0, 240.0, 40.0, 40.0, 0.91, 0.1],
      [300.0, 300.0, 20.0, 20.0, 0.2, 0.55],
    ]);
    let items = decode(&shape, &data, &lb, 0.6, &labels()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "glass_bottle");
    assert_eq!(items[0].confidence, 0.91);
    assert_eq!(items[0].bbox, [80.0, 80.0, 120.0, 120.0]);
  }

  #[test]
  fn decode_drops_score_equal_to_threshold() {
    let lb = Letterbox::new(640, 360);
    let (shape, data) = output(&[
      [100.0, 240.0, 40.0, 40.0, 0.6, 0.0],
      [300.0, 240.0, 40.0, 40.0, 0.0, 0.61],
    ]);
    let items = decode(&shape, &data, &lb, 0.6, &labels()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "battery");
  }

  #[test]
  fn decode_suppresses_overlapping_boxes_of_same_class() {
    let lb = Letterbox::new(640, 360);
    let (shape, data) = output(&[
      [100.0, 240.0, 40.0, 40.0, 0.9, 0.0],
      [101.0, 241.0, 40.0, 40.0, 0.8, 0.0],
      [101.0, 241.0, 40.0, 40.0, 0.0, 0.7],
    ]);
    let items = decode(&shape, &data, &lb, 0.6, &labels()).unwrap();
    let found: Vec<&str> = items.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(found, vec!["glass_bottle", "battery"]);
  }

  #[test]
  fn decode_rejects_bad_shape() {
    let lb = Letterbox::new(640, 360);
    assert!(decode(&[1, 4, 2], &[0.0; 8], &lb, 0.6, &labels()).is_err());
    assert!(decode(&[6, 2], &[0.0; 12], &lb, 0.6, &labels()).is_err());
  }

  #[test]
  fn unknown_class_gets_placeholder_label() {
    let lb = Letterbox::new(640, 360);
    let (shape, data) = output(&[[100.0, 240.0, 40.0, 40.0, 0.0, 0.95]]);
    let items = decode(&shape, &data, &lb, 0.6, &labels()[..1]).unwrap();
    assert_eq!(items[0].label, "class_1");
  }

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("yolo:///models/waste.onnx?threads=2").unwrap();
    let builder = YoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/waste.onnx"));
    assert_eq!(builder.labels_path, PathBuf::from("/models/waste.toml"));
    assert_eq!(builder.intra_threads, Some(2));

    let url = Url::parse("yolo:///models/waste.onnx?labels=/etc/labels.toml").unwrap();
    let builder = YoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.labels_path, PathBuf::from("/etc/labels.toml"));
  }

  #[test]
  fn builder_keeps_configured_draw() {
    let url = Url::parse("yolo:///models/waste.onnx").unwrap();
    let builder = YoloBuilder::from_url(&url)
      .unwrap()
      .draw(Draw::without_font());
    assert!(!builder.draw.has_font());
  }

  #[test]
  fn builder_rejects_other_scheme_and_missing_file() {
    let url = Url::parse("onnx:///models/waste.onnx").unwrap();
    assert!(matches!(
      YoloBuilder::from_url(&url),
      Err(YoloError::ModelPathError(_))
    ));

    let url = Url::parse("yolo:///nonexistent/waste.onnx").unwrap();
    let err = YoloBuilder::from_url(&url).unwrap().build().err().unwrap();
    assert!(matches!(err, YoloError::ModelLoadError(_)));
  }
}
