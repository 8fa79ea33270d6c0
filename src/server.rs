// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/server.rs - HTTP 服务
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
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::{
  Json, Router,
  body::Body,
  extract::{DefaultBodyLimit, Multipart, State},
  http::{StatusCode, header},
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  category::CategorySummary,
  input::{ImageFileInput, ImageFileInputError, InputError, InputWrapper},
  pipeline::{Pipeline, PipelineError},
  settings::References,
  stream::{self, LiveStream},
  upload::{TempUpload, UploadError},
};

const HOME_PAGE: &str = include_str!("../assets/home.html");
const UPLOAD_LIMIT: usize = 16 * 1024 * 1024;
const UPLOAD_FIELD: &str = "file";
const UNKNOWN_CATEGORY: &str = "Unknown";

/// 服务共享状态
///
/// 模型加载失败时 `pipeline` 为空，服务照常启动，推理请求返回 503。
#[derive(Clone)]
pub struct AppState {
  pub pipeline: Option<Arc<Pipeline>>,
  pub references: Arc<References>,
  pub upload_dir: Arc<PathBuf>,
  pub camera: Option<Url>,
  /// 服务关闭时变为 `true`，实时分类流随之结束
  pub shutdown: watch::Receiver<bool>,
}

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("检测模型未加载")]
  ModelUnavailable,
  #[error("未配置摄像头")]
  CameraUnavailable,
  #[error("请求无效: {0}")]
  BadRequest(String),
  #[error("上传失败: {0}")]
  UploadError(#[from] UploadError),
  #[error("图像无法读取: {0}")]
  ImageError(#[from] ImageFileInputError),
  #[error("分类失败: {0}")]
  PipelineError(#[from] PipelineError),
  #[error("摄像头错误: {0}")]
  CameraError(#[from] InputError),
  #[error("图像编码失败: {0}")]
  EncodeError(#[from] image::ImageError),
  #[error("内部错误: {0}")]
  Internal(String),
}

impl ServerError {
  fn status(&self) -> StatusCode {
    match self {
      ServerError::ModelUnavailable | ServerError::CameraUnavailable => {
        StatusCode::SERVICE_UNAVAILABLE
      }
      ServerError::CameraError(_) => StatusCode::SERVICE_UNAVAILABLE,
      ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ServerError::ImageError(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ServerError::UploadError(_)
      | ServerError::PipelineError(_)
      | ServerError::EncodeError(_)
      | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn code(&self) -> &'static str {
    match self {
      ServerError::ModelUnavailable => "MODEL_UNAVAILABLE",
      ServerError::CameraUnavailable => "CAMERA_UNAVAILABLE",
      ServerError::BadRequest(_) => "BAD_REQUEST",
      ServerError::UploadError(_) => "UPLOAD_FAILED",
      ServerError::ImageError(_) => "INVALID_IMAGE",
      ServerError::PipelineError(_) => "INFERENCE_FAILED",
      ServerError::CameraError(_) => "CAMERA_FAILED",
      ServerError::EncodeError(_) => "ENCODE_FAILED",
      ServerError::Internal(_) => "INTERNAL_ERROR",
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  pub code: String,
}

impl IntoResponse for ServerError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!("请求失败: {}", self);
    } else {
      warn!("请求被拒绝: {}", self);
    }
    let body = Json(ErrorResponse {
      error: self.to_string(),
      code: self.code().to_string(),
    });
    (status, body).into_response()
  }
}

/// 上传分类结果
#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
  pub predicted_value: String,
  pub details: Vec<String>,
  pub video1: String,
  pub video2: String,
  pub summary: CategorySummary,
  pub detections: Vec<String>,
  /// base64 编码的 JPEG 标注图像
  pub annotated_image: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
  model_loaded: bool,
  camera: Option<String>,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(home))
    .route("/health", get(health))
    .route("/classifywaste", post(classify_waste))
    .route("/live_video", get(live_video))
    .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
    .with_state(state)
}

async fn home() -> Html<&'static str> {
  Html(HOME_PAGE)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
  Json(HealthResponse {
    model_loaded: state.pipeline.is_some(),
    camera: state.camera.as_ref().map(Url::to_string),
  })
}

async fn classify_waste(
  State(state): State<AppState>,
  mut multipart: Multipart,
) -> Result<Json<ClassifyResponse>, ServerError> {
  let pipeline = state.pipeline.clone().ok_or(ServerError::ModelUnavailable)?;

  let mut upload = None;
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| ServerError::BadRequest(e.to_string()))?
  {
    if field.name() == Some(UPLOAD_FIELD) {
      let filename = field.file_name().unwrap_or_default().to_string();
      let content = field
        .bytes()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
      upload = Some((filename, content));
      break;
    }
  }
  let (filename, content) = upload
    .ok_or_else(|| ServerError::BadRequest(format!("缺少 {} 字段", UPLOAD_FIELD)))?;
  info!("收到上传图像: {} ({} 字节)", filename, content.len());

  let references = state.references.clone();
  let upload_dir = state.upload_dir.clone();
  tokio::task::spawn_blocking(move || {
    classify_upload(&pipeline, &references, &upload_dir, &filename, &content)
  })
  .await
  .map_err(|e| ServerError::Internal(e.to_string()))?
  .map(Json)
}

/// 保存、分类并删除上传文件；无论成功与否文件都会被删除
fn classify_upload(
  pipeline: &Pipeline,
  references: &References,
  upload_dir: &Path,
  filename: &str,
  content: &[u8],
) -> Result<ClassifyResponse, ServerError> {
  let upload = TempUpload::save(upload_dir, filename, content)?;
  let image = ImageFileInput::open(upload.path())?
    .next()
    .ok_or_else(|| ServerError::Internal("图像解码后为空".to_string()))?;
  let (frame, summary) = pipeline.process(&image)?;
  drop(upload);

  let predicted = summary.predicted();
  let refs = predicted
    .map(|category| references.get(category).clone())
    .unwrap_or_default();
  let annotated_image = STANDARD.encode(frame.to_jpeg()?);

  Ok(ClassifyResponse {
    predicted_value: predicted
      .map(|category| category.display_name().to_string())
      .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()),
    details: frame.overlay,
    video1: refs.video1,
    video2: refs.video2,
    summary,
    detections: frame.box_labels,
    annotated_image,
  })
}

async fn live_video(State(state): State<AppState>) -> Result<Response, ServerError> {
  let pipeline = state.pipeline.clone().ok_or(ServerError::ModelUnavailable)?;
  let camera = state.camera.clone().ok_or(ServerError::CameraUnavailable)?;

  // 容量为 1：消费者慢时捕获循环随之阻塞
  let (opened_tx, opened_rx) = oneshot::channel();
  let (tx, rx) = mpsc::channel(1);
  let shutdown = state.shutdown.clone();
  tokio::task::spawn_blocking(move || run_live_stream(camera, pipeline, opened_tx, tx, shutdown));

  opened_rx
    .await
    .map_err(|_| ServerError::Internal("摄像头线程意外退出".to_string()))??;

  let body = Body::from_stream(ReceiverStream::new(rx));
  Ok(([(header::CONTENT_TYPE, stream::content_type())], body).into_response())
}

/// 在阻塞线程中打开摄像头并推送帧，摄像头在函数返回时释放
fn run_live_stream(
  camera: Url,
  pipeline: Arc<Pipeline>,
  opened: oneshot::Sender<Result<(), InputError>>,
  tx: mpsc::Sender<Result<Vec<u8>, std::io::Error>>,
  shutdown: watch::Receiver<bool>,
) {
  let input = match InputWrapper::from_url(&camera) {
    Ok(input) => input,
    Err(e) => {
      let _ = opened.send(Err(e));
      return;
    }
  };
  if opened.send(Ok(())).is_err() {
    return;
  }

  info!("开始实时分类流: {}", camera);
  let sent = forward_frames(LiveStream::new(input, pipeline), &tx, &shutdown);
  debug!("实时分类流共发送 {} 帧", sent);
}

/// 逐帧转发到响应通道，直到流结束、客户端断开或服务关闭，返回发送的帧数
fn forward_frames<I: Iterator<Item = RgbImage>>(
  mut frames: LiveStream<I>,
  tx: &mpsc::Sender<Result<Vec<u8>, std::io::Error>>,
  shutdown: &watch::Receiver<bool>,
) -> usize {
  let mut sent = 0;
  loop {
    if *shutdown.borrow() {
      info!("服务关闭，停止实时分类流");
      break;
    }
    let Some(part) = frames.next() else {
      break;
    };
    if tx.blocking_send(Ok(part)).is_err() {
      info!("客户端断开连接，停止实时分类流");
      break;
    }
    sent += 1;
  }
  sent
}

#[cfg(test)]
mod tests {
  use super::*;

  use image::Rgb;

  use crate::{
    category::CategoryTable,
    model::{DetectError, DetectResult, Detector},
    output::draw::Draw,
  };

  struct Empty;

  impl Detector for Empty {
    fn infer(&self, _: &RgbImage, _: f32) -> Result<DetectResult, DetectError> {
      Ok(DetectResult::default())
    }
  }

  fn endless_stream() -> LiveStream<impl Iterator<Item = RgbImage>> {
    let pipeline = Pipeline::new(
      Arc::new(Empty),
      Arc::new(CategoryTable::new(["can"], ["straw"], ["battery"])),
    )
    .with_draw(Draw::without_font());
    let frames = std::iter::repeat_with(|| RgbImage::from_pixel(640, 360, Rgb([50, 50, 50])));
    LiveStream::new(frames, Arc::new(pipeline))
  }

  #[test]
  fn endless_stream_stops_on_shutdown() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(1);
    let worker = std::thread::spawn(move || forward_frames(endless_stream(), &tx, &shutdown_rx));

    let first = rx.blocking_recv().unwrap().unwrap();
    assert!(first.starts_with(b"--frame\r\n"));

    shutdown_tx.send_replace(true);
    // 通道在转发线程退出后关闭
    let mut drained = 0;
    while rx.blocking_recv().is_some() {
      drained += 1;
    }
    assert!(drained <= 2);

    let sent = worker.join().unwrap();
    assert_eq!(sent, drained + 1);
  }

  #[test]
  fn stream_is_not_started_after_shutdown() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(true);
    let (tx, mut rx) = mpsc::channel(1);

    assert_eq!(forward_frames(endless_stream(), &tx, &shutdown_rx), 0);
    drop(tx);
    assert!(rx.blocking_recv().is_none());
  }
}
