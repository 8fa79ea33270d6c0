// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/stream.rs - 实时视频分类流
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

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, error, info};

use crate::pipeline::Pipeline;

/// multipart 分隔符
pub const BOUNDARY: &str = "frame";

pub fn content_type() -> String {
  format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// 将一帧 JPEG 包装为 multipart 的一个部分
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
  let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
  let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
  part.extend_from_slice(header.as_bytes());
  part.extend_from_slice(jpeg);
  part.extend_from_slice(b"\r\n");
  part
}

/// 逐帧拉取的实时分类流
///
/// 每次 `next` 同步读取一帧、处理、编码后返回；输入结束、
/// 检测失败或编码失败时流结束。输入源随流一起析构。
pub struct LiveStream<I> {
  input: I,
  pipeline: Arc<Pipeline>,
  frame_index: u64,
  finished: bool,
}

impl<I: Iterator<Item = RgbImage>> LiveStream<I> {
  pub fn new(input: I, pipeline: Arc<Pipeline>) -> Self {
    Self {
      input,
      pipeline,
      frame_index: 0,
      finished: false,
    }
  }

  fn finish(&mut self) -> Option<Vec<u8>> {
    self.finished = true;
    info!("实时分类流结束，共 {} 帧", self.frame_index);
    None
  }
}

impl<I: Iterator<Item = RgbImage>> Iterator for LiveStream<I> {
  type Item = Vec<u8>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let Some(frame) = self.input.next() else {
      return self.finish();
    };

    let annotated = match self.pipeline.process(&frame) {
      Ok((annotated, _summary)) => annotated,
      Err(e) => {
        error!("第 {} 帧处理失败: {}", self.frame_index, e);
        return self.finish();
      }
    };

    let jpeg = match annotated.to_jpeg() {
      Ok(jpeg) => jpeg,
      Err(e) => {
        error!("第 {} 帧编码失败: {}", self.frame_index, e);
        return self.finish();
      }
    };

    self.frame_index += 1;
    debug!("输出第 {} 帧, {} 字节", self.frame_index, jpeg.len());
    Some(multipart_part(&jpeg))
  }
}
