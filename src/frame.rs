// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/frame.rs - 工作分辨率帧与标注帧定义
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

use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType};

/// 工作分辨率：宽 640，高为 640 * 9 / 16
pub const WORK_WIDTH: u32 = 640;
pub const WORK_HEIGHT: u32 = WORK_WIDTH * 9 / 16;

const JPEG_QUALITY: u8 = 90;

/// 缩放到工作分辨率，已经是工作分辨率的图像原样复制
pub fn resize_to_working(image: &RgbImage) -> RgbImage {
  if image.dimensions() == (WORK_WIDTH, WORK_HEIGHT) {
    return image.clone();
  }
  image::imageops::resize(image, WORK_WIDTH, WORK_HEIGHT, FilterType::Triangle)
}

/// 标注后的帧
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  /// 叠加了检测框、标签与分类摘要的图像
  pub image: RgbImage,
  /// 每个检测框上方的标签文本，顺序与检测结果一致
  pub box_labels: Vec<String>,
  /// 左上角的分类摘要文本，自上而下
  pub overlay: Vec<String>,
}

impl AnnotatedFrame {
  pub fn to_jpeg(&self) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(&self.image)?;
    Ok(buffer)
  }
}
