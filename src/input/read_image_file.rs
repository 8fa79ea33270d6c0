// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use crate::{FromUrl, FromUrlWithScheme, url_file_path};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;
use url::Url;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像输入，产出一帧后结束
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(&url_file_path(url))
  }
}

impl ImageFileInput {
  /// 读取并解码图像文件，格式由文件内容判断
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(Self::from(image.to_rgb8()))
  }
}

impl From<RgbImage> for ImageFileInput {
  fn from(image: RgbImage) -> Self {
    ImageFileInput { image: Some(image) }
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn yields_exactly_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    // 扩展名与内容不符时依然按内容解码
    let path = dir.path().join("upload.bin");
    RgbImage::from_pixel(5, 3, Rgb([7, 8, 9]))
      .save_with_format(&path, image::ImageFormat::Png)
      .unwrap();

    let mut input = ImageFileInput::open(&path).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.dimensions(), (5, 3));
    assert_eq!(*frame.get_pixel(0, 0), Rgb([7, 8, 9]));
    assert!(input.next().is_none());
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///nonexistent/photo.jpg").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }

  #[test]
  fn garbage_is_image_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"definitely not an image").unwrap();
    assert!(ImageFileInput::open(&path).is_err());
  }
}
