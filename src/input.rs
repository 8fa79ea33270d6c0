// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/input.rs - 视频/图像输入
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

//! 输入源通过 [`FromUrl`] 打开设备（获取资源），再作为迭代器逐帧产出图像。
//! 迭代器返回 `None` 表示输入结束（例如摄像头读取失败），资源在析构时释放。

use image::RgbImage;
use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_camera")]
mod v4l2_source;
#[cfg(feature = "v4l_camera")]
pub use self::v4l2_source::{V4l2Source, V4l2SourceError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_camera")]
  #[error("V4L2 input error: {0}")]
  V4l2SourceError(#[from] V4l2SourceError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_camera")]
  V4l2(V4l2Source),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_camera")]
    {
      if url.scheme() == V4l2Source::SCHEME {
        let input = V4l2Source::from_url(url)?;
        return Ok(InputWrapper::V4l2(input));
      }
    }
    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "v4l_camera")]
      InputWrapper::V4l2(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}
