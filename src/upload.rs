// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/upload.rs - 上传文件的临时存储
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

const FALLBACK_NAME: &str = "upload";

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 清理客户端提供的文件名：去掉路径，只保留 ASCII 字母数字与 `._-`，空白折叠为 `_`
pub fn sanitize_filename(name: &str) -> String {
  let flattened: String = name
    .chars()
    .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
    .collect();

  let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
  let kept: String = joined
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    .collect();

  kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// 一次性使用的上传文件，析构时删除
///
/// 删除失败（文件被占用或已不存在）只记录日志。
#[derive(Debug)]
pub struct TempUpload {
  path: PathBuf,
}

impl TempUpload {
  /// 将上传内容写入 `directory`，文件名带随机前缀避免并发请求互相覆盖
  pub fn save(directory: &Path, filename: &str, content: &[u8]) -> Result<Self, UploadError> {
    let name = match sanitize_filename(filename) {
      name if name.is_empty() => FALLBACK_NAME.to_string(),
      name => name,
    };
    let path = directory.join(format!("{}-{}", uuid::Uuid::new_v4().simple(), name));

    std::fs::write(&path, content)?;
    debug!("保存上传文件: {}", path.display());
    Ok(Self { path })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for TempUpload {
  fn drop(&mut self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => debug!("删除上传文件: {}", self.path.display()),
      Err(e) => warn!(
        "无法删除 {}，可能被占用或已被删除: {}",
        self.path.display(),
        e
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_strips_paths_and_odd_characters() {
    assert_eq!(sanitize_filename("My cool photo.jpg"), "My_cool_photo.jpg");
    assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
    assert_eq!(sanitize_filename("C:\\Users\\bin.png"), "C_Users_bin.png");
    assert_eq!(sanitize_filename("垃圾.png"), "png");
    assert_eq!(sanitize_filename("..."), "");
  }

  #[test]
  fn upload_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let upload = TempUpload::save(dir.path(), "bottle.jpg", b"data").unwrap();
    let path = upload.path().to_path_buf();
    assert!(path.starts_with(dir.path()));
    assert!(path.file_name().unwrap().to_str().unwrap().ends_with("-bottle.jpg"));
    assert_eq!(std::fs::read(&path).unwrap(), b"data");

    drop(upload);
    assert!(!path.exists());
  }

  #[test]
  fn already_deleted_file_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let upload = TempUpload::save(dir.path(), "", b"data").unwrap();
    assert!(upload.path().to_str().unwrap().ends_with("-upload"));
    std::fs::remove_file(upload.path()).unwrap();
    drop(upload);
  }

  #[test]
  fn missing_directory_fails_to_save() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(TempUpload::save(&missing, "a.jpg", b"data").is_err());
  }
}
