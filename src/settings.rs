// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/settings.rs - 类别表与参考资料配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::category::{Category, CategoryTable};

const DEFAULT_SETTINGS: &str = include_str!("../assets/settings.toml");

#[derive(Error, Debug)]
pub enum SettingsError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryLists {
  #[serde(default)]
  pub recyclable: Vec<String>,
  #[serde(default)]
  pub non_recyclable: Vec<String>,
  #[serde(default)]
  pub hazardous: Vec<String>,
}

/// 一个类别的两个参考资料标识
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReferenceIds {
  #[serde(default)]
  pub video1: String,
  #[serde(default)]
  pub video2: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct References {
  #[serde(default)]
  pub recyclable: ReferenceIds,
  #[serde(default)]
  pub non_recyclable: ReferenceIds,
  #[serde(default)]
  pub hazardous: ReferenceIds,
}

impl References {
  pub fn get(&self, category: Category) -> &ReferenceIds {
    match category {
      Category::Recyclable => &self.recyclable,
      Category::NonRecyclable => &self.non_recyclable,
      Category::Hazardous => &self.hazardous,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  pub categories: CategoryLists,
  #[serde(default)]
  pub references: References,
  /// 叠加文本使用的字体文件
  #[serde(default)]
  pub font: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    toml::from_str(DEFAULT_SETTINGS).expect("内置配置文件格式错误")
  }
}

impl std::str::FromStr for Settings {
  type Err = SettingsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(toml::from_str(s)?)
  }
}

impl Settings {
  pub fn load(path: &Path) -> Result<Self, SettingsError> {
    info!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    content.parse()
  }

  /// 加载失败时记录错误并回退到内置配置
  pub fn load_or_default(path: Option<&Path>) -> Self {
    match path {
      Some(path) => Self::load(path).unwrap_or_else(|e| {
        error!("无法加载配置文件 {}: {}，使用内置配置", path.display(), e);
        Self::default()
      }),
      None => {
        info!("未指定配置文件，使用内置配置");
        Self::default()
      }
    }
  }

  pub fn category_table(&self) -> CategoryTable {
    CategoryTable::new(
      self.categories.recyclable.iter().cloned(),
      self.categories.non_recyclable.iter().cloned(),
      self.categories.hazardous.iter().cloned(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn builtin_settings_parse() {
    let settings = Settings::default();
    let table = settings.category_table();
    assert!(table.contains(Category::Recyclable, "plastic_bottle"));
    assert!(table.contains(Category::Hazardous, "battery"));
    assert!(table.overlaps().is_empty());
    assert_eq!(settings.references.get(Category::Hazardous), &ReferenceIds::default());
  }

  #[test]
  fn references_are_per_category() {
    let settings: Settings = r#"
      [categories]
      recyclable = ["can"]

      [references.recyclable]
      video1 = "a"
      video2 = "b"
    "#
    .parse()
    .unwrap();
    assert_eq!(settings.references.get(Category::Recyclable).video1, "a");
    assert_eq!(settings.references.get(Category::Recyclable).video2, "b");
    assert!(settings.categories.hazardous.is_empty());
    assert!(settings.font.is_none());
  }

  #[test]
  fn invalid_file_falls_back_to_default() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "categories = 3").unwrap();
    assert!(Settings::load(file.path()).is_err());

    let settings = Settings::load_or_default(Some(file.path()));
    assert!(!settings.categories.recyclable.is_empty());
  }

  #[test]
  fn missing_file_is_io_error() {
    let err = Settings::load(Path::new("/nonexistent/fenlei.toml")).unwrap_err();
    assert!(matches!(err, SettingsError::IoError(_)));
  }
}
