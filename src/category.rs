// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/category.rs - 垃圾类别表与分类摘要
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

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

/// 垃圾类别，顺序即摘要中的显示顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
  Recyclable,
  NonRecyclable,
  Hazardous,
}

impl Category {
  pub const ALL: [Category; 3] = [
    Category::Recyclable,
    Category::NonRecyclable,
    Category::Hazardous,
  ];

  pub fn display_name(&self) -> &'static str {
    match self {
      Category::Recyclable => "Recyclable",
      Category::NonRecyclable => "Non-Recyclable",
      Category::Hazardous => "Hazardous",
    }
  }
}

impl std::fmt::Display for Category {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.display_name())
  }
}

/// 显示用的物品名称：下划线替换为空格
pub fn display_item_name(name: &str) -> String {
  name.replace('_', " ")
}

/// 静态类别表
///
/// 三个集合之间允许重叠；重叠的标签在加载时给出警告，
/// 分类时会同时出现在所有包含它的类别中。
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
  recyclable: BTreeSet<String>,
  non_recyclable: BTreeSet<String>,
  hazardous: BTreeSet<String>,
}

impl CategoryTable {
  pub fn new<R, N, H>(recyclable: R, non_recyclable: N, hazardous: H) -> Self
  where
    R: IntoIterator,
    R::Item: Into<String>,
    N: IntoIterator,
    N::Item: Into<String>,
    H: IntoIterator,
    H::Item: Into<String>,
  {
    let table = Self {
      recyclable: recyclable.into_iter().map(Into::into).collect(),
      non_recyclable: non_recyclable.into_iter().map(Into::into).collect(),
      hazardous: hazardous.into_iter().map(Into::into).collect(),
    };

    for (label, categories) in table.overlaps() {
      let names: Vec<&str> = categories.iter().map(Category::display_name).collect();
      warn!("标签 {} 同时属于多个类别: {}", label, names.join(", "));
    }

    table
  }

  pub fn items(&self, category: Category) -> &BTreeSet<String> {
    match category {
      Category::Recyclable => &self.recyclable,
      Category::NonRecyclable => &self.non_recyclable,
      Category::Hazardous => &self.hazardous,
    }
  }

  pub fn contains(&self, category: Category, label: &str) -> bool {
    self.items(category).contains(label)
  }

  /// 列出属于多个类别的标签
  pub fn overlaps(&self) -> Vec<(String, Vec<Category>)> {
    let all: BTreeSet<&String> = Category::ALL
      .iter()
      .flat_map(|category| self.items(*category).iter())
      .collect();

    all
      .into_iter()
      .filter_map(|label| {
        let categories: Vec<Category> = Category::ALL
          .into_iter()
          .filter(|category| self.contains(*category, label))
          .collect();
        (categories.len() > 1).then(|| (label.clone(), categories))
      })
      .collect()
  }

  /// 将检测到的标签与三个类别集合分别求交
  pub fn classify<'a, I>(&self, labels: I) -> CategorySummary
  where
    I: IntoIterator<Item = &'a str>,
  {
    let detected: BTreeSet<&str> = labels.into_iter().collect();
    let pick = |category: Category| -> BTreeSet<String> {
      detected
        .iter()
        .filter(|label| self.contains(category, label))
        .map(|label| label.to_string())
        .collect()
    };

    CategorySummary {
      recyclable_items: pick(Category::Recyclable),
      non_recyclable_items: pick(Category::NonRecyclable),
      hazardous_items: pick(Category::Hazardous),
    }
  }
}

/// 单张图像的分类摘要
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
  pub recyclable_items: BTreeSet<String>,
  pub non_recyclable_items: BTreeSet<String>,
  pub hazardous_items: BTreeSet<String>,
}

impl CategorySummary {
  pub fn items(&self, category: Category) -> &BTreeSet<String> {
    match category {
      Category::Recyclable => &self.recyclable_items,
      Category::NonRecyclable => &self.non_recyclable_items,
      Category::Hazardous => &self.hazardous_items,
    }
  }

  pub fn is_empty(&self) -> bool {
    Category::ALL.iter().all(|category| self.items(*category).is_empty())
  }

  /// 第一个非空类别
  pub fn predicted(&self) -> Option<Category> {
    Category::ALL
      .into_iter()
      .find(|category| !self.items(*category).is_empty())
  }

  /// 叠加在图像左上角的文本行，空类别不产生文本
  pub fn overlay_lines(&self) -> Vec<String> {
    Category::ALL
      .into_iter()
      .filter_map(|category| {
        let items = self.items(category);
        if items.is_empty() {
          return None;
        }
        let names: Vec<String> = items.iter().map(|item| display_item_name(item)).collect();
        Some(format!("{}: {}", category.display_name(), names.join(", ")))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> CategoryTable {
    CategoryTable::new(
      ["glass_bottle", "plastic_bottle", "can"],
      ["plastic_bag", "straw"],
      ["battery", "light_bulb"],
    )
  }

  #[test]
  fn classify_intersects_each_table() {
    let summary = table().classify(["glass_bottle", "battery", "glass_bottle", "person"]);
    assert_eq!(summary.recyclable_items, BTreeSet::from(["glass_bottle".to_string()]));
    assert!(summary.non_recyclable_items.is_empty());
    assert_eq!(summary.hazardous_items, BTreeSet::from(["battery".to_string()]));
  }

  #[test]
  fn unknown_labels_are_dropped() {
    let summary = table().classify(["person", "dog"]);
    assert!(summary.is_empty());
    assert_eq!(summary.predicted(), None);
    assert!(summary.overlay_lines().is_empty());
  }

  #[test]
  fn overlay_lines_keep_category_order_and_skip_empty() {
    let summary = table().classify(["battery", "plastic_bottle", "can"]);
    assert_eq!(
      summary.overlay_lines(),
      vec![
        "Recyclable: can, plastic bottle".to_string(),
        "Hazardous: battery".to_string(),
      ]
    );
    assert_eq!(summary.predicted(), Some(Category::Recyclable));
  }

  #[test]
  fn lookup_uses_underscored_form() {
    let summary = table().classify(["plastic bottle"]);
    assert!(summary.is_empty());
  }

  #[test]
  fn overlapping_label_appears_in_every_category() {
    let table = CategoryTable::new(["spray_can"], Vec::<String>::new(), ["spray_can", "battery"]);
    assert_eq!(
      table.overlaps(),
      vec![(
        "spray_can".to_string(),
        vec![Category::Recyclable, Category::Hazardous]
      )]
    );

    let summary = table.classify(["spray_can"]);
    assert!(summary.recyclable_items.contains("spray_can"));
    assert!(summary.hazardous_items.contains("spray_can"));
    assert_eq!(summary.overlay_lines().len(), 2);
  }

  #[test]
  fn disjoint_tables_give_disjoint_subsets() {
    let summary = table().classify(["glass_bottle", "straw", "battery", "can"]);
    for a in Category::ALL {
      for b in Category::ALL {
        if a != b {
          assert!(summary.items(a).is_disjoint(summary.items(b)));
        }
      }
    }
  }
}
