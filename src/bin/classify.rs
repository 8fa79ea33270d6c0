// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/bin/classify.rs - 单张图像分类
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use url::Url;

use fenlei::{
  FromUrl,
  input::InputWrapper,
  model::{DEFAULT_CONFIDENCE, load_detector},
  output::{OutputWrapper, draw::Draw},
  pipeline::Pipeline,
  settings::Settings,
  task::{OneShotTask, Task},
};
use tracing::info;

/// 对一张图像进行垃圾分类并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///tmp/bottle.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 image:///tmp/bottle.out.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 类别配置文件
  #[arg(long, value_name = "FILE")]
  pub settings: Option<PathBuf>,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let settings = Settings::load_or_default(args.settings.as_deref());
  let draw = Draw::with_font(settings.font.as_deref());
  let detector = load_detector(&args.model, &draw)?;
  let pipeline = Pipeline::new(detector, Arc::new(settings.category_table()))
    .with_draw(draw)
    .with_confidence(args.confidence);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let summary = OneShotTask.run_task(input, &pipeline, output)?;
  if summary.is_empty() {
    info!("未识别到已知类别的物体");
  }
  println!("{}", serde_json::to_string_pretty(&summary)?);

  Ok(())
}
