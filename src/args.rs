// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

use fenlei::model::DEFAULT_CONFIDENCE;

/// Fenlei 垃圾分拣服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:5000", value_name = "ADDR")]
  pub bind: SocketAddr,

  /// 检测模型，例如 yolo:///models/waste.onnx?labels=/models/waste.toml
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 类别配置文件，未指定时使用内置配置
  #[arg(long, value_name = "FILE")]
  pub settings: Option<PathBuf>,

  /// 上传文件的临时目录
  #[arg(long, default_value = "uploads", value_name = "DIR")]
  pub uploads: PathBuf,

  /// 实时视频使用的摄像头
  #[arg(long, default_value = "v4l:///dev/video0", value_name = "SOURCE")]
  pub camera: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,
}
