// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/main.rs - 服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fenlei::{
  model::load_detector,
  output::draw::Draw,
  pipeline::Pipeline,
  server::{AppState, router},
  settings::Settings,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("Fenlei 垃圾分拣服务");
  info!("模型: {}", args.model);
  info!("摄像头: {}", args.camera);
  info!("置信度阈值: {}", args.confidence);

  let settings = Settings::load_or_default(args.settings.as_deref());
  let table = Arc::new(settings.category_table());
  if settings.font.is_none() {
    warn!("配置中未指定字体，尝试使用系统字体");
  }

  let draw = Draw::with_font(settings.font.as_deref());
  let pipeline = match load_detector(&args.model, &draw) {
    Ok(detector) => {
      info!("模型加载完成");
      let pipeline = Pipeline::new(detector, table)
        .with_draw(draw)
        .with_confidence(args.confidence);
      Some(Arc::new(pipeline))
    }
    Err(e) => {
      error!("模型加载失败，服务以降级模式运行: {}", e);
      None
    }
  };

  std::fs::create_dir_all(&args.uploads)?;

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let state = AppState {
    pipeline,
    references: Arc::new(settings.references.clone()),
    upload_dir: Arc::new(args.uploads),
    camera: Some(args.camera),
    shutdown: shutdown_rx,
  };

  let listener = tokio::net::TcpListener::bind(args.bind).await?;
  info!("监听 http://{}", listener.local_addr()?);
  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await?;

  info!("服务已退出");
  Ok(())
}

/// 等待 Ctrl-C，并通知实时分类流结束，使未完成的响应得以关闭
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("无法监听中断信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到中断信号，准备退出...");
  shutdown.send_replace(true);
}
