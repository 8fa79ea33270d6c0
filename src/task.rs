// 该文件是 Fenlei （垃圾分拣） 项目的一部分。
// src/task.rs - 命令行任务
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{info, warn};

use crate::{category::CategorySummary, output::Render, pipeline::Pipeline};

pub trait Task<I, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, pipeline: &Pipeline, output: O) -> Result<Self::Output, Self::Error>;
}

/// 只处理输入的第一帧
pub struct OneShotTask;

impl<RE, I, O> Task<I, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  O: Render<Error = RE>,
{
  type Output = CategorySummary;
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &Pipeline,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始分类...");
    let now = Instant::now();
    let (annotated, summary) = pipeline.process(&frame)?;
    info!("分类完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&annotated, &summary)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(summary)
  }
}

/// 持续处理输入直到输入结束、达到帧数或收到中断信号，返回处理的帧数
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interrupt: Option<Arc<AtomicBool>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 使用外部的中断标志代替 Ctrl-C 处理器
  pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn install_ctrlc() -> anyhow::Result<Arc<AtomicBool>> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(interrupt)
  }
}

impl<RE, I, O> Task<I, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  O: Render<Error = RE>,
{
  type Output = usize;
  type Error = anyhow::Error;

  fn run_task(self, input: I, pipeline: &Pipeline, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let interrupt = match self.interrupt {
      Some(interrupt) => interrupt,
      None => Self::install_ctrlc()?,
    };

    let mut frame_index = 0;
    let mut now = Instant::now();
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 帧图像", frame_index);
      let (annotated, summary) = pipeline.process(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&annotated, &summary)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("分类完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupt.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(frame_index)
  }
}
