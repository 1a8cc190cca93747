use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::cleaner::{Cleaner, ReadRange, into_stream, task_read};
use crate::cli::SubCommandExtend;
use crate::config::{IndexOptions, Opts, RunOptions, ScoreOptions, clean_config};
use crate::metrics;
use crate::refdb::RefDBBuilder;
use crate::report::{OutputFormat, Progress, ResultWriter};
use crate::utils::{pb_style, pb_style_speed};

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    #[command(flatten)]
    pub score: ScoreOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub run: RunOptions,
    /// 目标数据集，JSON 数组或 JSON Lines
    pub input: PathBuf,
    /// 结果输出文件
    #[arg(short, long)]
    pub output: PathBuf,
    /// 结果文件格式，默认根据扩展名判断
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    /// 将统计结果写入 JSON 文件
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,
    /// 运行结束后将 prometheus 指标写入文件
    #[arg(long, value_name = "FILE")]
    pub metrics: Option<PathBuf>,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 在读取任何样本之前校验配置
        let config = clean_config(&self.score, &self.run);
        config.validate()?;

        let db = RefDBBuilder::new(opts.conf_dir.clone()).open().await?;
        if db.len().await? == 0 {
            warn!("参考集为空，所有样本都将记为查询失败，请先使用 import 导入参考数据");
        }

        let pb = ProgressBar::no_length().with_style(pb_style());
        let store = db
            .load_store(
                self.index.metric,
                self.index.index,
                self.index.hnsw_params(),
                self.index.load_batch_size,
                &pb,
            )
            .await?;
        pb.finish_with_message("参考集加载完成");
        info!("参考集: {} 条记录，维度 {}", store.len(), store.dim());

        let cleaner = Cleaner::new(store, config)?;

        let stop = Arc::new(AtomicBool::new(false));
        tokio::spawn({
            let stop = stop.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("收到中断信号，等待正在处理的样本完成");
                    stop.store(true, Ordering::SeqCst);
                }
            }
        });

        let range = ReadRange { offset: self.run.offset, limit: self.run.limit };
        let (t, rx) = task_read(self.input.clone(), range, self.run.workers * 2);

        let format = self.format.unwrap_or_else(|| OutputFormat::from_path(&self.output));
        let mut writer = ResultWriter::create(&self.output, format)?;
        let progress = Progress::new(ProgressBar::no_length().with_style(pb_style_speed()));

        let outcome = cleaner.run(into_stream(rx), &mut writer, &progress, &stop).await;
        // 无论是否出错都写入结尾，保证输出文件是合法的 JSON
        writer.finish()?;
        let outcome = outcome?;

        if !outcome.cancelled {
            t.await??;
        }
        progress.finish(if outcome.cancelled { "已中断" } else { "处理完成" });

        for line in outcome.summary.to_string().lines() {
            info!("{}", line);
        }
        if let Some(path) = &self.summary {
            outcome.summary.write_json(path)?;
            info!("统计结果已写入 {}", path.display());
        }
        if let Some(path) = &self.metrics {
            std::fs::write(path, metrics::dump()?)?;
        }
        info!("结果已写入 {}", self.output.display());

        Ok(())
    }
}
