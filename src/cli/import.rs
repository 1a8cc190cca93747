use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::cleaner::{ReadRange, parse_reference, task_read};
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::refdb::{ImportStats, RefDBBuilder};
use crate::utils::pb_style_speed;

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    /// 参考集文件，JSON 数组或 JSON Lines
    pub path: PathBuf,
    /// 每个事务导入的记录数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 1000)]
    pub batch_size: usize,
    /// 导入前对向量做 L2 归一化
    #[arg(long)]
    pub normalize: bool,
    /// 如果记录已存在，是否覆盖旧的记录
    #[arg(long)]
    pub overwrite: bool,
}

impl SubCommandExtend for ImportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = RefDBBuilder::new(opts.conf_dir.clone()).open().await?;
        let pb = ProgressBar::no_length().with_style(pb_style_speed());

        let (t, mut rx) = task_read(self.path.clone(), ReadRange::default(), self.batch_size);

        let batch_size = self.batch_size.max(1);
        let mut stats = ImportStats::default();
        let mut invalid = 0;
        let mut batch = Vec::with_capacity(batch_size);
        let mut buffer = Vec::with_capacity(batch_size);

        while rx.recv_many(&mut buffer, batch_size).await != 0 {
            for (index, item) in buffer.drain(..) {
                match item.map_err(crate::error::SampleError::malformed).and_then(|v| parse_reference(v, self.normalize)) {
                    Ok(record) => batch.push(record),
                    Err(e) => {
                        pb.suspend(|| warn!("跳过第 {} 条记录: {}", index + 1, e));
                        invalid += 1;
                    }
                }
            }
            if batch.len() >= batch_size {
                stats.merge(db.import(&batch, self.overwrite).await?);
                pb.inc(batch.len() as u64);
                batch.clear();
            }
        }
        if !batch.is_empty() {
            stats.merge(db.import(&batch, self.overwrite).await?);
            pb.inc(batch.len() as u64);
        }
        t.await??;

        pb.finish_with_message("导入完成");
        info!(
            "新增 {} 条，更新 {} 条，跳过 {} 条，无效 {} 条",
            stats.added, stats.updated, stats.skipped, invalid
        );
        info!("参考集共 {} 条记录", db.len().await?);

        Ok(())
    }
}
