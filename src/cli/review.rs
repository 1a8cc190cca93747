use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::report::read_results;
use crate::review::group;
use crate::score::Decision;

#[derive(Parser, Debug, Clone)]
pub struct ReviewCommand {
    /// clean 输出的结果文件
    pub path: PathBuf,
    /// 审核数据输出文件
    #[arg(short, long)]
    pub output: PathBuf,
    /// 只保留整体判定为待审的图片
    #[arg(long)]
    pub only_review: bool,
}

impl SubCommandExtend for ReviewCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let mut items = group(read_results(&self.path)?);
        let total = items.len();
        if self.only_review {
            items.retain(|item| item.decision == Decision::Review);
        }

        let mut writer = BufWriter::new(File::create(&self.output)?);
        serde_json::to_writer_pretty(&mut writer, &items)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        info!("共 {} 张图片，导出 {} 张到 {}", total, items.len(), self.output.display());
        Ok(())
    }
}
