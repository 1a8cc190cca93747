use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::report::{Summary, read_results};
use crate::review::{TaskReport, group};
use crate::score::Decision;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// clean 输出的结果文件
    pub path: PathBuf,
    /// 以 JSON 格式输出
    #[arg(long)]
    pub json: bool,
    /// 按任务聚合分析，将 rejected.json、accept.txt 和 reject.txt 写入该目录
    #[arg(long, value_name = "DIR")]
    pub report: Option<PathBuf>,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let records = read_results(&self.path)?;
        let summary = Summary::from_records(&records);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary.report())?);
        } else {
            print!("{}", summary);
        }

        let Some(dir) = &self.report else {
            return Ok(());
        };
        let items = group(records);
        let report = TaskReport::from_items(&items);
        info!(
            "共 {} 张图片: 接受 {}，拒绝 {}，待审 {}",
            items.len(),
            report.count(Decision::Accept),
            report.count(Decision::Reject),
            report.count(Decision::Review)
        );
        report.write(dir)?;
        info!(
            "{} 个任务含有被拒绝的图片，{} 个任务含有被接受的图片，报告已写入 {}",
            report.reject_tasks.len(),
            report.accept_tasks.len(),
            dir.display()
        );
        Ok(())
    }
}
