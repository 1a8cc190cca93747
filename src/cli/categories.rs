use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::refdb::RefDBBuilder;

#[derive(Parser, Debug, Clone)]
pub struct CategoriesCommand {
    /// 以 JSON 格式输出
    #[arg(long)]
    pub json: bool,
}

impl SubCommandExtend for CategoriesCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = RefDBBuilder::new(opts.conf_dir.clone()).open().await?;
        let categories = db.categories().await?;

        if self.json {
            let value = categories
                .iter()
                .map(|c| serde_json::json!({"category": c.label, "count": c.count, "usable": c.count >= 2}))
                .collect::<Vec<_>>();
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            for c in &categories {
                // 成员不足 2 个的类别无法计算统计量
                let flag = if c.count < 2 { "\t(成员不足)" } else { "" };
                println!("{}\t{}{}", c.label, c.count, flag);
            }
        }
        info!("共 {} 个类别，{} 条记录", categories.len(), db.len().await?);

        Ok(())
    }
}
