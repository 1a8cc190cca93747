use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cleaner::{CleanConfig, RetryPolicy};
use crate::cli::*;
use crate::consistency::DEFAULT_K;
use crate::distance::Metric;
use crate::score::{Thresholds, Weights};
use crate::store::{HnswParams, IndexKind};

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "semclean", "semclean")
        .map(|dirs| dirs.config_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| ".semclean".to_string())
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

/// 打分与判定参数
#[derive(Parser, Debug, Clone)]
pub struct ScoreOptions {
    /// kNN 近邻数量
    #[arg(short, value_name = "K", default_value_t = DEFAULT_K)]
    pub k: usize,
    /// kNN 一致率 p 的权重
    #[arg(long, value_name = "W", default_value_t = 1.0)]
    pub w1: f32,
    /// 归一化最近同类距离的权重
    #[arg(long, value_name = "W", default_value_t = 0.5)]
    pub w2: f32,
    /// 归一化类均值距离的权重
    #[arg(long, value_name = "W", default_value_t = 0.5)]
    pub w3: f32,
    /// 分数不低于该值时接受
    #[arg(long, value_name = "SCORE", default_value_t = 0.4, allow_negative_numbers = true)]
    pub t_high: f32,
    /// 分数不高于该值时拒绝
    #[arg(long, value_name = "SCORE", default_value_t = -0.4, allow_negative_numbers = true)]
    pub t_low: f32,
}

/// 参考集索引参数
#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 距离度量
    #[arg(long, value_enum, default_value_t = Metric::L2)]
    pub metric: Metric,
    /// 索引类型
    #[arg(long, value_enum, default_value_t = IndexKind::Exact)]
    pub index: IndexKind,
    /// HNSW 每个节点的最大连接数
    #[arg(long, value_name = "N", default_value_t = 32)]
    pub max_connections: usize,
    /// HNSW 构建时的候选列表大小
    #[arg(long, value_name = "N", default_value_t = 200)]
    pub ef_construction: usize,
    /// HNSW 搜索时的候选列表大小
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub ef_search: usize,
    /// 从数据库加载参考集时每批读取的记录数量
    #[arg(long, value_name = "SIZE", default_value_t = 10000)]
    pub load_batch_size: usize,
}

impl IndexOptions {
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            max_connections: self.max_connections,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
        }
    }
}

/// 运行参数
#[derive(Parser, Debug, Clone)]
pub struct RunOptions {
    /// 同时处理的样本数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = num_cpus::get())]
    pub workers: usize,
    /// 同时进行的向量库查询数量
    #[arg(long, value_name = "N", default_value_t = num_cpus::get() * 2)]
    pub max_inflight: usize,
    /// 向量库暂时不可用时的最大重试次数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub retries: usize,
    /// 第一次重试前的等待时间，之后每次翻倍
    #[arg(long, value_name = "MS", default_value_t = 100)]
    pub retry_delay_ms: u64,
    /// 跳过输入中的前 N 个样本，用于中断后继续
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub offset: usize,
    /// 最多处理的样本数量
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

/// 由命令行参数构建运行配置
pub fn clean_config(score: &ScoreOptions, run: &RunOptions) -> CleanConfig {
    CleanConfig {
        k: score.k,
        weights: Weights { w1: score.w1, w2: score.w2, w3: score.w3 },
        thresholds: Thresholds { high: score.t_high, low: score.t_low },
        workers: run.workers,
        max_inflight: run.max_inflight,
        retry: RetryPolicy {
            retries: run.retries,
            base_delay: Duration::from_millis(run.retry_delay_ms),
        },
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "semclean", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// semclean 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 导入参考集嵌入到数据库
    Import(ImportCommand),
    /// 对目标数据集进行标签一致性校验
    Clean(CleanCommand),
    /// 列出参考集中的所有类别
    Categories(CategoriesCommand),
    /// 统计校验结果
    Stats(StatsCommand),
    /// 导出人工审核数据
    Review(ReviewCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("semclean.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_default_clean_config() {
        let opts = Opts::parse_from(["semclean", "-c", "/tmp/x", "clean", "in.json", "-o", "out.json"]);
        assert_eq!(opts.conf_dir.database(), PathBuf::from("/tmp/x/semclean.db"));
        let SubCommand::Clean(cmd) = opts.subcmd else { panic!("expect clean") };
        let config = clean_config(&cmd.score, &cmd.run);
        assert_eq!(config.k, DEFAULT_K);
        assert_eq!(config.weights, Weights::default());
        assert_eq!(config.thresholds, Thresholds::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_thresholds() {
        let opts = Opts::parse_from([
            "semclean", "clean", "in.json", "-o", "out.json", "--t-high", "0.1", "--t-low", "-1.5",
        ]);
        let SubCommand::Clean(cmd) = opts.subcmd else { panic!("expect clean") };
        assert_eq!(cmd.score.t_low, -1.5);
    }
}
