use thiserror::Error;

use crate::store::StoreError;

/// 单个样本（或样本的某个类别）上的错误，只影响对应的输出记录，不会中断整个批次
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    /// 输入数据缺失或无效，例如缺少特征向量、类别或向量维度不一致
    #[error("样本格式错误: {0}")]
    Malformed(String),

    /// 类别不存在于参考集中，或成员不足 2 个无法计算统计量
    #[error("未知类别 {category}: 参考集中只有 {members} 个成员")]
    UnknownCategory { category: String, members: usize },

    /// 向量库查询失败，瞬时错误在重试耗尽后才会出现在这里
    #[error("向量库查询失败: {0}")]
    StoreQuery(#[from] StoreError),
}

impl SampleError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreQuery(e) if e.is_transient())
    }
}

/// 运行级配置错误，会在处理任何样本之前终止运行
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("近邻数量 k 必须大于 0")]
    ZeroNeighbors,

    #[error("权重 {name} 无效: {value}，必须是非负的有限数")]
    InvalidWeight { name: &'static str, value: f32 },

    #[error("阈值无效: T_high = {high}, T_low = {low}，要求 T_low < T_high 且均为有限数")]
    InvalidThresholds { high: f32, low: f32 },

    #[error("{name} 必须大于 0")]
    ZeroConcurrency { name: &'static str },
}
