mod exact;
mod hnsw;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use clap::ValueEnum;
pub use exact::*;
pub use hnsw::*;
use thiserror::Error;

use crate::distance::Metric;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("参考集为空")]
    Empty,
    #[error("向量维度不匹配: 期望 {expected}，实际 {actual}")]
    Dimension { expected: usize, actual: usize },
    /// 可以重试的错误，例如后端暂时不可达
    #[error("后端暂时不可用: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// 参考集中的一条嵌入记录
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// 外部 ID
    pub id: String,
    /// 所属类别，一条记录可以属于多个类别
    pub labels: Vec<String>,
    /// 特征向量
    pub vector: Vec<f32>,
    /// 原始图片路径
    pub path: String,
}

impl EmbeddingRecord {
    pub fn new(id: impl Into<String>, label: impl Into<String>, vector: Vec<f32>) -> Self {
        let id = id.into();
        Self { path: id.clone(), id, labels: vec![label.into()], vector }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub labels: Arc<[String]>,
    pub distance: f32,
}

impl Neighbor {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// 参考集的查询能力
///
/// 实现必须对所有查询使用同一种距离度量，可以是精确搜索也可以是近似搜索
pub trait ReferenceStore: Send + Sync {
    /// 向量维度
    fn dim(&self) -> usize;

    /// 记录总数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 使用的距离度量
    fn metric(&self) -> Metric;

    /// 搜索最近的 k 个邻居，结果按距离升序排列
    ///
    /// label 为 None 时在整个参考集中搜索，否则只在带有该标签的记录中搜索
    fn nearest(&self, x: &[f32], k: usize, label: Option<&str>) -> Result<Vec<Neighbor>, StoreError>;

    /// 按外部 ID 取出一条记录的向量
    fn vector(&self, id: &str) -> Result<Option<Vec<f32>>, StoreError>;

    /// 枚举某个类别的全部向量
    fn class_vectors(&self, label: &str) -> Result<Vec<Vec<f32>>, StoreError>;

    /// 所有类别及其成员数量，按类别名排序
    fn categories(&self) -> Result<Vec<(String, usize)>, StoreError>;
}

/// 参考集索引类型
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// 暴力搜索，结果精确
    #[default]
    Exact,
    /// HNSW 近似搜索，适合大规模参考集
    Hnsw,
}

/// 两种内存索引共用的记录表
///
/// 向量按行连续存放，标签到行号的映射用于按类别过滤和枚举
pub(crate) struct RecordTable {
    pub dim: usize,
    pub ids: Vec<String>,
    pub labels: Vec<Arc<[String]>>,
    pub vectors: Vec<f32>,
    pub by_label: BTreeMap<String, Vec<usize>>,
    pub by_id: HashMap<String, usize>,
}

impl RecordTable {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ids: vec![],
            labels: vec![],
            vectors: vec![],
            by_label: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn push(&mut self, record: EmbeddingRecord) -> Result<usize, StoreError> {
        if record.vector.len() != self.dim {
            return Err(StoreError::Dimension { expected: self.dim, actual: record.vector.len() });
        }
        if self.by_id.contains_key(&record.id) {
            return Err(StoreError::Backend(format!("重复的记录 ID: {}", record.id)));
        }
        let row = self.ids.len();
        self.by_id.insert(record.id.clone(), row);
        for label in &record.labels {
            self.by_label.entry(label.clone()).or_default().push(row);
        }
        self.ids.push(record.id);
        self.labels.push(record.labels.into());
        self.vectors.extend_from_slice(&record.vector);
        Ok(row)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = (usize, &[f32])> {
        self.vectors.chunks_exact(self.dim.max(1)).enumerate()
    }

    pub fn neighbor(&self, row: usize, distance: f32) -> Neighbor {
        Neighbor { id: self.ids[row].clone(), labels: self.labels[row].clone(), distance }
    }

    pub fn check_query(&self, x: &[f32]) -> Result<(), StoreError> {
        if self.ids.is_empty() {
            return Err(StoreError::Empty);
        }
        if x.len() != self.dim {
            return Err(StoreError::Dimension { expected: self.dim, actual: x.len() });
        }
        Ok(())
    }

    pub fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.by_id.get(id).map(|&i| self.row(i).to_vec())
    }

    pub fn class_vectors(&self, label: &str) -> Vec<Vec<f32>> {
        self.by_label
            .get(label)
            .map(|rows| rows.iter().map(|&i| self.row(i).to_vec()).collect())
            .unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<(String, usize)> {
        self.by_label.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }
}
