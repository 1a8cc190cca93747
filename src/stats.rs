use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;
use tokio::sync::OnceCell;

use crate::distance::{Metric, mean};
use crate::error::SampleError;
use crate::store::StoreError;

/// 归一化分母的下限，避免退化类别（所有成员相同）导致除零
pub const EPSILON: f32 = 1e-6;

/// 类别统计量，整个运行期间只计算一次，之后只读共享
#[derive(Debug, Clone, PartialEq)]
pub struct ClassStatistics {
    pub category: String,
    /// 参考集中该类别的成员数量
    pub count: usize,
    /// 类均值向量 μ
    pub mean: Vec<f32>,
    /// 成员到类均值的平均距离 r_μ
    pub r_mu: f32,
    /// 成员到最近同类成员的平均距离 r_min（留一法）
    pub r_min: f32,
}

impl ClassStatistics {
    /// 计算类别统计量
    ///
    /// 成员少于 2 个时返回 UnknownCategory；r_min 的计算复杂度为 O(n²)，使用 rayon 并行
    pub fn compute(
        category: &str,
        vectors: &[Vec<f32>],
        metric: Metric,
    ) -> Result<Self, SampleError> {
        let count = vectors.len();
        if count < 2 {
            return Err(SampleError::UnknownCategory { category: category.to_owned(), members: count });
        }

        let dim = vectors[0].len();
        if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
            return Err(StoreError::Dimension { expected: dim, actual: v.len() }.into());
        }

        let flat = vectors.concat();
        let x = Array2::from_shape_vec((count, dim), flat)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mean = mean(x.view()).ok_or_else(|| StoreError::Backend("空类别".to_owned()))?;

        let r_mu = vectors.iter().map(|v| metric.distance(v, &mean)).sum::<f32>() / count as f32;

        // 两个成员时，双方的留一最近邻都是对方，r_min 即两者距离
        let r_min = vectors
            .par_iter()
            .enumerate()
            .map(|(i, v)| {
                vectors
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, u)| metric.distance(v, u))
                    .fold(f32::INFINITY, f32::min)
            })
            .sum::<f32>()
            / count as f32;

        Ok(Self { category: category.to_owned(), count, mean, r_mu, r_min })
    }

    /// 带下限的 r_μ
    pub fn mu_radius(&self) -> f32 {
        floor(self.r_mu)
    }

    /// 带下限的 r_min
    pub fn min_radius(&self) -> f32 {
        floor(self.r_min)
    }
}

#[inline]
fn floor(v: f32) -> f32 {
    if v.is_finite() && v > EPSILON { v } else { EPSILON }
}

type Outcome = Result<Arc<ClassStatistics>, SampleError>;

/// 类别统计量缓存
///
/// 每个类别对应一个异步 OnceCell，保证同一类别同时只有一个任务在计算，其余任务等待结果。
/// 计算成功和 UnknownCategory 都会被缓存，瞬时的向量库错误不缓存，下次访问时重新计算
#[derive(Default)]
pub struct StatsCache {
    cells: RwLock<HashMap<String, Arc<OnceCell<Outcome>>>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, category: &str) -> Arc<OnceCell<Outcome>> {
        if let Some(cell) = self.cells.read().expect("stats cache poisoned").get(category) {
            return cell.clone();
        }
        self.cells
            .write()
            .expect("stats cache poisoned")
            .entry(category.to_owned())
            .or_default()
            .clone()
    }

    /// 获取类别统计量，首次访问时调用 init 计算
    pub async fn get_or_compute<F, Fut>(&self, category: &str, init: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClassStatistics, SampleError>>,
    {
        let cell = self.cell(category);
        let outcome = cell
            .get_or_try_init(|| async {
                debug!("计算类别统计量: {}", category);
                match init().await {
                    Ok(stats) => Ok(Ok(Arc::new(stats))),
                    Err(e @ SampleError::UnknownCategory { .. }) => Ok(Err(e)),
                    Err(e) => Err(e),
                }
            })
            .await?;
        outcome.clone()
    }

    /// 已缓存的类别数量
    pub fn cached(&self) -> usize {
        self.cells.read().expect("stats cache poisoned").values().filter(|c| c.initialized()).count()
    }
}
