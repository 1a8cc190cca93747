use crate::error::SampleError;
use crate::score::MetricSet;
use crate::stats::ClassStatistics;
use crate::store::{ReferenceStore, StoreError};

/// 默认的 kNN 近邻数量
pub const DEFAULT_K: usize = 20;

/// 计算查询向量 x 相对于声明类别 y 的三项一致性指标
///
/// 1. 在整个参考集（不按标签过滤）中搜索 k 个最近邻，p 为其中带有标签 y 的比例
/// 2. 在类别 y 内搜索最近邻，距离除以 r_min(y) 得到 d_min_norm
/// 3. x 到类均值 μ_y 的距离除以 r_μ(y) 得到 d_mu_norm
pub fn compute_metrics<S: ReferenceStore + ?Sized>(
    store: &S,
    stats: &ClassStatistics,
    x: &[f32],
    k: usize,
) -> Result<MetricSet, SampleError> {
    check_query(store, x)?;
    let y = stats.category.as_str();

    let neighbors = store.nearest(x, k, None)?;
    if neighbors.is_empty() {
        return Err(StoreError::Empty.into());
    }
    // 参考集不足 k 条时以实际返回的数量为分母
    let same = neighbors.iter().filter(|n| n.has_label(y)).count();
    let p = same as f32 / neighbors.len() as f32;

    let nearest = store.nearest(x, 1, Some(y))?;
    let Some(nearest) = nearest.first() else {
        return Err(SampleError::UnknownCategory { category: y.to_owned(), members: 0 });
    };
    let d_min_norm = nearest.distance / stats.min_radius();

    let d_mu = store.metric().distance(x, &stats.mean);
    let d_mu_norm = d_mu / stats.mu_radius();

    // 有限但数值极大的向量会让 f32 距离溢出
    if !(d_min_norm.is_finite() && d_mu_norm.is_finite()) {
        return Err(SampleError::malformed("特征向量数值过大，距离溢出"));
    }
    Ok(MetricSet { p, d_min_norm, d_mu_norm })
}

fn check_query<S: ReferenceStore + ?Sized>(store: &S, x: &[f32]) -> Result<(), SampleError> {
    if x.is_empty() {
        return Err(SampleError::malformed("特征向量为空"));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(SampleError::malformed("特征向量包含非有限值"));
    }
    if store.is_empty() {
        return Err(StoreError::Empty.into());
    }
    if x.len() != store.dim() {
        return Err(SampleError::malformed(format!(
            "特征向量维度为 {}，参考集维度为 {}",
            x.len(),
            store.dim()
        )));
    }
    Ok(())
}
