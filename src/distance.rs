use std::cmp::Ordering;
use std::collections::BinaryHeap;

use clap::ValueEnum;
use ndarray::{ArrayView1, ArrayView2, Axis};

/// 向量距离度量，同一次运行中必须保持一致
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// 欧氏距离
    #[default]
    L2,
    /// 余弦距离，即 1 - cos
    Cosine,
}

impl Metric {
    #[inline(always)]
    pub fn distance(&self, va: &[f32], vb: &[f32]) -> f32 {
        match self {
            Self::L2 => l2(va, vb),
            Self::Cosine => cosine(va, vb),
        }
    }
}

#[inline(always)]
pub fn l2(va: &[f32], vb: &[f32]) -> f32 {
    debug_assert_eq!(va.len(), vb.len());
    va.iter().zip(vb).map(|(a, b)| (a - b) * (a - b)).sum::<f32>().sqrt()
}

#[inline(always)]
pub fn cosine(va: &[f32], vb: &[f32]) -> f32 {
    debug_assert_eq!(va.len(), vb.len());
    let (va, vb) = (ArrayView1::from(va), ArrayView1::from(vb));
    let denom = va.dot(&va).sqrt() * vb.dot(&vb).sqrt();
    if denom <= f32::EPSILON {
        // 零向量与任何向量都视为完全不相似
        return 1.0;
    }
    (1.0 - va.dot(&vb) / denom).max(0.0)
}

/// 原地做 L2 归一化，零向量保持不变
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// 计算一组向量的算术平均，返回 None 表示输入为空
pub fn mean(x: ArrayView2<f32>) -> Option<Vec<f32>> {
    x.mean_axis(Axis(0)).map(|m| m.to_vec())
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // 距离相同时按下标排序，保证结果稳定
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.index.cmp(&other.index))
    }
}

/// 在 vb 中为 va 搜索最近的 k 个向量，返回按距离升序排列的 (下标, 距离)
///
/// 参数：
/// - va: 查询向量
/// - vb: 被搜索的向量集合
/// - k: 返回的最近邻居数量
/// - filter: 只考虑返回 true 的下标
pub fn knn<'a, I, F>(va: &[f32], vb: I, k: usize, metric: Metric, filter: F) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = (usize, &'a [f32])>,
    F: Fn(usize) -> bool,
{
    if k == 0 {
        return vec![];
    }
    // 维护一个大小为 k 的最大堆，堆顶是当前最远的候选
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (index, v) in vb {
        if !filter(index) {
            continue;
        }
        let distance = metric.distance(va, v);
        if heap.len() < k {
            heap.push(Candidate { index, distance });
        } else if let Some(top) = heap.peek() {
            if (Candidate { index, distance }) < *top {
                heap.pop();
                heap.push(Candidate { index, distance });
            }
        }
    }
    heap.into_sorted_vec().into_iter().map(|c| (c.index, c.distance)).collect()
}
