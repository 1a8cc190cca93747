use hnsw_rs::filter::FilterT;
use hnsw_rs::prelude::*;
use rayon::prelude::*;

use super::*;
use crate::distance::knn;

struct DistMetric(Metric);

impl Distance<f32> for DistMetric {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        self.0.distance(va, vb)
    }
}

/// HNSW 构建与搜索参数
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// 每个节点的最大连接数
    pub max_connections: usize,
    /// 构建时的候选列表大小
    pub ef_construction: usize,
    /// 搜索时的候选列表大小，实际使用 max(ef_search, k)
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self { max_connections: 32, ef_construction: 200, ef_search: 64 }
    }
}

/// 基于 HNSW 的近似参考集
///
/// 按类别过滤的搜索在图上带过滤条件进行，如果近似搜索没有返回结果，则退化为在该类别内暴力搜索
pub struct HnswStore {
    table: RecordTable,
    hnsw: Hnsw<'static, f32, DistMetric>,
    metric: Metric,
    params: HnswParams,
}

impl HnswStore {
    pub fn build(
        records: impl IntoIterator<Item = EmbeddingRecord>,
        metric: Metric,
        params: HnswParams,
    ) -> Result<Self, StoreError> {
        let mut records = records.into_iter().peekable();
        let dim = records.peek().map(|r| r.vector.len()).unwrap_or(0);
        let mut table = RecordTable::new(dim);
        for record in records {
            table.push(record)?;
        }
        Ok(Self::index(table, metric, params))
    }

    /// 在已经加载好的精确参考集上构建 HNSW 图，记录表直接复用
    pub fn from_exact(store: ExactStore, params: HnswParams) -> Self {
        Self::index(store.table, store.metric, params)
    }

    fn index(table: RecordTable, metric: Metric, params: HnswParams) -> Self {
        let n = table.len().max(1);
        let nb_layer = 16.min((n as f32).ln().trunc().max(1.0) as usize);
        let hnsw = Hnsw::<f32, _>::new(
            params.max_connections,
            n,
            nb_layer,
            params.ef_construction,
            DistMetric(metric),
        );
        table.rows().collect::<Vec<_>>().par_iter().for_each(|&(i, v)| {
            hnsw.insert_slice((v, i));
        });

        Self { table, hnsw, metric, params }
    }

    fn ef(&self, k: usize) -> usize {
        self.params.ef_search.max(k)
    }

    /// 过滤后的图搜索找不到足够的邻居时，在类别内暴力搜索
    fn exact_in_class(&self, x: &[f32], rows: &[usize], k: usize) -> Vec<Neighbor> {
        let rows = rows.iter().map(|&i| (i, self.table.row(i)));
        knn(x, rows, k, self.metric, |_| true)
            .into_iter()
            .map(|(i, d)| self.table.neighbor(i, d))
            .collect()
    }
}

impl ReferenceStore for HnswStore {
    fn dim(&self) -> usize {
        self.table.dim
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn nearest(&self, x: &[f32], k: usize, label: Option<&str>) -> Result<Vec<Neighbor>, StoreError> {
        self.table.check_query(x)?;
        let k = k.min(self.table.len());
        if k == 0 {
            return Ok(vec![]);
        }
        let found = match label {
            None => self.hnsw.search(x, k, self.ef(k)),
            Some(label) => {
                let Some(rows) = self.table.by_label.get(label) else {
                    return Ok(vec![]);
                };
                // rows 按插入顺序递增，满足 Vec<usize> 过滤器要求的有序性
                let found = self.hnsw.search_filter(x, k, self.ef(k), Some(rows as &dyn FilterT));
                if found.len() < k.min(rows.len()) {
                    return Ok(self.exact_in_class(x, rows, k));
                }
                found
            }
        };
        let mut result =
            found.into_iter().map(|n| self.table.neighbor(n.d_id, n.distance)).collect::<Vec<_>>();
        result.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(result)
    }

    fn vector(&self, id: &str) -> Result<Option<Vec<f32>>, StoreError> {
        Ok(self.table.vector(id))
    }

    fn class_vectors(&self, label: &str) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(self.table.class_vectors(label))
    }

    fn categories(&self) -> Result<Vec<(String, usize)>, StoreError> {
        Ok(self.table.categories())
    }
}
