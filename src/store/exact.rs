use super::*;
use crate::distance::knn;

/// 暴力搜索的内存参考集，所有查询结果都是精确的
pub struct ExactStore {
    pub(super) table: RecordTable,
    pub(super) metric: Metric,
}

impl ExactStore {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self { table: RecordTable::new(dim), metric }
    }

    /// 从一组记录构建，维度取第一条记录的维度
    pub fn from_records(
        records: impl IntoIterator<Item = EmbeddingRecord>,
        metric: Metric,
    ) -> Result<Self, StoreError> {
        let mut records = records.into_iter().peekable();
        let dim = records.peek().map(|r| r.vector.len()).unwrap_or(0);
        let mut store = Self::new(dim, metric);
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, record: EmbeddingRecord) -> Result<(), StoreError> {
        self.table.push(record).map(|_| ())
    }
}

impl ReferenceStore for ExactStore {
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
        let result = match label {
            None => knn(x, self.table.rows(), k, self.metric, |_| true),
            Some(label) => {
                let Some(rows) = self.table.by_label.get(label) else {
                    return Ok(vec![]);
                };
                let rows = rows.iter().map(|&i| (i, self.table.row(i)));
                knn(x, rows, k, self.metric, |_| true)
            }
        };
        Ok(result.into_iter().map(|(i, d)| self.table.neighbor(i, d)).collect())
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
