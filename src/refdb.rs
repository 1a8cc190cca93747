use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use indicatif::ProgressBar;
use log::{debug, info};
use tokio::task::spawn_blocking;

use crate::config::ConfDir;
use crate::db::{CategoryRow, Database, crud, open_database};
use crate::distance::Metric;
use crate::store::{EmbeddingRecord, ExactStore, HnswParams, HnswStore, IndexKind, ReferenceStore};

pub struct RefDBBuilder {
    conf_dir: ConfDir,
}

impl RefDBBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir }
    }

    pub async fn open(self) -> Result<RefDB> {
        let db = open_database(&self.conf_dir.database()).await?;
        Ok(RefDB { db })
    }
}

/// 一批导入的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl ImportStats {
    pub fn merge(&mut self, other: ImportStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

/// 参考集数据库
pub struct RefDB {
    db: Database,
}

impl RefDB {
    /// 在一个事务中导入一批嵌入记录
    ///
    /// 已存在的外部 ID 在 overwrite 为 true 时覆盖，否则跳过。
    /// 所有向量的维度必须与数据库中已有的维度一致
    pub async fn import(&self, records: &[EmbeddingRecord], overwrite: bool) -> Result<ImportStats> {
        let mut dim = crud::get_dim(&self.db).await?;
        let mut stats = ImportStats::default();
        let mut tx = self.db.begin().await?;

        for record in records {
            let expected = *dim.get_or_insert(record.vector.len());
            if record.vector.len() != expected {
                bail!("记录 {} 的向量维度为 {}，参考集维度为 {}", record.id, record.vector.len(), expected);
            }

            match crud::find_embedding_id(&mut *tx, &record.id).await? {
                Some(id) if overwrite => {
                    crud::update_embedding(&mut *tx, id, &record.path, &record.vector).await?;
                    crud::set_labels(&mut tx, id, &record.labels).await?;
                    stats.updated += 1;
                }
                Some(_) => {
                    debug!("跳过已存在的记录: {}", record.id);
                    stats.skipped += 1;
                }
                None => {
                    let id = crud::add_embedding(&mut *tx, &record.id, &record.path, &record.vector).await?;
                    crud::set_labels(&mut tx, id, &record.labels).await?;
                    stats.added += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    pub async fn len(&self) -> Result<u64> {
        Ok(crud::count_embeddings(&self.db).await?)
    }

    pub async fn dim(&self) -> Result<Option<usize>> {
        Ok(crud::get_dim(&self.db).await?)
    }

    pub async fn categories(&self) -> Result<Vec<CategoryRow>> {
        Ok(crud::get_categories(&self.db).await?)
    }

    /// 分批读取全部嵌入记录，每读出一条就交给 f 处理
    pub async fn for_each_record<F>(&self, batch_size: usize, pb: &ProgressBar, mut f: F) -> Result<()>
    where
        F: FnMut(EmbeddingRecord) -> Result<()>,
    {
        let total = self.len().await?;
        pb.set_length(total);
        info!("从数据库读取 {} 条参考记录", total);

        let mut after = 0;
        loop {
            let rows = crud::get_embeddings(&self.db, after, batch_size.max(1)).await?;
            let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
                break;
            };
            let mut labels = HashMap::<i64, Vec<String>>::new();
            for row in crud::get_labels(&self.db, first.id, last.id).await? {
                labels.entry(row.embedding_id).or_default().push(row.label);
            }
            after = last.id;

            for row in rows {
                f(EmbeddingRecord {
                    vector: bytemuck::pod_collect_to_vec(&row.vector),
                    labels: labels.remove(&row.id).unwrap_or_default(),
                    id: row.key,
                    path: row.path,
                })?;
                pb.inc(1);
            }
        }

        Ok(())
    }

    pub async fn records(&self, batch_size: usize, pb: &ProgressBar) -> Result<Vec<EmbeddingRecord>> {
        let mut records = vec![];
        self.for_each_record(batch_size, pb, |record| {
            records.push(record);
            Ok(())
        })
        .await?;
        Ok(records)
    }

    /// 将参考集加载为内存索引
    ///
    /// 记录逐批写入记录表，HNSW 图在记录表的基础上构建
    pub async fn load_store(
        &self,
        metric: Metric,
        index: IndexKind,
        params: HnswParams,
        batch_size: usize,
        pb: &ProgressBar,
    ) -> Result<Arc<dyn ReferenceStore>> {
        let dim = self.dim().await?.unwrap_or(0);
        let mut store = ExactStore::new(dim, metric);
        self.for_each_record(batch_size, pb, |record| Ok(store.insert(record)?)).await?;

        pb.set_message("构建索引");
        info!("构建 {:?} 索引，距离度量: {:?}", index, metric);
        Ok(match index {
            IndexKind::Exact => Arc::new(store),
            IndexKind::Hnsw => Arc::new(spawn_blocking(move || HnswStore::from_exact(store, params)).await?),
        })
    }
}
