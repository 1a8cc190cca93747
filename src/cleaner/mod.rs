use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::{Stream, StreamExt, future};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;

mod tasks;
mod types;

pub use tasks::*;
pub use types::*;

use crate::consistency::{DEFAULT_K, compute_metrics};
use crate::error::{ConfigError, SampleError};
use crate::metrics;
use crate::report::{Progress, ResultWriter, Summary};
use crate::score::{Decision, MetricSet, Thresholds, Weights, evaluate};
use crate::stats::{ClassStatistics, StatsCache};
use crate::store::{ReferenceStore, StoreError};

/// 瞬时错误的重试策略，第 n 次重试前等待 base_delay * 2^(n-1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 3, base_delay: Duration::from_millis(100) }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// 一次运行的全部参数，校验后在整个运行期间只读
#[derive(Debug, Clone, PartialEq)]
pub struct CleanConfig {
    /// kNN 近邻数量
    pub k: usize,
    pub weights: Weights,
    pub thresholds: Thresholds,
    /// 同时处理的样本数量
    pub workers: usize,
    /// 同时进行的向量库查询数量
    pub max_inflight: usize,
    pub retry: RetryPolicy,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            weights: Weights::default(),
            thresholds: Thresholds::default(),
            workers: num_cpus::get(),
            max_inflight: num_cpus::get() * 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl CleanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::ZeroNeighbors);
        }
        self.weights.validate()?;
        self.thresholds.validate()?;
        if self.workers == 0 {
            return Err(ConfigError::ZeroConcurrency { name: "workers" });
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::ZeroConcurrency { name: "max_inflight" });
        }
        Ok(())
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub summary: Summary,
    /// 已处理的样本数量
    pub samples: usize,
    /// 下一个待处理样本在输入中的位置，用于 --offset 续跑
    pub next_offset: Option<usize>,
    pub cancelled: bool,
}

/// 标签一致性校验器
///
/// 持有参考集、运行配置和类别统计量缓存，可以在多个任务之间共享
pub struct Cleaner {
    store: Arc<dyn ReferenceStore>,
    config: Arc<CleanConfig>,
    cache: Arc<StatsCache>,
    limiter: Arc<Semaphore>,
}

impl Cleaner {
    pub fn new(store: Arc<dyn ReferenceStore>, config: CleanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(Semaphore::new(config.max_inflight));
        Ok(Self { store, config: Arc::new(config), cache: Arc::new(StatsCache::new()), limiter })
    }

    pub fn config(&self) -> &CleanConfig {
        &self.config
    }

    /// 获取类别统计量，每个类别只计算一次
    pub async fn class_stats(&self, category: &str) -> Result<Arc<ClassStatistics>, SampleError> {
        self.cache
            .get_or_compute(category, || {
                let category = category.to_owned();
                self.query("stats", move |store| {
                    let vectors = store.class_vectors(&category)?;
                    ClassStatistics::compute(&category, &vectors, store.metric())
                })
            })
            .await
    }

    /// 对单个 (向量, 类别) 打分
    pub async fn score(
        &self,
        category: &str,
        x: Arc<[f32]>,
    ) -> Result<(f32, Decision, MetricSet), SampleError> {
        // 空参考集上没有类别统计量可言，直接按查询失败处理
        if self.store.is_empty() {
            return Err(StoreError::Empty.into());
        }
        let stats = self.class_stats(category).await?;
        let k = self.config.k;
        let m = self.query("metrics", move |store| compute_metrics(store, &stats, &x, k)).await?;
        let (score, decision) = evaluate(&m, &self.config.weights, &self.config.thresholds);
        if !score.is_finite() {
            return Err(SampleError::malformed(format!("置信度分数溢出: {}", score)));
        }
        Ok((score, decision, m))
    }

    /// 对一个样本的所有声明类别打分，每个类别输出一条记录，顺序与声明顺序一致
    pub async fn score_sample(&self, value: Value) -> Vec<ScoreRecord> {
        let sample = match QuerySample::parse(value) {
            Ok(sample) => sample,
            Err(rejected) => {
                debug!("样本 {:?} 无效: {}", rejected.image_id, rejected.error);
                return vec![rejected.into()];
            }
        };
        let sample = &sample;
        future::join_all(sample.declarations.iter().map(|d| async move {
            let result = match self.resolve(&d.vector).await {
                Ok(x) => self.score(&d.category, x).await,
                Err(e) => Err(e),
            };
            match result {
                Ok((score, decision, m)) => ScoreRecord::scored(sample, &d.category, score, decision, m),
                Err(e) => {
                    debug!("样本 {} 类别 {} 出错: {}", sample.image_id, d.category, e);
                    ScoreRecord::errored(&sample.image_id, &sample.image_path, Some(&d.category), &e)
                }
            }
        }))
        .await
    }

    async fn resolve(
        &self,
        source: &Result<VectorSource, SampleError>,
    ) -> Result<Arc<[f32]>, SampleError> {
        match source {
            Ok(VectorSource::Inline(v)) => Ok(v.clone()),
            Ok(VectorSource::Reference(id)) => {
                let id = id.clone();
                self.query("resolve", move |store| {
                    store
                        .vector(&id)?
                        .map(Arc::from)
                        .ok_or_else(|| SampleError::malformed(format!("参考集中不存在嵌入 {}", id)))
                })
                .await
            }
            Err(e) => Err(e.clone()),
        }
    }

    /// 在阻塞线程池中执行向量库查询，并发数受信号量限制，瞬时错误按策略重试
    async fn query<T, F>(&self, op: &'static str, f: F) -> Result<T, SampleError>
    where
        T: Send + 'static,
        F: Fn(&dyn ReferenceStore) -> Result<T, SampleError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let permit = self
                .limiter
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let store = self.store.clone();
            let f = f.clone();
            let start = Instant::now();
            let result = spawn_blocking(move || {
                let _permit = permit;
                f(&*store)
            })
            .await
            .unwrap_or_else(|e| Err(StoreError::Backend(e.to_string()).into()));
            metrics::inc_query_duration(op, start.elapsed().as_secs_f32());

            match result {
                Err(e) if e.is_transient() && attempt <= self.config.retry.retries => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!("查询失败，{:?} 后进行第 {} 次重试: {}", delay, attempt, e);
                    metrics::inc_retry();
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// 处理整个输入流
    ///
    /// 最多 workers 个样本同时处理，结果按输入顺序写出。stop 被置位后不再读取新样本，
    /// 已经开始处理的样本会正常完成并写出
    pub async fn run<S, W>(
        &self,
        input: S,
        writer: &mut ResultWriter<W>,
        progress: &Progress,
        stop: &AtomicBool,
    ) -> Result<RunOutcome>
    where
        S: Stream<Item = InputItem>,
        W: std::io::Write,
    {
        let results = input
            .take_while(|_| future::ready(!stop.load(Ordering::SeqCst)))
            .map(|(index, item)| async move {
                let records = match item {
                    Ok(value) => self.score_sample(value).await,
                    Err(e) => vec![ScoreRecord::errored("", "", None, &SampleError::malformed(e))],
                };
                (index, records)
            })
            .buffered(self.config.workers);
        let mut results = pin!(results);

        let mut summary = Summary::default();
        let mut samples = 0;
        let mut next_offset = None;
        while let Some((index, records)) = results.next().await {
            for record in &records {
                writer.write(record)?;
                summary.add(record);
                match (record.status, record.score) {
                    (Some(decision), Some(score)) if !record.is_error() => metrics::inc_decision(decision, score),
                    _ => metrics::inc_error(),
                }
            }
            progress.record(&records);
            samples += 1;
            next_offset = Some(index + 1);
        }

        let cancelled = stop.load(Ordering::SeqCst);
        if cancelled {
            match next_offset {
                Some(offset) => warn!("处理已中断，使用 --offset {} 继续", offset),
                None => warn!("处理已中断，没有处理任何样本"),
            }
        }
        info!("共处理 {} 个样本，缓存了 {} 个类别的统计量", samples, self.cache.cached());

        Ok(RunOutcome { summary, samples, next_offset, cancelled })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::distance::Metric;
    use crate::report::OutputFormat;
    use crate::store::{EmbeddingRecord, ExactStore, Neighbor};

    fn store() -> ExactStore {
        let mut records = vec![];
        for i in 0..5 {
            records.push(EmbeddingRecord::new(format!("a{i}"), "a", vec![i as f32, 0.0]));
            records.push(EmbeddingRecord::new(format!("b{i}"), "b", vec![i as f32, 10.0]));
        }
        records.push(EmbeddingRecord::new("c0", "c", vec![100.0, 100.0]));
        ExactStore::from_records(records, Metric::L2).unwrap()
    }

    fn cleaner(config: CleanConfig) -> Cleaner {
        Cleaner::new(Arc::new(store()), config).unwrap()
    }

    /// 前 failures 次查询返回瞬时错误
    struct FlakyStore {
        inner: ExactStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn fail(&self) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            Ok(())
        }
    }

    impl ReferenceStore for FlakyStore {
        fn dim(&self) -> usize {
            self.inner.dim()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn metric(&self) -> Metric {
            self.inner.metric()
        }

        fn nearest(&self, x: &[f32], k: usize, label: Option<&str>) -> Result<Vec<Neighbor>, StoreError> {
            self.fail()?;
            self.inner.nearest(x, k, label)
        }

        fn vector(&self, id: &str) -> Result<Option<Vec<f32>>, StoreError> {
            self.inner.vector(id)
        }

        fn class_vectors(&self, label: &str) -> Result<Vec<Vec<f32>>, StoreError> {
            self.fail()?;
            self.inner.class_vectors(label)
        }

        fn categories(&self) -> Result<Vec<(String, usize)>, StoreError> {
            self.inner.categories()
        }
    }

    fn fast_retry(retries: usize) -> CleanConfig {
        CleanConfig {
            k: 5,
            workers: 1,
            retry: RetryPolicy { retries, base_delay: Duration::from_millis(1) },
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_delay() {
        let p = RetryPolicy { retries: 3, base_delay: Duration::from_millis(100) };
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_invalid_config() {
        let config = CleanConfig { k: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroNeighbors));
        let config = CleanConfig { workers: 0, ..Default::default() };
        assert!(Cleaner::new(Arc::new(store()), config).is_err());
        let config = CleanConfig {
            thresholds: Thresholds { high: -1.0, low: 1.0 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThresholds { .. })));
    }

    #[tokio::test]
    async fn test_score_sample_multi_category() {
        let c = cleaner(CleanConfig { k: 5, ..Default::default() });
        let records = c
            .score_sample(json!({
                "id": "s1",
                "image_path": "s1.jpg",
                "category": ["a", "b", "c", "zzz"],
                "feature": [2.0, 0.0]
            }))
            .await;
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].status, Some(Decision::Accept));
        assert_eq!(records[1].status, Some(Decision::Reject));
        // 只有一个成员的类别和不存在的类别都无法打分
        for r in &records[2..] {
            assert!(r.is_error());
            assert!(r.metrics.is_none());
            assert!(r.error.as_ref().unwrap().contains("未知类别"));
        }
    }

    #[tokio::test]
    async fn test_score_sample_by_embedding_id() {
        let c = cleaner(CleanConfig { k: 5, ..Default::default() });
        let records = c
            .score_sample(json!({"id": "s", "image_path": "p", "category": "b", "embedding_id": "b2"}))
            .await;
        assert_eq!(records[0].status, Some(Decision::Accept));

        let records = c
            .score_sample(json!({"id": "s", "image_path": "p", "category": "b", "embedding_id": "nope"}))
            .await;
        assert!(records[0].error.as_ref().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_score_sample_overflowing_feature() {
        let c = cleaner(CleanConfig { k: 5, ..Default::default() });
        let records = c
            .score_sample(json!({"id": "s", "image_path": "p", "category": "a", "feature": [1e20, 1e20]}))
            .await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_error());
        assert!(records[0].status.is_none() && records[0].score.is_none() && records[0].metrics.is_none());

        // 写出的结果必须能被重新读取
        let mut writer = ResultWriter::new(vec![], OutputFormat::Json).unwrap();
        writer.write(&records[0]).unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(serde_json::from_slice::<Vec<ScoreRecord>>(&out).unwrap(), records);
    }

    #[tokio::test]
    async fn test_empty_store_errors_every_category() {
        let c = Cleaner::new(Arc::new(ExactStore::new(2, Metric::L2)), CleanConfig::default()).unwrap();
        let records = c
            .score_sample(json!({"id": "s", "image_path": "p", "category": ["a", "b"], "feature": [0.0, 0.0]}))
            .await;
        assert_eq!(records.len(), 2);
        for r in &records {
            assert!(r.is_error());
            assert_eq!(r.error.as_deref(), Some(SampleError::from(StoreError::Empty).to_string().as_str()));
        }
        assert_eq!(
            c.score("a", vec![0.0, 0.0].into()).await.unwrap_err(),
            SampleError::StoreQuery(StoreError::Empty)
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let flaky = FlakyStore { inner: store(), failures: AtomicUsize::new(2) };
        let c = Cleaner::new(Arc::new(flaky), fast_retry(3)).unwrap();
        assert!(c.score("a", vec![1.0, 0.0].into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let flaky = FlakyStore { inner: store(), failures: AtomicUsize::new(10) };
        let c = Cleaner::new(Arc::new(flaky), fast_retry(1)).unwrap();
        let err = c.score("a", vec![1.0, 0.0].into()).await.unwrap_err();
        assert!(matches!(err, SampleError::StoreQuery(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_run_keeps_input_order() {
        let input = (0..20)
            .map(|i| {
                let category = if i % 3 == 0 { "b" } else { "a" };
                (i, Ok::<_, String>(json!({"id": i, "image_path": format!("{i}.jpg"), "category": category, "feature": [1.0, 0.0]})))
            })
            .chain([(20, Err("第 21 行无法解析".to_string()))]);
        let c = cleaner(CleanConfig { k: 5, workers: 8, ..Default::default() });
        let mut writer = ResultWriter::new(vec![], OutputFormat::Jsonl).unwrap();
        let progress = Progress::hidden();
        let stop = AtomicBool::new(false);
        let outcome = c.run(futures::stream::iter(input), &mut writer, &progress, &stop).await.unwrap();

        assert_eq!(outcome.samples, 21);
        assert_eq!(outcome.next_offset, Some(21));
        assert!(!outcome.cancelled);
        assert_eq!(outcome.summary, progress.snapshot());
        assert_eq!(outcome.summary.accept, 13);
        assert_eq!(outcome.summary.reject, 7);
        assert_eq!(outcome.summary.errors, 1);

        let out = writer.finish().unwrap();
        let records = serde_json::Deserializer::from_slice(&out)
            .into_iter::<ScoreRecord>()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let ids = records.iter().map(|r| r.image_id.as_str()).collect::<Vec<_>>();
        let expected = (0..20).map(|i| i.to_string()).chain([String::new()]).collect::<Vec<_>>();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let input = (0..10).map(|i| (i, Ok::<_, String>(json!({"id": i, "image_path": "p", "category": "a", "feature": [0.0, 0.0]}))));
        let c = cleaner(CleanConfig { k: 5, workers: 1, ..Default::default() });
        let mut writer = ResultWriter::new(vec![], OutputFormat::Json).unwrap();
        let stop = AtomicBool::new(true);
        let outcome = c.run(futures::stream::iter(input), &mut writer, &Progress::hidden(), &stop).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.samples, 0);
        let out = writer.finish().unwrap();
        assert!(serde_json::from_slice::<Vec<ScoreRecord>>(&out).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_cancelled_mid_stream() {
        let stop = AtomicBool::new(false);
        // 读到第 10 个样本时收到中断信号，此时前面的样本可能仍在处理中
        let input = futures::stream::iter(0..30).map(|i| {
            if i == 10 {
                stop.store(true, Ordering::SeqCst);
            }
            (i, Ok::<_, String>(json!({"id": i, "image_path": "p", "category": "a", "feature": [1.0, 0.0]})))
        });
        let c = cleaner(CleanConfig { k: 5, workers: 4, ..Default::default() });
        let mut writer = ResultWriter::new(vec![], OutputFormat::Json).unwrap();
        let outcome = c.run(input, &mut writer, &Progress::hidden(), &stop).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.samples, 10);
        assert_eq!(outcome.next_offset, Some(10));
        assert_eq!(outcome.summary.total, 10);

        let out = writer.finish().unwrap();
        let records = serde_json::from_slice::<Vec<ScoreRecord>>(&out).unwrap();
        let ids = records.iter().map(|r| r.image_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());
        assert!(records.iter().all(|r| r.status == Some(Decision::Accept)));
    }
}
