use std::sync::LazyLock;

use prometheus::*;

use crate::score::Decision;

static METRIC_DECISION_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "semclean_decision_count",
        "count of the scored (sample, category) pairs by decision",
        &["decision"]
    )
    .unwrap()
});

static METRIC_ERROR_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("semclean_error_count", "count of the errored (sample, category) pairs")
        .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "semclean_query_duration",
        "duration of the store queries in seconds, by operation",
        &["op"]
    )
    .unwrap()
});

static METRIC_RETRY_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("semclean_retry_count", "count of the retried store queries").unwrap()
});

static METRIC_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "semclean_score",
        "confidence score of the scored pairs",
        (-20..=10).map(|x| x as f64 * 0.2).collect()
    )
    .unwrap()
});

/// 记录一次判定结果
pub fn inc_decision(decision: Decision, score: f32) {
    METRIC_DECISION_COUNT.with_label_values(&[decision.as_str()]).inc();
    METRIC_SCORE.observe(score as f64);
}

pub fn inc_error() {
    METRIC_ERROR_COUNT.inc();
}

pub fn inc_query_duration(op: &str, duration: f32) {
    METRIC_QUERY_DURATION.with_label_values(&[op]).observe(duration as f64);
}

pub fn inc_retry() {
    METRIC_RETRY_COUNT.inc();
}

/// 以文本格式导出当前进程中注册的全部指标
pub fn dump() -> anyhow::Result<String> {
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&gather(), &mut buffer)?;
    Ok(buffer)
}
