use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 单个 (样本, 类别) 的三项一致性指标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// kNN 标签一致率 p，范围 [0, 1]
    #[serde(rename = "knn_consistency")]
    pub p: f32,
    /// 归一化后的最近同类距离
    #[serde(rename = "nearest_distance_normalized")]
    pub d_min_norm: f32,
    /// 归一化后的类均值距离
    #[serde(rename = "class_distance_normalized")]
    pub d_mu_norm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
    Review,
}

impl Decision {
    pub const ALL: [Decision; 3] = [Decision::Accept, Decision::Reject, Decision::Review];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub w1: f32,
    pub w2: f32,
    pub w3: f32,
}

impl Default for Weights {
    fn default() -> Self {
        Self { w1: 1.0, w2: 0.5, w3: 0.5 }
    }
}

impl Weights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("w1", self.w1), ("w2", self.w2), ("w3", self.w3)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f32,
    pub low: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { high: 0.4, low: -0.4 }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.high.is_finite() || !self.low.is_finite() || self.low >= self.high {
            return Err(ConfigError::InvalidThresholds { high: self.high, low: self.low });
        }
        Ok(())
    }
}

/// S = w1 * p - w2 * d_min_norm - w3 * d_mu_norm
pub fn confidence_score(m: &MetricSet, w: &Weights) -> f32 {
    w.w1 * m.p - w.w2 * m.d_min_norm - w.w3 * m.d_mu_norm
}

/// 根据阈值做出决策，两侧边界均为闭区间
pub fn classify(score: f32, t: &Thresholds) -> Decision {
    if score >= t.high {
        Decision::Accept
    } else if score <= t.low {
        Decision::Reject
    } else {
        Decision::Review
    }
}

pub fn evaluate(m: &MetricSet, w: &Weights, t: &Thresholds) -> (f32, Decision) {
    let score = confidence_score(m, w);
    (score, classify(score, t))
}
