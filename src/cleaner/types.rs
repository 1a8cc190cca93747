use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::distance::normalize;
use crate::error::SampleError;
use crate::score::{Decision, MetricSet};
use crate::store::EmbeddingRecord;

/// 类别可以写成字符串，也可以是标注数据中常见的整数编号
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub(crate) enum LabelValue {
    Str(String),
    Int(i64),
}

impl From<LabelValue> for String {
    fn from(v: LabelValue) -> Self {
        match v {
            LabelValue::Str(s) => s,
            LabelValue::Int(i) => i.to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(LabelValue),
    Many(Vec<LabelValue>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v.into()],
            Self::Many(v) => v.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct RawDeclaration {
    category: LabelValue,
    #[serde(default, alias = "embedding")]
    feature: Option<Vec<f32>>,
    #[serde(default)]
    embedding_id: Option<LabelValue>,
}

/// 目标数据集中的一条原始记录，所有字段都可缺失，缺失的情况在 parse 时统一报错
#[derive(Deserialize, Debug)]
struct RawSample {
    #[serde(default, alias = "image_id")]
    id: Option<LabelValue>,
    #[serde(default)]
    image_path: Option<String>,
    #[serde(default)]
    category: Option<OneOrMany>,
    #[serde(default, alias = "embedding")]
    feature: Option<Vec<f32>>,
    #[serde(default)]
    embedding_id: Option<LabelValue>,
    #[serde(default)]
    categories: Option<Vec<RawDeclaration>>,
}

/// 参考集中的一条原始记录
#[derive(Deserialize, Debug)]
struct RawReference {
    #[serde(alias = "image_id")]
    id: LabelValue,
    #[serde(default)]
    image_path: Option<String>,
    category: OneOrMany,
    #[serde(alias = "embedding")]
    feature: Vec<f32>,
}

/// 解析参考集记录，normalize 为 true 时对向量做 L2 归一化
pub fn parse_reference(value: Value, normalize_vector: bool) -> Result<EmbeddingRecord, SampleError> {
    let raw: RawReference = serde_json::from_value(value).map_err(|e| SampleError::malformed(e.to_string()))?;
    let id = String::from(raw.id);
    let mut labels = raw.category.into_vec();
    labels.retain(|l| !l.is_empty());
    if labels.is_empty() {
        return Err(SampleError::malformed(format!("记录 {} 没有类别", id)));
    }
    let mut vector = raw.feature;
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return Err(SampleError::malformed(format!("记录 {} 的特征向量无效", id)));
    }
    if normalize_vector {
        normalize(&mut vector);
    }
    Ok(EmbeddingRecord { path: raw.image_path.unwrap_or_else(|| id.clone()), id, labels, vector })
}

/// 特征向量的来源
#[derive(Debug, Clone, PartialEq)]
pub enum VectorSource {
    /// 直接给出的向量
    Inline(Arc<[f32]>),
    /// 引用参考集中已有的嵌入
    Reference(String),
}

/// 样本上声明的一个类别
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub category: String,
    pub vector: Result<VectorSource, SampleError>,
}

/// 待校验的样本
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySample {
    pub image_id: String,
    pub image_path: String,
    pub declarations: Vec<Declaration>,
}

/// 解析失败的样本，保留能够识别出的 ID 与路径用于输出
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSample {
    pub image_id: String,
    pub image_path: String,
    pub error: SampleError,
}

impl QuerySample {
    /// 从输入 JSON 中解析样本
    ///
    /// 缺少 ID、路径或类别时整个样本无效；某个类别缺少特征向量时只有该类别无效
    pub fn parse(value: Value) -> Result<Self, RejectedSample> {
        let id = value.get("id").or_else(|| value.get("image_id")).map(display_value);
        let path = value.get("image_path").and_then(Value::as_str).map(str::to_owned);
        let reject = |error: SampleError| RejectedSample {
            image_id: id.clone().unwrap_or_default(),
            image_path: path.clone().unwrap_or_default(),
            error,
        };

        if !value.is_object() {
            return Err(reject(SampleError::malformed("样本不是 JSON 对象")));
        }
        let raw: RawSample =
            serde_json::from_value(value).map_err(|e| reject(SampleError::malformed(e.to_string())))?;

        let Some(image_id) = raw.id.map(String::from).filter(|s| !s.is_empty()) else {
            return Err(reject(SampleError::malformed("缺少图片 ID")));
        };
        let Some(image_path) = raw.image_path.filter(|s| !s.is_empty()) else {
            return Err(reject(SampleError::malformed("缺少图片路径")));
        };

        let shared = match (raw.feature, raw.embedding_id) {
            (Some(v), _) => Some(VectorSource::Inline(v.into())),
            (None, Some(id)) => Some(VectorSource::Reference(id.into())),
            (None, None) => None,
        };
        let resolve = |feature: Option<Vec<f32>>, embedding_id: Option<LabelValue>| {
            match (feature, embedding_id) {
                (Some(v), _) => Ok(VectorSource::Inline(v.into())),
                (None, Some(id)) => Ok(VectorSource::Reference(id.into())),
                (None, None) => shared.clone().ok_or_else(|| SampleError::malformed("缺少特征向量")),
            }
        };

        let mut declarations = vec![];
        if let Some(categories) = raw.categories {
            for d in categories {
                let vector = resolve(d.feature, d.embedding_id);
                declarations.push(Declaration { category: d.category.into(), vector });
            }
        }
        if let Some(category) = raw.category {
            for category in category.into_vec() {
                // 同一类别在两种写法中重复出现时只保留第一次
                if declarations.iter().any(|d| d.category == category) {
                    continue;
                }
                declarations.push(Declaration { category, vector: resolve(None, None) });
            }
        }
        declarations.retain(|d| !d.category.is_empty());

        if declarations.is_empty() {
            return Err(RejectedSample {
                image_id,
                image_path,
                error: SampleError::malformed("没有指定类别"),
            });
        }

        Ok(Self { image_id, image_path, declarations })
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        v => v.to_string(),
    }
}

/// 输出记录，每个 (样本, 类别) 一条
///
/// 出错的记录 status、score、metrics 均为 null，error 为错误信息
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub image_id: String,
    pub image_path: String,
    pub status: Option<Decision>,
    pub score: Option<f32>,
    pub category: Option<String>,
    pub metrics: Option<MetricSet>,
    pub error: Option<String>,
}

impl ScoreRecord {
    pub fn scored(
        sample: &QuerySample,
        category: &str,
        score: f32,
        decision: Decision,
        metrics: MetricSet,
    ) -> Self {
        Self {
            image_id: sample.image_id.clone(),
            image_path: sample.image_path.clone(),
            status: Some(decision),
            score: Some(score),
            category: Some(category.to_owned()),
            metrics: Some(metrics),
            error: None,
        }
    }

    pub fn errored(
        image_id: &str,
        image_path: &str,
        category: Option<&str>,
        error: &SampleError,
    ) -> Self {
        Self {
            image_id: image_id.to_owned(),
            image_path: image_path.to_owned(),
            status: None,
            score: None,
            category: category.map(str::to_owned),
            metrics: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status.is_none()
    }
}

impl From<RejectedSample> for ScoreRecord {
    fn from(r: RejectedSample) -> Self {
        Self::errored(&r.image_id, &r.image_path, None, &r.error)
    }
}
