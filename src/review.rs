use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cleaner::ScoreRecord;
use crate::score::{Decision, MetricSet};

/// 单个类别的审核信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReview {
    pub category: Option<String>,
    pub decision: Option<Decision>,
    pub score: Option<f32>,
    pub metrics: Option<MetricSet>,
    pub error: Option<String>,
}

/// 按图片聚合后的审核条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub image_id: String,
    pub image_path: String,
    /// 整体判定
    pub decision: Decision,
    pub categories: Vec<CategoryReview>,
}

impl From<ScoreRecord> for CategoryReview {
    fn from(r: ScoreRecord) -> Self {
        Self { category: r.category, decision: r.status, score: r.score, metrics: r.metrics, error: r.error }
    }
}

/// 整体判定：任一类别拒绝则拒绝，否则任一类别待审或出错则待审，否则接受
pub fn overall_decision(categories: &[CategoryReview]) -> Decision {
    let mut decision = Decision::Accept;
    for c in categories {
        match c.decision {
            Some(Decision::Reject) if c.error.is_none() => return Decision::Reject,
            Some(Decision::Accept) if c.error.is_none() => {}
            _ => decision = Decision::Review,
        }
    }
    decision
}

/// 将逐类别的结果按图片聚合，保持图片第一次出现的顺序
pub fn group(records: impl IntoIterator<Item = ScoreRecord>) -> Vec<ReviewItem> {
    let mut index = HashMap::<(String, String), usize>::new();
    let mut items: Vec<ReviewItem> = vec![];

    for record in records {
        let key = (record.image_id.clone(), record.image_path.clone());
        let i = *index.entry(key).or_insert_with(|| {
            items.push(ReviewItem {
                image_id: record.image_id.clone(),
                image_path: record.image_path.clone(),
                decision: Decision::Accept,
                categories: vec![],
            });
            items.len() - 1
        });
        items[i].categories.push(record.into());
    }

    for item in &mut items {
        item.decision = overall_decision(&item.categories);
    }
    items
}

/// 图片 ID 中最后一个 '_' 之后的部分是任务 ID
pub fn task_id(image_id: &str) -> &str {
    image_id.rsplit('_').next().unwrap_or_default()
}

/// 按任务聚合的分析报告
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskReport {
    /// 按整体判定统计的图片数量
    pub images: BTreeMap<Decision, usize>,
    /// 含有被拒绝图片的任务，以及这些图片中被拒绝的类别
    pub rejected: BTreeMap<String, BTreeSet<String>>,
    /// 含有被接受图片的任务
    pub accept_tasks: BTreeSet<String>,
    /// 含有被拒绝图片的任务
    pub reject_tasks: BTreeSet<String>,
}

impl TaskReport {
    pub fn from_items(items: &[ReviewItem]) -> Self {
        let mut report = Self::default();
        for item in items {
            *report.images.entry(item.decision).or_default() += 1;

            let task = task_id(&item.image_id);
            if task.is_empty() {
                continue;
            }
            match item.decision {
                Decision::Accept => {
                    report.accept_tasks.insert(task.to_owned());
                }
                Decision::Reject => {
                    report.reject_tasks.insert(task.to_owned());
                    let categories = report.rejected.entry(task.to_owned()).or_default();
                    categories.extend(
                        item.categories
                            .iter()
                            .filter(|c| c.decision == Some(Decision::Reject) && c.error.is_none())
                            .filter_map(|c| c.category.clone()),
                    );
                }
                Decision::Review => {}
            }
        }
        report
    }

    pub fn count(&self, decision: Decision) -> usize {
        self.images.get(&decision).copied().unwrap_or(0)
    }

    /// 写出 rejected.json、accept.txt 和 reject.txt
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let mut writer = BufWriter::new(File::create(dir.join("rejected.json"))?);
        serde_json::to_writer_pretty(&mut writer, &self.rejected)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        for (name, tasks) in [("accept.txt", &self.accept_tasks), ("reject.txt", &self.reject_tasks)] {
            let mut writer = BufWriter::new(File::create(dir.join(name))?);
            for task in tasks {
                writeln!(writer, "{}", task)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}
