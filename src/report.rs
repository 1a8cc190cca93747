use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use clap::ValueEnum;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};

use crate::cleaner::ScoreRecord;
use crate::score::Decision;

/// 结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// 输出记录总数，包括出错的记录
    pub total: u64,
    pub accept: u64,
    pub reject: u64,
    pub review: u64,
    pub errors: u64,
}

/// 带百分比的统计结果，用于 JSON 输出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryReport {
    #[serde(flatten)]
    pub counts: Summary,
    pub accept_rate: f64,
    pub reject_rate: f64,
    pub review_rate: f64,
    pub error_rate: f64,
}

impl Summary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ScoreRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }

    pub fn add(&mut self, record: &ScoreRecord) {
        self.total += 1;
        match record.status {
            Some(_) if record.is_error() => self.errors += 1,
            Some(Decision::Accept) => self.accept += 1,
            Some(Decision::Reject) => self.reject += 1,
            Some(Decision::Review) => self.review += 1,
            None => self.errors += 1,
        }
    }

    pub fn count(&self, decision: Decision) -> u64 {
        match decision {
            Decision::Accept => self.accept,
            Decision::Reject => self.reject,
            Decision::Review => self.review,
        }
    }

    /// 占总数的百分比，总数为 0 时为 0
    pub fn rate(&self, n: u64) -> f64 {
        if self.total == 0 { 0.0 } else { n as f64 * 100.0 / self.total as f64 }
    }

    pub fn report(&self) -> SummaryReport {
        SummaryReport {
            counts: *self,
            accept_rate: self.rate(self.accept),
            reject_rate: self.rate(self.reject),
            review_rate: self.rate(self.review),
            error_rate: self.rate(self.errors),
        }
    }

    /// 将统计结果写入 JSON 文件
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("无法创建文件 {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.report())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "总计: {}", self.total)?;
        for (name, n) in [
            ("接受", self.accept),
            ("拒绝", self.reject),
            ("待审", self.review),
            ("错误", self.errors),
        ] {
            writeln!(f, "{}: {} ({:.2}%)", name, n, self.rate(n))?;
        }
        Ok(())
    }
}

/// 运行进度，可以在处理过程中随时读取
pub struct Progress {
    samples: AtomicU64,
    counts: [AtomicU64; 4],
    pb: ProgressBar,
}

impl Progress {
    pub fn new(pb: ProgressBar) -> Self {
        Self { samples: AtomicU64::new(0), counts: Default::default(), pb }
    }

    pub fn hidden() -> Self {
        Self::new(ProgressBar::hidden())
    }

    /// 记录一个样本的全部输出
    pub fn record(&self, records: &[ScoreRecord]) {
        self.samples.fetch_add(1, Ordering::Relaxed);
        for record in records {
            let slot = match record.status {
                Some(Decision::Accept) if !record.is_error() => 0,
                Some(Decision::Reject) if !record.is_error() => 1,
                Some(Decision::Review) if !record.is_error() => 2,
                _ => 3,
            };
            self.counts[slot].fetch_add(1, Ordering::Relaxed);
        }
        let s = self.snapshot();
        self.pb.set_message(format!(
            "接受 {} / 拒绝 {} / 待审 {} / 错误 {}",
            s.accept, s.reject, s.review, s.errors
        ));
        self.pb.inc(1);
    }

    /// 已处理的样本数量
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// 当前为止的统计结果
    pub fn snapshot(&self) -> Summary {
        let [accept, reject, review, errors] = [0, 1, 2, 3].map(|i| self.counts[i].load(Ordering::Relaxed));
        Summary { total: accept + reject + review + errors, accept, reject, review, errors }
    }

    pub fn finish(&self, msg: &'static str) {
        self.pb.finish_with_message(msg);
    }
}

/// 结果文件格式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// 格式化的 JSON 数组
    #[default]
    Json,
    /// 每行一条记录
    Jsonl,
}

impl OutputFormat {
    /// 根据扩展名推断格式
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("jsonl" | "ndjson") => Self::Jsonl,
            _ => Self::Json,
        }
    }
}

/// 增量写入结果记录
///
/// JSON 数组格式下在 finish 时写入结尾的 `]`，之前写入的内容始终可以被截断恢复
pub struct ResultWriter<W: Write> {
    inner: W,
    format: OutputFormat,
    written: u64,
}

impl ResultWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, format: OutputFormat) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("无法创建文件 {}", path.display()))?;
        Self::new(BufWriter::new(file), format)
    }
}

impl<W: Write> ResultWriter<W> {
    pub fn new(mut inner: W, format: OutputFormat) -> Result<Self> {
        if format == OutputFormat::Json {
            inner.write_all(b"[")?;
        }
        Ok(Self { inner, format, written: 0 })
    }

    pub fn write(&mut self, record: &ScoreRecord) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                self.inner.write_all(if self.written == 0 { b"\n" } else { b",\n" })?;
                serde_json::to_writer_pretty(&mut self.inner, record)?;
            }
            OutputFormat::Jsonl => {
                serde_json::to_writer(&mut self.inner, record)?;
                self.inner.write_all(b"\n")?;
            }
        }
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 写入结尾并刷新，返回内部的 writer
    pub fn finish(mut self) -> Result<W> {
        if self.format == OutputFormat::Json {
            self.inner.write_all(if self.written == 0 { b"]\n" } else { b"\n]\n" })?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// 读取结果文件，自动识别 JSON 数组与 JSON Lines
pub fn read_results(path: impl AsRef<Path>) -> Result<Vec<ScoreRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("无法打开文件 {}", path.display()))?;
    let mut reader = BufReader::new(file);
    if first_non_whitespace(&mut reader)? == Some(b'[') {
        return Ok(serde_json::from_reader(reader)?);
    }
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<ScoreRecord>()
        .map(|r| r.with_context(|| format!("无法解析结果文件 {}", path.display())))
        .collect()
}

/// 跳过开头的空白字符，返回第一个非空白字节但不消耗它
pub(crate) fn first_non_whitespace(reader: &mut impl BufRead) -> std::io::Result<Option<u8>> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => {
                let b = buf[i];
                reader.consume(i);
                return Ok(Some(b));
            }
            None => {
                let n = buf.len();
                reader.consume(n);
            }
        }
    }
}
