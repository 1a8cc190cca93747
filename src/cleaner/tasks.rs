use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::Stream;
use log::{debug, info};
use serde::Deserializer as _;
use serde::de::{IgnoredAny, SeqAccess, Visitor};
use serde_json::Value;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::{JoinHandle, spawn_blocking};

use crate::report::first_non_whitespace;

/// 输入流中的一个元素：在输入中的位置，以及解析出的 JSON 或解析错误
pub type InputItem = (usize, Result<Value, String>);

/// 读取范围，offset 之前的元素被跳过，最多读取 limit 个
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadRange {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ReadRange {
    fn contains(&self, index: usize) -> bool {
        index >= self.offset && self.limit.is_none_or(|n| index - self.offset < n)
    }

    fn exhausted(&self, index: usize) -> bool {
        self.limit.is_some_and(|n| index >= self.offset + n)
    }
}

/// 在后台线程中逐个读取输入文件中的样本
///
/// 文件以 `[` 开头时按 JSON 数组流式解析，否则按 JSON Lines 解析。
/// 通道容量有限，读取速度受下游处理速度约束
pub fn task_read(
    path: PathBuf,
    range: ReadRange,
    capacity: usize,
) -> (JoinHandle<Result<()>>, Receiver<InputItem>) {
    let (tx, rx) = channel(capacity.max(1));
    let t = spawn_blocking(move || {
        let file = File::open(&path).with_context(|| format!("无法打开输入文件 {}", path.display()))?;
        let mut reader = BufReader::new(file);
        match first_non_whitespace(&mut reader)? {
            Some(b'[') => {
                info!("按 JSON 数组读取: {}", path.display());
                read_array(reader, range, &tx)
            }
            Some(_) => {
                info!("按 JSON Lines 读取: {}", path.display());
                read_lines(reader, range, &tx)
            }
            None => Ok(()),
        }
    });
    (t, rx)
}

/// 将接收端包装为 Stream
pub fn into_stream(rx: Receiver<InputItem>) -> impl Stream<Item = InputItem> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

fn read_lines(reader: impl BufRead, range: ReadRange, tx: &Sender<InputItem>) -> Result<()> {
    let mut index = 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if range.exhausted(index) {
            break;
        }
        if range.contains(index) {
            let item = serde_json::from_str::<Value>(line).map_err(|e| format!("第 {} 行无法解析: {}", index + 1, e));
            if tx.blocking_send((index, item)).is_err() {
                debug!("输入接收端已关闭，停止读取");
                break;
            }
        }
        index += 1;
    }
    Ok(())
}

fn read_array(reader: impl BufRead, range: ReadRange, tx: &Sender<InputItem>) -> Result<()> {
    let mut de = serde_json::Deserializer::from_reader(reader);
    let mut forwarder = Forwarder { tx, range, stopped: false };
    match (&mut de).deserialize_seq(&mut forwarder) {
        Ok(()) => Ok(de.end()?),
        // 提前停止时数组没有读完，反序列化器报告的错误可以忽略
        Err(_) if forwarder.stopped => Ok(()),
        Err(e) => Err(e).context("无法解析输入的 JSON 数组"),
    }
}

struct Forwarder<'a> {
    tx: &'a Sender<InputItem>,
    range: ReadRange,
    stopped: bool,
}

impl<'de> Visitor<'de> for &mut Forwarder<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("样本数组")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let mut index = 0;
        loop {
            if self.range.exhausted(index) {
                self.stopped = true;
                return Ok(());
            }
            if !self.range.contains(index) {
                if seq.next_element::<IgnoredAny>()?.is_none() {
                    return Ok(());
                }
                index += 1;
                continue;
            }
            let Some(value) = seq.next_element::<Value>()? else {
                return Ok(());
            };
            if self.tx.blocking_send((index, Ok(value))).is_err() {
                debug!("输入接收端已关闭，停止读取");
                self.stopped = true;
                return Ok(());
            }
            index += 1;
        }
    }
}
