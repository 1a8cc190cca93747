use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use rstest::*;
use serde_json::{Value, json};

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

const CATEGORIES: [&str; 3] = ["cat", "dog", "car"];

fn feature(c: usize, offset: Option<(usize, f32)>) -> Vec<f32> {
    let mut v = vec![0.0; 8];
    v[c] = 1.0;
    if let Some((j, x)) = offset {
        v[3 + j] = x;
    }
    v
}

/// 已导入参考集的配置目录
#[fixture]
fn conf_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut lines = vec![];
    for (c, category) in CATEGORIES.iter().enumerate() {
        for j in 0..5 {
            for (s, x) in [("p", 0.1), ("n", -0.1)] {
                let record = json!({
                    "id": format!("{category}-{j}-{s}"),
                    "image_path": format!("/ref/{category}-{j}-{s}.jpg"),
                    "category": category,
                    "feature": feature(c, Some((j, x))),
                });
                lines.push(record.to_string());
            }
        }
    }
    // 只有一个成员的类别，远离其他类别
    lines.push(json!({"id": "lonely", "category": "bird", "feature": feature(2, Some((4, 3.0)))}).to_string());
    let reference = dir.path().join("reference.jsonl");
    fs::write(&reference, lines.join("\n")).unwrap();

    Command::cargo_bin("semclean")
        .unwrap()
        .arg("-c")
        .arg(dir.path())
        .arg("import")
        .arg(&reference)
        .assert()
        .success();
    dir
}

fn write_input(dir: &TempDir) -> std::path::PathBuf {
    let input = json!([
        {"id": "1", "image_path": "/d/1.jpg", "category": "cat", "feature": feature(0, None)},
        {"id": "2", "image_path": "/d/2.jpg", "category": ["dog", "cat"], "feature": feature(1, None)},
        {"id": "3", "image_path": "/d/3.jpg", "category": "bird", "feature": feature(0, None)},
        {"id": "4", "image_path": "/d/4.jpg", "category": "car"},
    ]);
    let path = dir.path().join("input.json");
    fs::write(&path, serde_json::to_string_pretty(&input).unwrap()).unwrap();
    path
}

#[rstest]
fn categories(conf_dir: TempDir) -> Result<()> {
    cargo_run!("semclean", "-c", conf_dir.path(), "categories")
        .success()
        .stdout(predicate::str::contains("cat\t10"))
        .stdout(predicate::str::contains("bird\t1\t(成员不足)"));
    Ok(())
}

#[rstest]
fn import_skips_existing(conf_dir: TempDir) -> Result<()> {
    let again = conf_dir.path().join("again.jsonl");
    fs::write(&again, json!({"id": "cat-0-p", "category": "dog", "feature": feature(1, None)}).to_string())?;
    cargo_run!("semclean", "-c", conf_dir.path(), "import", &again).success();
    cargo_run!("semclean", "-c", conf_dir.path(), "categories")
        .success()
        .stdout(predicate::str::contains("dog\t10"));

    cargo_run!("semclean", "-c", conf_dir.path(), "import", &again, "--overwrite").success();
    cargo_run!("semclean", "-c", conf_dir.path(), "categories")
        .success()
        .stdout(predicate::str::contains("cat\t9"))
        .stdout(predicate::str::contains("dog\t11"));
    Ok(())
}

#[rstest]
fn clean_stats_review(conf_dir: TempDir) -> Result<()> {
    let input = write_input(&conf_dir);
    let output = conf_dir.path().join("result.json");
    let summary = conf_dir.path().join("summary.json");

    cargo_run!(
        "semclean", "-c", conf_dir.path(), "clean", &input, "-o", &output, "-k", "5", "-j", "2",
        "--summary", &summary
    )
    .success();

    let records: Vec<Value> = serde_json::from_str(&fs::read_to_string(&output)?)?;
    assert_eq!(records.len(), 5);
    assert_eq!(records[0]["status"], "accept");
    assert_eq!(records[1]["status"], "accept");
    assert_eq!(records[1]["category"], "dog");
    assert_eq!(records[2]["status"], "reject");
    assert_eq!(records[3]["status"], Value::Null);
    assert!(records[3]["error"].as_str().unwrap().contains("bird"));
    assert_eq!(records[4]["metrics"], Value::Null);

    let summary: Value = serde_json::from_str(&fs::read_to_string(&summary)?)?;
    assert_eq!(summary["total"], 5);
    assert_eq!(summary["accept"], 2);
    assert_eq!(summary["reject"], 1);
    assert_eq!(summary["errors"], 2);

    cargo_run!("semclean", "stats", &output)
        .success()
        .stdout(predicate::str::contains("总计: 5"))
        .stdout(predicate::str::contains("接受: 2 (40.00%)"));

    let review = conf_dir.path().join("review.json");
    cargo_run!("semclean", "review", &output, "-o", &review).success();
    let items: Vec<Value> = serde_json::from_str(&fs::read_to_string(&review)?)?;
    let decisions = items.iter().map(|i| i["decision"].as_str().unwrap()).collect::<Vec<_>>();
    assert_eq!(decisions, vec!["accept", "reject", "review", "review"]);

    cargo_run!("semclean", "review", &output, "-o", &review, "--only-review").success();
    let items: Vec<Value> = serde_json::from_str(&fs::read_to_string(&review)?)?;
    assert_eq!(items.len(), 2);

    let report = conf_dir.path().join("report");
    cargo_run!("semclean", "stats", &output, "--report", &report).success();
    let rejected: Value = serde_json::from_str(&fs::read_to_string(report.join("rejected.json"))?)?;
    assert_eq!(rejected, json!({"2": ["cat"]}));
    assert_eq!(fs::read_to_string(report.join("accept.txt"))?, "1\n");
    assert_eq!(fs::read_to_string(report.join("reject.txt"))?, "2\n");

    Ok(())
}

#[rstest]
fn clean_rejects_invalid_config(conf_dir: TempDir) -> Result<()> {
    let input = write_input(&conf_dir);
    let output = conf_dir.path().join("result.json");
    cargo_run!(
        "semclean", "-c", conf_dir.path(), "clean", &input, "-o", &output, "--t-high", "-1", "--t-low", "1"
    )
    .failure()
    .stderr(predicate::str::contains("阈值无效"));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn clean_with_empty_reference_errors_every_record() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(&dir);
    let output = dir.path().join("r.json");
    cargo_run!("semclean", "-c", dir.path(), "clean", &input, "-o", &output)
        .success()
        .stderr(predicate::str::contains("参考集为空"));

    let records: Vec<Value> = serde_json::from_str(&fs::read_to_string(&output)?)?;
    assert_eq!(records.len(), 5);
    for record in &records {
        assert_eq!(record["status"], Value::Null);
        assert_eq!(record["score"], Value::Null);
        assert!(record["error"].is_string());
    }
    for record in &records[..4] {
        assert!(record["error"].as_str().unwrap().contains("参考集为空"));
    }
    Ok(())
}
