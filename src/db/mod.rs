use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use sqlx::{SqlitePool, sqlite::*};

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 打开参考集数据库，不存在时创建，并执行迁移
///
/// embedding_label 依赖外键级联删除，所以每个连接都要打开 foreign_keys
pub async fn open_database(path: &Path) -> Result<Database, sqlx::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    info!("打开参考集数据库: {}", path.display());

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));
    let db = SqlitePool::connect_with(options).await?;

    sqlx::migrate!().run(&db).await?;
    debug!("数据库迁移完成");

    Ok(db)
}
