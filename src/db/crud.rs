use sqlx::{Executor, Result, Sqlite, SqliteConnection, SqlitePool};

use super::{CategoryRow, EmbeddingRow, LabelRow};

/// 根据外部 ID 查找嵌入
pub async fn find_embedding_id<'c, E>(executor: E, key: &str) -> Result<Option<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        SELECT id FROM embedding WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(executor)
    .await
}

/// 添加嵌入记录
pub async fn add_embedding<'c, E>(executor: E, key: &str, path: &str, vector: &[f32]) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO embedding (key, path, dim, vector)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(key)
    .bind(path)
    .bind(vector.len() as i64)
    .bind(bytemuck::cast_slice::<f32, u8>(vector))
    .fetch_one(executor)
    .await
}

/// 覆盖已有嵌入的路径和向量
pub async fn update_embedding<'c, E>(executor: E, id: i64, path: &str, vector: &[f32]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE embedding SET path = ?, dim = ?, vector = ? WHERE id = ?
        "#,
    )
    .bind(path)
    .bind(vector.len() as i64)
    .bind(bytemuck::cast_slice::<f32, u8>(vector))
    .bind(id)
    .execute(executor)
    .await?;

    Ok(())
}

/// 替换嵌入的全部标签
pub async fn set_labels(conn: &mut SqliteConnection, id: i64, labels: &[String]) -> Result<()> {
    sqlx::query("DELETE FROM embedding_label WHERE embedding_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    for label in labels {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO embedding_label (embedding_id, label)
            VALUES (?, ?)
            "#,
        )
        .bind(id)
        .bind(label)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// 嵌入总数
pub async fn count_embeddings(executor: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding").fetch_one(executor).await?;
    Ok(count as u64)
}

/// 参考集的向量维度，参考集为空时返回 None
pub async fn get_dim(executor: &SqlitePool) -> Result<Option<usize>> {
    let dim: Option<i64> = sqlx::query_scalar("SELECT dim FROM embedding ORDER BY id LIMIT 1")
        .fetch_optional(executor)
        .await?;
    Ok(dim.map(|d| d as usize))
}

/// 所有类别及其成员数量，按类别名排序
pub async fn get_categories(executor: &SqlitePool) -> Result<Vec<CategoryRow>> {
    sqlx::query_as(
        r#"
        SELECT label, COUNT(*) as count FROM embedding_label
        GROUP BY label ORDER BY label ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 按 ID 顺序分页读取嵌入，返回 ID 大于 after 的最多 limit 条记录
pub async fn get_embeddings(executor: &SqlitePool, after: i64, limit: usize) -> Result<Vec<EmbeddingRow>> {
    sqlx::query_as(
        r#"
        SELECT id, key, path, vector FROM embedding
        WHERE id > ? ORDER BY id ASC LIMIT ?
        "#,
    )
    .bind(after)
    .bind(limit as i64)
    .fetch_all(executor)
    .await
}

/// 读取 ID 在 [start, end] 范围内的嵌入的标签
pub async fn get_labels(executor: &SqlitePool, start: i64, end: i64) -> Result<Vec<LabelRow>> {
    sqlx::query_as(
        r#"
        SELECT embedding_id, label FROM embedding_label
        WHERE embedding_id BETWEEN ? AND ?
        ORDER BY embedding_id ASC, label ASC
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await
}
