use sqlx::FromRow;

/// 嵌入记录
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddingRow {
    /// 数据库内部 ID，按插入顺序递增
    pub id: i64,
    /// 外部 ID
    pub key: String,
    /// 图片路径
    pub path: String,
    /// f32 向量的字节表示
    pub vector: Vec<u8>,
}

/// 嵌入的类别标签
#[derive(Debug, Clone, FromRow)]
pub struct LabelRow {
    pub embedding_id: i64,
    pub label: String,
}

/// 类别及其成员数量
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CategoryRow {
    pub label: String,
    pub count: i64,
}
