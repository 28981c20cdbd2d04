// ==========================================
// 库存表格批量导入系统 - 目标库写入 Trait
// ==========================================
// 职责: 定义导入记录落库 / 按会话标签删除 接口
// 红线: 写入按 (会话标签, 行号) 幂等；Sink 不含校验规则
// 自然键唯一性按 Schema 隔离
// ==========================================

use crate::domain::commit::{RecordOutcome, SinkRecord};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// RecordSink Trait
// ==========================================
// 实现者: SqliteRecordSink（使用 rusqlite）
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// 批量写入（单事务），逐条返回结果
    ///
    /// # 参数
    /// - records: 待写入记录
    /// - tag: 会话标签（session_id），回滚时按此删除
    /// - schema_name: 目标 Schema，自然键在同一 Schema 内唯一
    ///
    /// # 返回
    /// - Ok(Vec<RecordOutcome>): 每条记录的写入/拒绝结果（顺序同输入）
    /// - Err: 基础设施错误（事务整体回滚）
    async fn insert_batch(
        &self,
        records: Vec<SinkRecord>,
        tag: &str,
        schema_name: &str,
    ) -> RepositoryResult<Vec<RecordOutcome>>;

    /// 删除指定标签的全部记录，返回删除行数
    async fn delete_by_tag(&self, tag: &str) -> RepositoryResult<usize>;

    /// 统计指定标签的记录数
    async fn count_by_tag(&self, tag: &str) -> RepositoryResult<usize>;

    /// 返回目标库中该 Schema 已存在的自然键（跨批次重复检测）
    async fn existing_keys(
        &self,
        schema_name: &str,
        keys: &[String],
    ) -> RepositoryResult<Vec<String>>;
}
