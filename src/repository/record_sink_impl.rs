// ==========================================
// 库存表格批量导入系统 - 目标库写入实现
// ==========================================
// 职责: inventory_record 表的批量写入 / 按会话删除（使用 rusqlite）
// 幂等: ON CONFLICT(session_tag, row_index) DO NOTHING
// 拒绝: 同一 Schema 内自然键唯一约束冲突 → RecordOutcome::Rejected
// ==========================================

use crate::db;
use crate::domain::commit::{RecordOutcome, SinkRecord};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_sink::RecordSink;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// ==========================================
// SqliteRecordSink
// ==========================================
pub struct SqliteRecordSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordSink {
    /// 打开数据库文件并确保表结构
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = db::open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 共享已有连接（调用方负责建表）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在事务中写入单条记录
    fn insert_record_tx(
        tx: &Transaction,
        record: &SinkRecord,
        tag: &str,
        schema_name: &str,
    ) -> RepositoryResult<RecordOutcome> {
        let row_index = record.row_index;

        // 同一会话同一行已写入过：视为成功（批次重试）
        let already: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM inventory_record WHERE session_tag = ?1 AND row_index = ?2",
                params![tag, row_index as i64],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(RecordOutcome::Written { row_index });
        }

        let values_json = serde_json::to_string(&record.values)?;
        let result = tx.execute(
            r#"
            INSERT INTO inventory_record (
                session_tag, row_index, schema_name, natural_key, values_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_tag, row_index) DO NOTHING
            "#,
            params![
                tag,
                row_index as i64,
                schema_name,
                record.natural_key,
                values_json,
                Utc::now().to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(RecordOutcome::Written { row_index }),
            Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ErrorCode::ConstraintViolation => {
                let reason = match &record.natural_key {
                    Some(key) => format!("自然键已存在: {}", key),
                    None => msg.unwrap_or_else(|| "约束冲突".to_string()),
                };
                warn!(row_index, reason = %reason, "记录被目标库拒绝");
                Ok(RecordOutcome::Rejected { row_index, reason })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn insert_batch(
        &self,
        records: Vec<SinkRecord>,
        tag: &str,
        schema_name: &str,
    ) -> RepositoryResult<Vec<RecordOutcome>> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut outcomes = Vec::with_capacity(records.len());
        for record in &records {
            outcomes.push(Self::insert_record_tx(&tx, record, tag, schema_name)?);
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        debug!(
            tag = %tag,
            written = outcomes.iter().filter(|o| o.is_written()).count(),
            total = outcomes.len(),
            "批次写入完成"
        );
        Ok(outcomes)
    }

    async fn delete_by_tag(&self, tag: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM inventory_record WHERE session_tag = ?1",
            params![tag],
        )?;
        Ok(deleted)
    }

    async fn count_by_tag(&self, tag: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM inventory_record WHERE session_tag = ?1",
            params![tag],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn existing_keys(
        &self,
        schema_name: &str,
        keys: &[String],
    ) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT natural_key FROM inventory_record WHERE schema_name = ?1 AND natural_key = ?2",
        )?;

        let mut existing = Vec::new();
        for key in keys {
            let found: Option<String> = stmt
                .query_row(params![schema_name, key], |row| row.get(0))
                .optional()?;
            if let Some(found) = found {
                existing.push(found);
            }
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::MappedRow;
    use tempfile::NamedTempFile;

    const INV: &str = "inventory";

    fn record(row_index: usize, key: &str) -> SinkRecord {
        let mut values = MappedRow::new();
        values.insert("sku".to_string(), key.to_string());
        SinkRecord {
            row_index,
            natural_key: Some(key.to_string()),
            values,
        }
    }

    fn make_sink() -> (NamedTempFile, SqliteRecordSink) {
        let temp = NamedTempFile::new().unwrap();
        let sink = SqliteRecordSink::new(temp.path().to_str().unwrap()).unwrap();
        (temp, sink)
    }

    #[tokio::test]
    async fn test_insert_batch_is_idempotent() {
        let (_temp, sink) = make_sink();
        let batch = vec![record(0, "A"), record(1, "B")];

        let first = sink.insert_batch(batch.clone(), "s1", INV).await.unwrap();
        let retry = sink.insert_batch(batch, "s1", INV).await.unwrap();

        assert!(first.iter().all(|o| o.is_written()));
        assert!(retry.iter().all(|o| o.is_written()));
        assert_eq!(sink.count_by_tag("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_natural_key_conflict_rejected() {
        let (_temp, sink) = make_sink();
        sink.insert_batch(vec![record(0, "A")], "s1", INV).await.unwrap();

        let outcomes = sink
            .insert_batch(vec![record(0, "A"), record(1, "C")], "s2", INV)
            .await
            .unwrap();
        assert!(matches!(outcomes[0], RecordOutcome::Rejected { row_index: 0, .. }));
        assert!(outcomes[1].is_written());
    }

    #[tokio::test]
    async fn test_delete_by_tag_only_touches_tag() {
        let (_temp, sink) = make_sink();
        sink.insert_batch(vec![record(0, "A")], "s1", INV).await.unwrap();
        sink.insert_batch(vec![record(0, "B")], "s2", INV).await.unwrap();

        assert_eq!(sink.delete_by_tag("s1").await.unwrap(), 1);
        assert_eq!(sink.count_by_tag("s1").await.unwrap(), 0);
        assert_eq!(sink.count_by_tag("s2").await.unwrap(), 1);

        let existing = sink
            .existing_keys(INV, &["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(existing, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_natural_key_scoped_by_schema() {
        let (_temp, sink) = make_sink();
        sink.insert_batch(vec![record(0, "A")], "s1", INV).await.unwrap();

        // 其他 Schema 的同名键互不冲突
        let outcomes = sink
            .insert_batch(vec![record(0, "A")], "s2", "supplier")
            .await
            .unwrap();
        assert!(outcomes[0].is_written());

        let keys = ["A".to_string()];
        assert_eq!(sink.existing_keys(INV, &keys).await.unwrap(), vec!["A".to_string()]);
        assert_eq!(sink.existing_keys("supplier", &keys).await.unwrap(), vec!["A".to_string()]);
        assert!(sink.existing_keys("other", &keys).await.unwrap().is_empty());
    }
}
