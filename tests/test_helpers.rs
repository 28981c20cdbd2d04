// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、ImportApi 构建、测试文件生成、故障注入 Sink
// ==========================================

#![allow(dead_code)]

use async_trait::async_trait;
use inventory_import::config::ConfigManager;
use inventory_import::db;
use inventory_import::domain::commit::{RecordOutcome, SinkRecord};
use inventory_import::repository::{
    ImportSessionRepositoryImpl, RecordSink, RepositoryError, RepositoryResult, SqliteRecordSink,
};
use inventory_import::{ImportApi, SchemaRegistry};
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// 测试 CSV 的表头（与内置库存 Schema 的标签/别名对应）
pub const INVENTORY_HEADER: &str = "SKU,Product Name,Qty,Unit Price";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 使用单一连接打开 ImportApi
pub fn create_test_api(db_path: &str) -> ImportApi {
    ImportApi::open(db_path, SchemaRegistry::with_builtin()).expect("Failed to open ImportApi")
}

/// 使用自定义 Sink 构建 ImportApi（会话库/配置使用独立连接）
pub fn create_api_with_sink(db_path: &str, sink: Arc<dyn RecordSink>) -> ImportApi {
    let sessions = ImportSessionRepositoryImpl::new(db_path).expect("Failed to create session repo");
    let config = ConfigManager::new(db_path).expect("Failed to create config");
    ImportApi::new(
        SchemaRegistry::with_builtin(),
        sink,
        Arc::new(sessions),
        Arc::new(config),
    )
}

/// 写入全局配置
pub fn set_config(db_path: &str, key: &str, value: &str) {
    let config = ConfigManager::new(db_path).expect("Failed to create config");
    config
        .set_config_value(key, value)
        .expect("Failed to set config");
}

/// 生成库存 CSV（自动加表头）
pub fn inventory_csv(rows: &[&str]) -> Vec<u8> {
    let mut content = String::from(INVENTORY_HEADER);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    content.into_bytes()
}

/// 统计目标库中指定会话写入的记录数
pub fn count_records(db_path: &str, tag: &str) -> usize {
    let conn = Connection::open(db_path).unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM inventory_record WHERE session_tag = ?1",
            params![tag],
            |row| row.get(0),
        )
        .unwrap();
    count as usize
}

/// 读取目标库中指定会话写入的记录（按行号排序）
pub fn fetch_records(db_path: &str, tag: &str) -> Vec<serde_json::Value> {
    let conn = Connection::open(db_path).unwrap();
    let mut stmt = conn
        .prepare("SELECT values_json FROM inventory_record WHERE session_tag = ?1 ORDER BY row_index")
        .unwrap();
    let rows = stmt
        .query_map(params![tag], |row| row.get::<_, String>(0))
        .unwrap();
    rows.map(|r| serde_json::from_str(&r.unwrap()).unwrap())
        .collect()
}

// ==========================================
// FlakySink - 第 N 个批次起写入失败（模拟断连）
// ==========================================
pub struct FlakySink {
    inner: SqliteRecordSink,
    ok_batches: usize,
    calls: AtomicUsize,
}

impl FlakySink {
    pub fn new(db_path: &str, ok_batches: usize) -> Self {
        Self {
            inner: SqliteRecordSink::new(db_path).expect("Failed to create sink"),
            ok_batches,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn insert_batch(
        &self,
        records: Vec<SinkRecord>,
        tag: &str,
        schema_name: &str,
    ) -> RepositoryResult<Vec<RecordOutcome>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.ok_batches {
            return Err(RepositoryError::DatabaseConnectionError(
                "模拟目标库断连".to_string(),
            ));
        }
        self.inner.insert_batch(records, tag, schema_name).await
    }

    async fn delete_by_tag(&self, tag: &str) -> RepositoryResult<usize> {
        self.inner.delete_by_tag(tag).await
    }

    async fn count_by_tag(&self, tag: &str) -> RepositoryResult<usize> {
        self.inner.count_by_tag(tag).await
    }

    async fn existing_keys(
        &self,
        schema_name: &str,
        keys: &[String],
    ) -> RepositoryResult<Vec<String>> {
        self.inner.existing_keys(schema_name, keys).await
    }
}
