// ==========================================
// 库存表格批量导入系统 - 导入会话 Repository
// ==========================================
// 职责: 会话快照持久化（JSON）/ 按 ID 加载 / 最近会话列表
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db;
use crate::domain::session::ImportSession;
use crate::domain::types::ImportStage;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ==========================================
// SessionSummary - 会话列表行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub schema_name: String,
    pub stage: ImportStage,
    pub file_name: String,
    pub row_count: usize,
    pub updated_at: String,
}

// ==========================================
// ImportSessionRepository Trait
// ==========================================
// 实现者: ImportSessionRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait ImportSessionRepository: Send + Sync {
    /// 保存会话快照（存在则覆盖）
    async fn save(&self, session: &ImportSession) -> RepositoryResult<()>;

    /// 按 ID 加载会话
    async fn find_by_id(&self, session_id: &str) -> RepositoryResult<Option<ImportSession>>;

    /// 最近更新的会话
    async fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<SessionSummary>>;
}

// ==========================================
// ImportSessionRepositoryImpl
// ==========================================
pub struct ImportSessionRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl ImportSessionRepositoryImpl {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = db::open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl ImportSessionRepository for ImportSessionRepositoryImpl {
    async fn save(&self, session: &ImportSession) -> RepositoryResult<()> {
        let session_json = serde_json::to_string(session)?;
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO import_session (
                session_id, schema_name, stage, file_name, row_count,
                session_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(session_id) DO UPDATE SET
                stage = excluded.stage,
                file_name = excluded.file_name,
                row_count = excluded.row_count,
                session_json = excluded.session_json,
                updated_at = excluded.updated_at
            "#,
            params![
                session.session_id,
                session.schema_name,
                session.stage.to_string(),
                session.source.file_name,
                session.row_count() as i64,
                session_json,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn find_by_id(&self, session_id: &str) -> RepositoryResult<Option<ImportSession>> {
        let conn = self.get_conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT session_json FROM import_session WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<SessionSummary>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, schema_name, stage, file_name, row_count, updated_at
            FROM import_session
            ORDER BY updated_at DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let stage: String = row.get(2)?;
            let row_count: i64 = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                stage,
                row.get::<_, String>(3)?,
                row_count,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (session_id, schema_name, stage, file_name, row_count, updated_at) = row?;
            // 阶段以 SCREAMING_SNAKE_CASE 存储，与 serde 格式一致
            let stage: ImportStage = serde_json::from_value(serde_json::Value::String(stage))?;
            summaries.push(SessionSummary {
                session_id,
                schema_name,
                stage,
                file_name,
                row_count: row_count as usize,
                updated_at,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{ImportOptions, SourceFileMeta};
    use tempfile::NamedTempFile;

    fn make_session(file_name: &str) -> ImportSession {
        let meta = SourceFileMeta {
            file_name: file_name.to_string(),
            extension: "csv".to_string(),
            byte_size: 10,
            encoding: None,
            delimiter: Some(','),
            sheet_name: None,
        };
        ImportSession::new(
            "inventory",
            meta,
            vec!["SKU".to_string()],
            vec![vec!["A".to_string()]],
            ImportOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let temp = NamedTempFile::new().unwrap();
        let repo = ImportSessionRepositoryImpl::new(temp.path().to_str().unwrap()).unwrap();

        let mut session = make_session("a.csv");
        repo.save(&session).await.unwrap();

        // 覆盖保存
        session.set_stage(ImportStage::Mapping);
        repo.save(&session).await.unwrap();

        let loaded = repo.find_by_id(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(repo.find_by_id("missing").await.unwrap().is_none());

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].stage, ImportStage::Mapping);
        assert_eq!(recent[0].file_name, "a.csv");
    }
}
