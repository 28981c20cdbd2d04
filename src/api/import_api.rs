// ==========================================
// 库存表格批量导入系统 - 导入API
// ==========================================
// 职责: 封装导入会话全流程（上传/映射/校验/修正/提交/回滚/审计）
// 模式: 每个操作 加载会话 → 纯函数变换 → 保存会话
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfigReader};
use crate::db;
use crate::domain::commit::{CommitEvent, CommitResult};
use crate::domain::schema::{SchemaRegistry, TargetSchema};
use crate::domain::session::{ImportLogEntry, ImportSession};
use crate::domain::transform::TransformationRule;
use crate::domain::types::ImportOption;
use crate::importer::commit_executor::{CancelFlag, CommitExecutor};
use crate::importer::mapping_resolver::{self, MappingEntry, MappingSuggestion};
use crate::importer::validator::{self, ValidationPolicy};
use crate::importer::{correction, session_flow};
use crate::repository::{
    ImportSessionRepository, ImportSessionRepositoryImpl, RecordSink, SessionSummary,
    SqliteRecordSink,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument};

/// 配置读取错误 → ApiError
fn config_error(err: Box<dyn std::error::Error + Send + Sync>) -> ApiError {
    ApiError::ConfigError(err.to_string())
}

// ==========================================
// ImportApi
// ==========================================
pub struct ImportApi {
    schemas: SchemaRegistry,
    sink: Arc<dyn RecordSink>,
    sessions: Arc<dyn ImportSessionRepository>,
    config: Arc<dyn ImportConfigReader>,
}

impl ImportApi {
    /// 创建新的ImportApi实例
    pub fn new(
        schemas: SchemaRegistry,
        sink: Arc<dyn RecordSink>,
        sessions: Arc<dyn ImportSessionRepository>,
        config: Arc<dyn ImportConfigReader>,
    ) -> Self {
        Self {
            schemas,
            sink,
            sessions,
            config,
        }
    }

    /// 打开数据库文件，目标库 / 会话库 / 配置共用同一连接
    pub fn open(db_path: &str, schemas: SchemaRegistry) -> ApiResult<Self> {
        let conn = db::open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
        db::init_schema(&conn).map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        let conn = Arc::new(Mutex::new(conn));

        let config = ConfigManager::from_connection(conn.clone()).map_err(config_error)?;
        info!(db_path, schemas = ?schemas.names(), "导入API初始化完成");

        Ok(Self::new(
            schemas,
            Arc::new(SqliteRecordSink::from_connection(conn.clone())),
            Arc::new(ImportSessionRepositoryImpl::from_connection(conn)),
            Arc::new(config),
        ))
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn schema(&self, name: &str) -> ApiResult<&TargetSchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("Schema {} 不存在", name)))
    }

    async fn load(&self, session_id: &str) -> ApiResult<ImportSession> {
        self.sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("导入会话(id={})不存在", session_id)))
    }

    async fn load_with_schema(&self, session_id: &str) -> ApiResult<(ImportSession, &TargetSchema)> {
        let session = self.load(session_id).await?;
        let schema = self.schema(&session.schema_name)?;
        Ok((session, schema))
    }

    async fn save(&self, session: &ImportSession) -> ApiResult<()> {
        self.sessions.save(session).await?;
        Ok(())
    }

    /// 构建校验策略（配置 + 目标库已存在的自然键）
    async fn validation_policy(
        &self,
        session: &ImportSession,
        schema: &TargetSchema,
    ) -> ApiResult<ValidationPolicy> {
        let decimal_precision = self
            .config
            .get_decimal_precision()
            .await
            .map_err(config_error)?;
        let parallel_threshold = self
            .config
            .get_parallel_validation_threshold()
            .await
            .map_err(config_error)?;

        let mut existing_keys = HashSet::new();
        if session.options.detect_duplicates && !schema.natural_key.is_empty() {
            let keys: Vec<String> = session
                .mapped_rows()
                .iter()
                .filter_map(|row| validator::natural_key_of(row, schema))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !keys.is_empty() {
                existing_keys.extend(self.sink.existing_keys(&schema.name, &keys).await?);
            }
        }

        Ok(ValidationPolicy {
            decimal_precision,
            parallel_threshold,
            existing_keys,
        })
    }

    // ==========================================
    // 上传 / 映射
    // ==========================================

    /// 上传文件并创建会话（解析失败不创建会话）
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn start_import(
        &self,
        schema_name: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> ApiResult<ImportSession> {
        let schema = self.schema(schema_name)?;
        let options = self.config.get_default_options().await.map_err(config_error)?;

        let session = session_flow::start_session(schema, file_name, bytes, options)?;
        self.save(&session).await?;
        info!(session_id = %session.session_id, rows = session.row_count(), "创建导入会话");
        Ok(session)
    }

    /// 映射建议（纯函数，不修改会话）
    pub async fn suggest_mapping(&self, session_id: &str) -> ApiResult<Vec<MappingSuggestion>> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let min_confidence = self
            .config
            .get_suggestion_min_confidence()
            .await
            .map_err(config_error)?;
        Ok(mapping_resolver::suggest(&session.headers, schema, min_confidence))
    }

    /// 设置映射，返回会话与告警（同一字段被多列映射时以最后一列为准）
    pub async fn set_mapping(
        &self,
        session_id: &str,
        entries: &[MappingEntry],
    ) -> ApiResult<(ImportSession, Vec<String>)> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let (session, warnings) = session_flow::set_mapping(session, schema, entries)?;
        self.save(&session).await?;
        Ok((session, warnings))
    }

    /// 显式接受映射建议
    pub async fn accept_suggestions(
        &self,
        session_id: &str,
    ) -> ApiResult<(ImportSession, Vec<String>)> {
        let suggestions = self.suggest_mapping(session_id).await?;
        let (session, schema) = self.load_with_schema(session_id).await?;
        let entries = mapping_resolver::accept_suggestions(&suggestions, schema);
        let (session, warnings) = session_flow::set_mapping(session, schema, &entries)?;
        self.save(&session).await?;
        Ok((session, warnings))
    }

    /// 替换源文件（映射/修正/校验清空，回到映射阶段）
    pub async fn replace_file(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> ApiResult<ImportSession> {
        let session = self.load(session_id).await?;
        let session = session_flow::replace_file(session, file_name, bytes)?;
        self.save(&session).await?;
        Ok(session)
    }

    // ==========================================
    // 校验 / 修正 / 选项 / 转换规则
    // ==========================================

    pub async fn run_validation(&self, session_id: &str) -> ApiResult<ImportSession> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let policy = self.validation_policy(&session, schema).await?;
        let session = session_flow::run_validation(session, schema, &policy)?;
        self.save(&session).await?;
        Ok(session)
    }

    pub async fn correct_cell(
        &self,
        session_id: &str,
        row_index: usize,
        field_id: &str,
        value: &str,
    ) -> ApiResult<ImportSession> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let policy = self.validation_policy(&session, schema).await?;
        let session = correction::correct(session, schema, &policy, row_index, field_id, value)?;
        self.save(&session).await?;
        Ok(session)
    }

    pub async fn skip_all(&self, session_id: &str) -> ApiResult<ImportSession> {
        let session = self.load(session_id).await?;
        let session = correction::skip_all(session)?;
        self.save(&session).await?;
        Ok(session)
    }

    pub async fn set_option(
        &self,
        session_id: &str,
        option: ImportOption,
        value: bool,
    ) -> ApiResult<ImportSession> {
        let session = self.load(session_id).await?;
        let session = correction::set_option(session, option, value)?;
        self.save(&session).await?;
        Ok(session)
    }

    pub async fn set_transformation_rules(
        &self,
        session_id: &str,
        rules: Vec<TransformationRule>,
    ) -> ApiResult<ImportSession> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let session = session_flow::set_transformation_rules(session, schema, rules)?;
        self.save(&session).await?;
        Ok(session)
    }

    // ==========================================
    // 提交 / 回滚
    // ==========================================

    /// 提交（COMMITTING 阶段的会话从检查点继续）
    ///
    /// # 参数
    /// - cancel: 取消标记，批次间检查
    /// - events: 进度/日志事件通道（可选）
    #[instrument(skip(self, cancel, events))]
    pub async fn commit(
        &self,
        session_id: &str,
        cancel: &CancelFlag,
        events: Option<&UnboundedSender<CommitEvent>>,
    ) -> ApiResult<(ImportSession, CommitResult)> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let batch_size = self
            .config
            .get_commit_batch_size()
            .await
            .map_err(config_error)?;

        let executor = CommitExecutor::new(self.sink.clone(), self.sessions.clone(), batch_size);
        Ok(executor.commit(session, schema, cancel, events).await?)
    }

    /// 回滚会话写入的全部记录
    pub async fn rollback(&self, session_id: &str) -> ApiResult<(ImportSession, usize)> {
        let (session, schema) = self.load_with_schema(session_id).await?;
        let executor = CommitExecutor::new(self.sink.clone(), self.sessions.clone(), 1);
        Ok(executor.rollback(session, schema).await?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub async fn get_session(&self, session_id: &str) -> ApiResult<ImportSession> {
        self.load(session_id).await
    }

    pub async fn get_audit_log(&self, session_id: &str) -> ApiResult<Vec<ImportLogEntry>> {
        Ok(self.load(session_id).await?.audit_log)
    }

    pub async fn list_sessions(&self, limit: usize) -> ApiResult<Vec<SessionSummary>> {
        Ok(self.sessions.list_recent(limit).await?)
    }
}
