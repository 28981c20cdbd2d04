// ==========================================
// 库存表格批量导入系统 - 导入会话状态机
// ==========================================
// 流程: UPLOAD → MAPPING → VALIDATING → CORRECTING → COMMITTING
//       → { COMPLETED | FAILED | ROLLED_BACK }
// 职责: 阶段迁移与业务守卫的唯一入口
// 红线: 终态会话只允许回滚迁移；replace_file 为唯一的显式后退
// ==========================================

use crate::domain::schema::TargetSchema;
use crate::domain::session::{CommitState, FieldMapping, ImportOptions, ImportSession, SourceFileMeta};
use crate::domain::transform::TransformationRule;
use crate::domain::types::{ImportStage, LogLevel};
use crate::importer::error::{ImportResult, ParseError, SessionError};
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::importer_trait::ParsedTable;
use crate::importer::mapping_resolver::{self, MappingEntry};
use crate::importer::transformer;
use crate::importer::validator::{self, ValidationPolicy};
use tracing::{info, instrument, warn};

/// 映射确定前可编辑的阶段
const EDITABLE_STAGES: [ImportStage; 4] = [
    ImportStage::Upload,
    ImportStage::Mapping,
    ImportStage::Validating,
    ImportStage::Correcting,
];

// ==========================================
// 守卫
// ==========================================

/// 当前阶段必须在允许列表内（终态优先报 Terminal）
pub fn ensure_stage(
    session: &ImportSession,
    allowed: &[ImportStage],
    operation: &'static str,
) -> Result<(), SessionError> {
    if session.stage.is_terminal() {
        return Err(SessionError::Terminal {
            stage: session.stage,
        });
    }
    if !allowed.contains(&session.stage) {
        return Err(SessionError::WrongStage {
            stage: session.stage,
            operation,
        });
    }
    Ok(())
}

pub fn ensure_editable(session: &ImportSession, operation: &'static str) -> Result<(), SessionError> {
    ensure_stage(session, &EDITABLE_STAGES, operation)
}

/// 回滚守卫: 开启回滚，且会话为 COMPLETED 或部分写入的 FAILED
pub fn ensure_can_rollback(session: &ImportSession) -> Result<(), SessionError> {
    if !session.options.enable_rollback {
        return Err(SessionError::RollbackDisabled);
    }
    if !(session.stage == ImportStage::Completed || session.is_failed_partial()) {
        return Err(SessionError::RollbackNotAllowed(session.stage));
    }
    Ok(())
}

/// 阶段迁移（结构边 + 业务守卫）
pub fn transition(
    session: &mut ImportSession,
    next: ImportStage,
    schema: &TargetSchema,
) -> ImportResult<()> {
    let current = session.stage;

    if current.is_terminal() && next != ImportStage::RolledBack {
        return Err(SessionError::Terminal { stage: current }.into());
    }
    if !current.can_transition_to(next) {
        return Err(SessionError::InvalidTransition {
            from: current,
            to: next,
        }
        .into());
    }

    match (current, next) {
        (ImportStage::Upload, ImportStage::Mapping) => {
            if session.row_count() == 0 {
                return Err(ParseError::NoDataRows.into());
            }
        }
        (ImportStage::Mapping, ImportStage::Validating) => {
            mapping_resolver::check_coverage(&session.mapping, schema)?;
        }
        (ImportStage::Correcting, ImportStage::Committing) => {
            let validation = session
                .validation
                .as_ref()
                .ok_or(SessionError::NotValidated)?;
            if validation.error_row_count > 0 && !session.options.allow_partial_import {
                return Err(SessionError::BlockingErrors {
                    error_rows: validation.error_row_count,
                }
                .into());
            }
        }
        (_, ImportStage::RolledBack) => ensure_can_rollback(session)?,
        _ => {}
    }

    session.set_stage(next);
    session.log(LogLevel::Info, format!("阶段迁移: {} → {}", current, next));
    info!(session_id = %session.session_id, from = %current, to = %next, "阶段迁移");
    Ok(())
}

// ==========================================
// 上传 / 替换文件
// ==========================================

fn source_meta(file_name: &str, extension: &str, bytes: &[u8], table: &ParsedTable) -> SourceFileMeta {
    SourceFileMeta {
        file_name: file_name.to_string(),
        extension: extension.to_string(),
        byte_size: bytes.len(),
        encoding: table.encoding.clone(),
        delimiter: table.delimiter,
        sheet_name: table.sheet_name.clone(),
    }
}

fn parse_upload(file_name: &str, bytes: &[u8]) -> ImportResult<(SourceFileMeta, ParsedTable)> {
    let extension = UniversalFileParser::extension_of(file_name);
    let table = UniversalFileParser.parse(bytes, &extension)?;
    if table.rows.is_empty() {
        return Err(ParseError::NoDataRows.into());
    }
    let meta = source_meta(file_name, &extension, bytes, &table);
    Ok((meta, table))
}

/// 上传 → 解析 → 进入映射阶段
///
/// 解析失败不创建会话。
#[instrument(skip(schema, bytes, options), fields(size = bytes.len()))]
pub fn start_session(
    schema: &TargetSchema,
    file_name: &str,
    bytes: &[u8],
    options: ImportOptions,
) -> ImportResult<ImportSession> {
    let (meta, table) = parse_upload(file_name, bytes)?;

    let mut session = ImportSession::new(&schema.name, meta, table.headers, table.rows, options);
    session.log(
        LogLevel::Info,
        format!(
            "上传文件 {}（{} 字节），解析 {} 列 {} 行",
            file_name,
            bytes.len(),
            session.headers.len(),
            session.row_count()
        ),
    );

    transition(&mut session, ImportStage::Mapping, schema)?;
    Ok(session)
}

/// 替换源文件：重置到映射阶段，清空映射/修正/校验
pub fn replace_file(
    mut session: ImportSession,
    file_name: &str,
    bytes: &[u8],
) -> ImportResult<ImportSession> {
    ensure_editable(&session, "replace_file")?;
    let (meta, table) = parse_upload(file_name, bytes)?;

    let previous = std::mem::replace(&mut session.source, meta);
    session.headers = table.headers;
    session.raw_rows = table.rows;
    session.mapping = FieldMapping::new();
    session.corrections.clear();
    session.validation = None;
    session.commit = CommitState::default();
    session.set_stage(ImportStage::Mapping);

    let message = format!(
        "替换源文件: {} → {}（{} 行），映射/修正/校验结果已清空",
        previous.file_name,
        file_name,
        session.row_count()
    );
    warn!(session_id = %session.session_id, "{}", message);
    session.log(LogLevel::Warning, message);
    Ok(session)
}

// ==========================================
// 映射 / 校验 / 转换规则
// ==========================================

pub fn set_mapping(
    session: ImportSession,
    schema: &TargetSchema,
    entries: &[MappingEntry],
) -> ImportResult<(ImportSession, Vec<String>)> {
    ensure_stage(&session, &[ImportStage::Mapping], "set_mapping")?;
    mapping_resolver::apply(session, schema, entries)
}

/// 执行校验：MAPPING → VALIDATING → CORRECTING；CORRECTING 阶段可重跑
pub fn run_validation(
    mut session: ImportSession,
    schema: &TargetSchema,
    policy: &ValidationPolicy,
) -> ImportResult<ImportSession> {
    ensure_stage(
        &session,
        &[ImportStage::Mapping, ImportStage::Correcting],
        "run_validation",
    )?;

    let rerun = session.stage == ImportStage::Correcting;
    if !rerun {
        transition(&mut session, ImportStage::Validating, schema)?;
    }

    let result = validator::validate(&session, schema, policy);
    let (level, message) = if result.has_errors() {
        (
            LogLevel::Warning,
            format!(
                "校验完成: 共 {} 行，有效 {} 行，错误 {} 行（重复 {}）",
                result.total_rows,
                result.valid_row_count,
                result.error_row_count,
                result.duplicate_count
            ),
        )
    } else {
        (
            LogLevel::Success,
            format!("校验完成: 共 {} 行，全部有效", result.total_rows),
        )
    };
    session.validation = Some(result);
    session.log(level, message);

    if !rerun {
        transition(&mut session, ImportStage::Correcting, schema)?;
    }
    Ok(session)
}

pub fn set_transformation_rules(
    mut session: ImportSession,
    schema: &TargetSchema,
    rules: Vec<TransformationRule>,
) -> ImportResult<ImportSession> {
    ensure_editable(&session, "set_transformation_rules")?;
    transformer::check_rules(&rules, schema)?;

    session.log(LogLevel::Info, format!("设置转换规则 {} 条", rules.len()));
    session.transformation_rules = rules;
    Ok(session)
}

/// 进入（或恢复）提交阶段
pub fn begin_commit(session: &mut ImportSession, schema: &TargetSchema) -> ImportResult<()> {
    if session.stage == ImportStage::Committing {
        session.log(
            LogLevel::Info,
            format!(
                "恢复提交: 已写入 {} 行，继续处理剩余行",
                session.commit.written_rows.len()
            ),
        );
        return Ok(());
    }
    ensure_stage(session, &[ImportStage::Correcting], "commit")?;
    transition(session, ImportStage::Committing, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::error::{ImportError, MappingError};

    const CSV: &str = "SKU,Name,Qty\nA-1,Bolt,3\nA-2,,x\n";

    fn mapped_session() -> ImportSession {
        let schema = TargetSchema::inventory();
        let session =
            start_session(&schema, "stock.csv", CSV.as_bytes(), ImportOptions::default()).unwrap();
        let entries = [
            MappingEntry::field("SKU", "sku"),
            MappingEntry::field("Name", "name"),
            MappingEntry::field("Qty", "quantity"),
        ];
        set_mapping(session, &schema, &entries).unwrap().0
    }

    #[test]
    fn test_start_session_enters_mapping() {
        let session = mapped_session();
        assert_eq!(session.stage, ImportStage::Mapping);
        assert_eq!(session.row_count(), 2);
        assert_eq!(session.source.extension, "csv");
    }

    #[test]
    fn test_start_session_rejects_header_only_file() {
        let schema = TargetSchema::inventory();
        let result = start_session(&schema, "e.csv", b"SKU,Name\n", ImportOptions::default());
        assert!(matches!(result, Err(ImportError::Parse(ParseError::NoDataRows))));
    }

    #[test]
    fn test_validation_blocked_until_required_mapped() {
        let schema = TargetSchema::inventory();
        let session =
            start_session(&schema, "stock.csv", CSV.as_bytes(), ImportOptions::default()).unwrap();
        let (session, _) =
            set_mapping(session, &schema, &[MappingEntry::field("SKU", "sku")]).unwrap();

        let result = run_validation(session, &schema, &ValidationPolicy::default());
        assert!(matches!(
            result,
            Err(ImportError::Mapping(MappingError::UnmappedRequired(_)))
        ));
    }

    #[test]
    fn test_commit_blocked_by_errors_without_partial() {
        let schema = TargetSchema::inventory();
        let mut session =
            run_validation(mapped_session(), &schema, &ValidationPolicy::default()).unwrap();
        assert_eq!(session.stage, ImportStage::Correcting);
        assert_eq!(session.error_row_count(), 1);

        let result = begin_commit(&mut session, &schema);
        assert!(matches!(
            result,
            Err(ImportError::Session(SessionError::BlockingErrors { error_rows: 1 }))
        ));
        assert_eq!(session.stage, ImportStage::Correcting);
    }

    #[test]
    fn test_set_mapping_rejected_after_validation() {
        let schema = TargetSchema::inventory();
        let session =
            run_validation(mapped_session(), &schema, &ValidationPolicy::default()).unwrap();
        let result = set_mapping(session, &schema, &[MappingEntry::ignore("Qty")]);
        assert!(matches!(
            result,
            Err(ImportError::Session(SessionError::WrongStage { .. }))
        ));
    }

    #[test]
    fn test_replace_file_resets_to_mapping() {
        let schema = TargetSchema::inventory();
        let session =
            run_validation(mapped_session(), &schema, &ValidationPolicy::default()).unwrap();
        let session = replace_file(session, "v2.csv", b"Item,Qty\nB-1,4\n").unwrap();

        assert_eq!(session.stage, ImportStage::Mapping);
        assert!(session.mapping.is_empty());
        assert!(session.validation.is_none());
        assert_eq!(session.headers, vec!["Item", "Qty"]);
        assert_eq!(session.audit_log.last().unwrap().level, LogLevel::Warning);
    }

    #[test]
    fn test_terminal_session_rejects_edits() {
        let schema = TargetSchema::inventory();
        let mut session = mapped_session();
        session.set_stage(ImportStage::Completed);

        let result = set_mapping(session.clone(), &schema, &[]);
        assert!(matches!(
            result,
            Err(ImportError::Session(SessionError::Terminal { .. }))
        ));
        let result = transition(&mut session, ImportStage::Mapping, &schema);
        assert!(result.is_err());
    }
}
