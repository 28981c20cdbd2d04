// ==========================================
// 库存表格批量导入系统 - 人工修正服务
// ==========================================
// 职责: 单元格修正 / 全部跳过 / 导入选项设置
// 红线: 修正只记录在修正表，原始行矩阵不变；
//       错误仅在新值通过复查时删除；计数由剩余错误重算
// ==========================================

use crate::domain::schema::TargetSchema;
use crate::domain::session::{CellCorrection, ImportSession};
use crate::domain::types::{ImportOption, ImportStage, LogLevel};
use crate::domain::validation::{ErrorKind, ValidationError};
use crate::importer::error::{ImportResult, MappingError, SessionError};
use crate::importer::session_flow::{ensure_editable, ensure_stage};
use crate::importer::validator::{self, ValidationPolicy};
use chrono::Utc;
use tracing::{debug, info};

/// 修正单元格并复查
pub fn correct(
    mut session: ImportSession,
    schema: &TargetSchema,
    policy: &ValidationPolicy,
    row_index: usize,
    field_id: &str,
    new_value: &str,
) -> ImportResult<ImportSession> {
    ensure_stage(&session, &[ImportStage::Correcting], "correct")?;

    let total = session.row_count();
    if row_index >= total {
        return Err(SessionError::RowOutOfRange { row_index, total }.into());
    }
    let field = schema
        .field(field_id)
        .ok_or_else(|| MappingError::UnknownField(field_id.to_string()))?;
    let column = session
        .column_for_field(field_id)
        .ok_or_else(|| SessionError::FieldNotMapped(field_id.to_string()))?
        .to_string();
    let mut validation = session.validation.take().ok_or(SessionError::NotValidated)?;

    let old_value = session.effective_value(row_index, field_id).unwrap_or_default();
    session.upsert_correction(CellCorrection {
        row_index,
        field: field_id.to_string(),
        column,
        value: new_value.to_string(),
        corrected_at: Utc::now(),
    });

    // 取出该单元格的旧错误；键字段修正时取出全部重复错误
    let recheck_duplicate = session.options.detect_duplicates && schema.is_key_field(field_id);
    let (removed, kept): (Vec<ValidationError>, Vec<ValidationError>) =
        validation.errors.into_iter().partition(|e| {
            (e.row_index == row_index && e.field == field_id && e.kind.is_cell_check())
                || (recheck_duplicate && e.kind == ErrorKind::DuplicateKey)
        });
    validation.errors = kept;

    // 复查: 单元格检查 + 全表重复检测（后续行的重复状态可能随之改变）
    let mut fresh: Vec<ValidationError> = validator::check_cell(field, new_value, policy)
        .map(|issue| issue.into_error(row_index, field_id, new_value))
        .into_iter()
        .collect();
    if recheck_duplicate {
        fresh.extend(validator::detect_duplicates(
            &session.mapped_rows(),
            schema,
            &policy.existing_keys,
        ));
    }

    session.log(
        LogLevel::Info,
        format!(
            "修正第 {} 行 {}: '{}' → '{}'",
            row_index + 1,
            field.label,
            old_value,
            new_value
        ),
    );
    let same = |a: &ValidationError, b: &ValidationError| {
        a.row_index == b.row_index && a.field == b.field && a.kind == b.kind
    };
    for resolved in removed
        .iter()
        .filter(|old| !fresh.iter().any(|f| same(f, old)))
    {
        session.log(
            LogLevel::Success,
            format!("已解决第 {} 行错误: {}", resolved.row_index + 1, resolved.message),
        );
    }
    for remaining in &fresh {
        if remaining.row_index == row_index {
            session.log(
                LogLevel::Warning,
                format!("修正后第 {} 行仍有错误: {}", row_index + 1, remaining.message),
            );
        } else if !removed.iter().any(|old| same(old, remaining)) {
            session.log(
                LogLevel::Warning,
                format!("修正后第 {} 行出现新错误: {}", remaining.row_index + 1, remaining.message),
            );
        }
    }

    validation.errors.extend(fresh);
    validator::sort_errors(&mut validation.errors, schema);
    validation.recount();
    debug!(
        session_id = %session.session_id,
        row_index,
        field = field_id,
        error_rows = validation.error_row_count,
        "修正完成"
    );
    session.validation = Some(validation);

    Ok(session)
}

/// 跳过全部错误行（开启部分导入，错误保留）
pub fn skip_all(mut session: ImportSession) -> ImportResult<ImportSession> {
    ensure_stage(&session, &[ImportStage::Correcting], "skip_all")?;

    session.options.allow_partial_import = true;
    let error_rows = session.error_row_count();
    session.log(
        LogLevel::Warning,
        format!("跳过全部错误: {} 行将不被导入（已开启部分导入）", error_rows),
    );
    info!(session_id = %session.session_id, error_rows, "跳过全部错误行");
    Ok(session)
}

/// 设置导入选项
pub fn set_option(
    mut session: ImportSession,
    option: ImportOption,
    value: bool,
) -> ImportResult<ImportSession> {
    ensure_editable(&session, "set_option")?;

    if session.options.get(option) != value {
        session.options.set(option, value);
        session.log(LogLevel::Info, format!("设置选项 {} = {}", option, value));
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::ImportOptions;
    use crate::importer::error::ImportError;
    use crate::importer::mapping_resolver::MappingEntry;
    use crate::importer::session_flow::{run_validation, set_mapping, start_session};

    fn validated(csv: &str) -> ImportSession {
        let schema = TargetSchema::inventory();
        let session =
            start_session(&schema, "s.csv", csv.as_bytes(), ImportOptions::default()).unwrap();
        let entries = [
            MappingEntry::field("SKU", "sku"),
            MappingEntry::field("Name", "name"),
            MappingEntry::field("Qty", "quantity"),
        ];
        let (session, _) = set_mapping(session, &schema, &entries).unwrap();
        run_validation(session, &schema, &ValidationPolicy::default()).unwrap()
    }

    #[test]
    fn test_correct_valid_value_removes_error() {
        let schema = TargetSchema::inventory();
        let session = validated("SKU,Name,Qty\nA,Bolt,x\n");
        assert_eq!(session.error_row_count(), 1);

        let session =
            correct(session, &schema, &ValidationPolicy::default(), 0, "quantity", "5").unwrap();
        let validation = session.validation.as_ref().unwrap();
        assert_eq!(validation.error_row_count, 0);
        assert_eq!(validation.valid_row_count, 1);
        assert_eq!(session.raw_rows[0][2], "x");
        assert!(session
            .audit_log
            .iter()
            .any(|e| e.level == LogLevel::Success && e.message.contains("应为整数")));
    }

    #[test]
    fn test_correct_invalid_value_keeps_error() {
        let schema = TargetSchema::inventory();
        let session = validated("SKU,Name,Qty\nA,Bolt,x\n");
        let session =
            correct(session, &schema, &ValidationPolicy::default(), 0, "quantity", "y").unwrap();

        let validation = session.validation.as_ref().unwrap();
        assert_eq!(validation.errors.len(), 1);
        assert_eq!(validation.errors[0].value, "y");
        assert_eq!(validation.error_row_count, 1);
    }

    #[test]
    fn test_correct_key_field_rechecks_duplicate() {
        let schema = TargetSchema::inventory();
        let session = validated("SKU,Name,Qty\nA,Bolt,1\nA,Nut,2\n");
        assert_eq!(session.validation.as_ref().unwrap().duplicate_count, 1);

        let session =
            correct(session, &schema, &ValidationPolicy::default(), 1, "sku", "B").unwrap();
        let validation = session.validation.as_ref().unwrap();
        assert_eq!(validation.duplicate_count, 0);
        assert_eq!(validation.error_row_count, 0);
    }

    #[test]
    fn test_correct_key_field_flags_later_row() {
        let schema = TargetSchema::inventory();
        let session = validated("SKU,Name,Qty\nA,Bolt,1\nB,Nut,2\n");
        assert_eq!(session.error_row_count(), 0);

        let session =
            correct(session, &schema, &ValidationPolicy::default(), 0, "sku", "B").unwrap();
        let validation = session.validation.as_ref().unwrap();
        assert_eq!(validation.duplicate_count, 1);
        assert_eq!(validation.errors[0].row_index, 1);
        assert_eq!(validation.errors[0].kind, ErrorKind::DuplicateKey);

        // 与全量校验一致
        let full = validator::validate(&session, &schema, &ValidationPolicy::default());
        assert_eq!(&full, validation);
    }

    #[test]
    fn test_correct_first_occurrence_clears_later_duplicate() {
        let schema = TargetSchema::inventory();
        let session = validated("SKU,Name,Qty\nA,Bolt,1\nA,Nut,2\n");
        assert_eq!(session.validation.as_ref().unwrap().errors[0].row_index, 1);

        let session =
            correct(session, &schema, &ValidationPolicy::default(), 0, "sku", "Z").unwrap();
        let validation = session.validation.as_ref().unwrap();
        assert!(validation.errors.is_empty());
        assert_eq!(validation.valid_row_count, 2);
        assert!(session
            .audit_log
            .iter()
            .any(|e| e.level == LogLevel::Success && e.message.starts_with("已解决第 2 行")));
    }

    #[test]
    fn test_correct_out_of_range() {
        let schema = TargetSchema::inventory();
        let session = validated("SKU,Name,Qty\nA,Bolt,x\n");
        let result = correct(session, &schema, &ValidationPolicy::default(), 9, "quantity", "1");
        assert!(matches!(
            result,
            Err(ImportError::Session(SessionError::RowOutOfRange { row_index: 9, total: 1 }))
        ));
    }

    #[test]
    fn test_skip_all_enables_partial_and_keeps_errors() {
        let session = validated("SKU,Name,Qty\nA,Bolt,x\n");
        let session = skip_all(session).unwrap();
        assert!(session.options.allow_partial_import);
        assert_eq!(session.error_row_count(), 1);
    }

    #[test]
    fn test_set_option_logs_change() {
        let session = validated("SKU,Name,Qty\nA,Bolt,1\n");
        let before = session.audit_log.len();
        let session = set_option(session, ImportOption::EnableRollback, false).unwrap();
        assert!(!session.options.enable_rollback);
        assert_eq!(session.audit_log.len(), before + 1);
    }
}
