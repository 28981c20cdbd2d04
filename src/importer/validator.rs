// ==========================================
// 库存表格批量导入系统 - 校验引擎
// ==========================================
// 职责: 必填 / 类型 / 精度 / 日期 / 布尔 / 自然键重复 校验
// 红线: 纯函数、确定性（相同输入 → 相同有序错误列表）
// 并行: 行数超过阈值时按行并行（rayon），结果统一排序
// ==========================================

use crate::domain::schema::{SchemaField, TargetSchema};
use crate::domain::session::{ImportSession, MappedRow};
use crate::domain::types::FieldType;
use crate::domain::validation::{ErrorKind, ValidationError, ValidationResult};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

/// 合法日期格式
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

/// 可建议修正为标准日期的格式
const LENIENT_DATE_FORMATS: [&str; 5] = [
    "%Y.%m.%d",
    "%Y_%m_%d",
    "%Y年%m月%d日",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const TRUE_SPELLINGS: [&str; 6] = ["true", "1", "y", "yes", "t", "是"];
const FALSE_SPELLINGS: [&str; 6] = ["false", "0", "n", "no", "f", "否"];

// ==========================================
// ValidationPolicy - 校验策略
// ==========================================
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub decimal_precision: u32,             // 默认小数精度
    pub parallel_threshold: usize,          // 并行校验行数阈值
    pub existing_keys: HashSet<String>,     // 目标库已存在的自然键
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            decimal_precision: 2,
            parallel_threshold: 1000,
            existing_keys: HashSet::new(),
        }
    }
}

impl ValidationPolicy {
    pub fn precision_for(&self, field: &SchemaField) -> u32 {
        field.precision.unwrap_or(self.decimal_precision)
    }
}

// ==========================================
// CellIssue - 单元格检查结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellIssue {
    pub kind: ErrorKind,
    pub message: String,
    pub suggested_fix: Option<String>,
}

impl CellIssue {
    fn new(kind: ErrorKind, message: String, suggested_fix: Option<String>) -> Self {
        Self {
            kind,
            message,
            suggested_fix,
        }
    }

    pub fn into_error(self, row_index: usize, field_id: &str, value: &str) -> ValidationError {
        ValidationError {
            row_index,
            field: field_id.to_string(),
            value: value.to_string(),
            kind: self.kind,
            message: self.message,
            suggested_fix: self.suggested_fix,
        }
    }
}

// ==========================================
// 单元格检查（校验与修正共用）
// ==========================================

/// 检查单个单元格；合法返回 None
pub fn check_cell(field: &SchemaField, value: &str, policy: &ValidationPolicy) -> Option<CellIssue> {
    let value = value.trim();

    if value.is_empty() {
        return field.required.then(|| {
            CellIssue::new(
                ErrorKind::MissingRequired,
                format!("必填字段 {} 为空", field.label),
                None,
            )
        });
    }

    match field.field_type {
        FieldType::Text => None,
        FieldType::Integer => check_integer(field, value),
        FieldType::Decimal => check_decimal(field, value, policy.precision_for(field)),
        FieldType::Date => check_date(field, value),
        FieldType::Boolean => check_boolean(field, value),
    }
}

/// 去除千分位与货币符号
fn strip_number_noise(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '_' | '$' | '¥' | '€' | '£'))
        .collect()
}

/// 纯十进制数字（可选符号，至多一个小数点）
fn is_plain_decimal(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next();

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    match frac_part {
        None => !int_part.is_empty() && all_digits(int_part),
        Some(frac) => {
            (!int_part.is_empty() || !frac.is_empty()) && all_digits(int_part) && all_digits(frac)
        }
    }
}

fn decimal_places(value: &str) -> usize {
    value.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}

fn round_to(value: &str, places: u32) -> Option<String> {
    let number: f64 = value.parse().ok()?;
    Some(format!("{:.*}", places as usize, number))
}

fn check_integer(field: &SchemaField, value: &str) -> Option<CellIssue> {
    if value.parse::<i64>().is_ok() {
        return None;
    }

    let stripped = strip_number_noise(value);
    let suggested_fix = if stripped.parse::<i64>().is_ok() {
        Some(stripped)
    } else if is_plain_decimal(&stripped) {
        // "3.0" 之类的整数值
        stripped
            .parse::<f64>()
            .ok()
            .filter(|n| n.fract() == 0.0)
            .map(|n| format!("{}", n as i64))
    } else {
        None
    };

    Some(CellIssue::new(
        ErrorKind::TypeMismatch,
        format!("{} 应为整数: {}", field.label, value),
        suggested_fix,
    ))
}

fn check_decimal(field: &SchemaField, value: &str, precision: u32) -> Option<CellIssue> {
    if !is_plain_decimal(value) {
        let stripped = strip_number_noise(value);
        let suggested_fix = if is_plain_decimal(&stripped) {
            if decimal_places(&stripped) > precision as usize {
                round_to(&stripped, precision)
            } else {
                Some(stripped)
            }
        } else {
            None
        };
        return Some(CellIssue::new(
            ErrorKind::TypeMismatch,
            format!("{} 应为数值: {}", field.label, value),
            suggested_fix,
        ));
    }

    if decimal_places(value) > precision as usize {
        return Some(CellIssue::new(
            ErrorKind::PrecisionExceeded,
            format!("{} 小数位超过 {} 位: {}", field.label, precision, value),
            round_to(value, precision),
        ));
    }

    None
}

/// 解析合法日期（校验与转换共用）
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn check_date(field: &SchemaField, value: &str) -> Option<CellIssue> {
    if parse_date(value).is_some() {
        return None;
    }

    let suggested_fix = LENIENT_DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(value, fmt)
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(value, fmt)
                    .ok()
                    .map(|dt| dt.date())
            })
            .map(|d| d.format("%Y-%m-%d").to_string())
    });

    Some(CellIssue::new(
        ErrorKind::InvalidDate,
        format!("{} 日期格式错误（应为 YYYY-MM-DD）: {}", field.label, value),
        suggested_fix,
    ))
}

/// 解析布尔拼写
pub fn parse_boolean(value: &str) -> Option<bool> {
    let lower = value.trim().to_lowercase();
    if TRUE_SPELLINGS.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_SPELLINGS.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

fn check_boolean(field: &SchemaField, value: &str) -> Option<CellIssue> {
    if parse_boolean(value).is_some() {
        return None;
    }

    let suggested_fix = match value.to_lowercase().as_str() {
        "on" | "enabled" | "active" | "√" | "✓" | "x" => Some("true".to_string()),
        "off" | "disabled" | "inactive" | "×" | "-" => Some("false".to_string()),
        _ => None,
    };

    Some(CellIssue::new(
        ErrorKind::InvalidBoolean,
        format!("{} 无法识别为布尔值: {}", field.label, value),
        suggested_fix,
    ))
}

// ==========================================
// 自然键重复检测
// ==========================================

/// 行的自然键（任一键字段为空 → 不参与重复检测）
pub fn natural_key_of(row: &MappedRow, schema: &TargetSchema) -> Option<String> {
    if schema.natural_key.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(schema.natural_key.len());
    for key_field in &schema.natural_key {
        let value = row.get(key_field).map(|v| v.trim()).unwrap_or("");
        if value.is_empty() {
            return None;
        }
        parts.push(value);
    }
    Some(parts.join("|"))
}

fn duplicate_error(
    row_index: usize,
    key: &str,
    schema: &TargetSchema,
    first_row: Option<usize>,
) -> ValidationError {
    let message = match first_row {
        Some(first) => format!("自然键重复: {}（首次出现于第 {} 行）", key, first + 1),
        None => format!("自然键已存在于目标库: {}", key),
    };
    ValidationError {
        row_index,
        field: schema.natural_key.first().cloned().unwrap_or_default(),
        value: key.to_string(),
        kind: ErrorKind::DuplicateKey,
        message,
        suggested_fix: None,
    }
}

/// 检测重复（同文件内首次出现不标记，后续出现标记）
pub fn detect_duplicates(
    rows: &[MappedRow],
    schema: &TargetSchema,
    existing_keys: &HashSet<String>,
) -> Vec<ValidationError> {
    let mut first_occurrence: HashMap<String, usize> = HashMap::new();
    let mut duplicates = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(key) = natural_key_of(row, schema) else {
            continue;
        };

        if let Some(&first) = first_occurrence.get(&key) {
            duplicates.push(duplicate_error(row_index, &key, schema, Some(first)));
        } else {
            first_occurrence.insert(key.clone(), row_index);
            // 跨批次重复
            if existing_keys.contains(&key) {
                duplicates.push(duplicate_error(row_index, &key, schema, None));
            }
        }
    }

    duplicates
}

// ==========================================
// validate - 全量校验
// ==========================================

fn validate_row(
    row_index: usize,
    row: &MappedRow,
    fields: &[&SchemaField],
    policy: &ValidationPolicy,
) -> Vec<ValidationError> {
    fields
        .iter()
        .filter_map(|field| {
            let value = row.get(&field.id).map(|v| v.as_str()).unwrap_or("");
            check_cell(field, value, policy).map(|issue| issue.into_error(row_index, &field.id, value))
        })
        .collect()
}

/// 错误排序: 行 → Schema 字段顺序 → 错误类型
pub fn sort_errors(errors: &mut [ValidationError], schema: &TargetSchema) {
    errors.sort_by(|a, b| {
        a.row_index
            .cmp(&b.row_index)
            .then(schema.field_position(&a.field).cmp(&schema.field_position(&b.field)))
            .then(a.kind.cmp(&b.kind))
    });
}

#[instrument(skip(session, schema, policy), fields(session_id = %session.session_id))]
pub fn validate(
    session: &ImportSession,
    schema: &TargetSchema,
    policy: &ValidationPolicy,
) -> ValidationResult {
    let rows = session.mapped_rows();

    // 仅校验已映射的字段（必填字段已由映射覆盖检查保证）
    let fields: Vec<&SchemaField> = schema
        .fields
        .iter()
        .filter(|f| session.column_for_field(&f.id).is_some())
        .collect();

    let mut errors: Vec<ValidationError> = if rows.len() >= policy.parallel_threshold {
        debug!(rows = rows.len(), "并行校验");
        rows.par_iter()
            .enumerate()
            .flat_map_iter(|(idx, row)| validate_row(idx, row, &fields, policy))
            .collect()
    } else {
        rows.iter()
            .enumerate()
            .flat_map(|(idx, row)| validate_row(idx, row, &fields, policy))
            .collect()
    };

    if session.options.detect_duplicates {
        errors.extend(detect_duplicates(&rows, schema, &policy.existing_keys));
    }

    sort_errors(&mut errors, schema);
    let result = ValidationResult::from_errors(rows.len(), errors);

    info!(
        total = result.total_rows,
        valid = result.valid_row_count,
        error_rows = result.error_row_count,
        duplicates = result.duplicate_count,
        "校验完成"
    );
    result
}
