// ==========================================
// 库存表格批量导入系统 - 校验结果领域模型
// ==========================================
// 职责: 行级校验错误 + 汇总统计
// 红线: 修正后删除错误条目而非标记已解决，计数始终为真实剩余
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ==========================================
// ErrorKind - 校验错误类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MissingRequired,   // 必填为空
    TypeMismatch,      // 类型不符（数值无法解析）
    PrecisionExceeded, // 小数位超出策略精度
    InvalidDate,       // 日期格式错误
    InvalidBoolean,    // 布尔值无法识别
    DuplicateKey,      // 自然键重复
}

impl ErrorKind {
    /// 是否为单元格级检查（修正时可复查）
    pub fn is_cell_check(self) -> bool {
        !matches!(self, ErrorKind::DuplicateKey)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MissingRequired => write!(f, "MISSING_REQUIRED"),
            ErrorKind::TypeMismatch => write!(f, "TYPE_MISMATCH"),
            ErrorKind::PrecisionExceeded => write!(f, "PRECISION_EXCEEDED"),
            ErrorKind::InvalidDate => write!(f, "INVALID_DATE"),
            ErrorKind::InvalidBoolean => write!(f, "INVALID_BOOLEAN"),
            ErrorKind::DuplicateKey => write!(f, "DUPLICATE_KEY"),
        }
    }
}

// ==========================================
// ValidationError - 行级校验错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row_index: usize,              // 数据行下标（0 起，不含表头）
    pub field: String,                 // 目标字段 ID
    pub value: String,                 // 违规值
    pub kind: ErrorKind,               // 错误类型
    pub message: String,               // 错误描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>, // 建议修正值
}

// ==========================================
// ValidationResult - 校验结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub total_rows: usize,
    pub valid_row_count: usize,
    pub error_row_count: usize,
    pub duplicate_count: usize,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// 由错误列表重新汇总计数
    pub fn from_errors(total_rows: usize, errors: Vec<ValidationError>) -> Self {
        let error_rows: BTreeSet<usize> = errors.iter().map(|e| e.row_index).collect();
        let duplicate_count = errors
            .iter()
            .filter(|e| e.kind == ErrorKind::DuplicateKey)
            .count();

        Self {
            total_rows,
            valid_row_count: total_rows.saturating_sub(error_rows.len()),
            error_row_count: error_rows.len(),
            duplicate_count,
            errors,
        }
    }

    /// 重新汇总（错误列表被修改后调用）
    pub fn recount(&mut self) {
        let errors = std::mem::take(&mut self.errors);
        *self = Self::from_errors(self.total_rows, errors);
    }

    /// 有错误的行下标集合
    pub fn error_rows(&self) -> BTreeSet<usize> {
        self.errors.iter().map(|e| e.row_index).collect()
    }

    pub fn errors_for_row(&self, row_index: usize) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |e| e.row_index == row_index)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_error(row: usize, field: &str, kind: ErrorKind) -> ValidationError {
        ValidationError {
            row_index: row,
            field: field.to_string(),
            value: "x".to_string(),
            kind,
            message: "test".to_string(),
            suggested_fix: None,
        }
    }

    #[test]
    fn test_counts_distinct_rows() {
        let result = ValidationResult::from_errors(
            10,
            vec![
                make_error(2, "price", ErrorKind::TypeMismatch),
                make_error(2, "sku", ErrorKind::MissingRequired),
                make_error(5, "sku", ErrorKind::DuplicateKey),
            ],
        );

        assert_eq!(result.error_row_count, 2);
        assert_eq!(result.valid_row_count, 8);
        assert_eq!(result.duplicate_count, 1);
    }

    #[test]
    fn test_recount_after_removal() {
        let mut result = ValidationResult::from_errors(
            3,
            vec![make_error(0, "qty", ErrorKind::TypeMismatch)],
        );
        result.errors.clear();
        result.recount();

        assert_eq!(result.error_row_count, 0);
        assert_eq!(result.valid_row_count, 3);
    }
}
