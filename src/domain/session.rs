// ==========================================
// 库存表格批量导入系统 - 导入会话领域模型
// ==========================================
// 职责: 导入会话聚合根（各阶段产出的唯一持有者）
// 用途: 持久化 / 续传 / 回滚的最小单元
// 红线: 审计日志只追加；原始行矩阵上传后不再修改
// ==========================================

use crate::domain::commit::{CommitResult, RejectedRow};
use crate::domain::transform::TransformationRule;
use crate::domain::types::{ImportOption, ImportStage, LogLevel};
use crate::domain::validation::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// 字段 ID → 单元格值
pub type MappedRow = BTreeMap<String, String>;

// ==========================================
// SourceFileMeta - 源文件元信息
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFileMeta {
    pub file_name: String,
    pub extension: String,
    pub byte_size: usize,
    #[serde(default)]
    pub encoding: Option<String>,  // CSV 探测编码
    #[serde(default)]
    pub delimiter: Option<char>,   // CSV 分隔符
    #[serde(default)]
    pub sheet_name: Option<String>, // Excel 工作表
}

// ==========================================
// ImportOptions - 导入选项
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub allow_partial_import: bool,
    pub enable_rollback: bool,
    pub detect_duplicates: bool,
    pub apply_transformations: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            allow_partial_import: false,
            enable_rollback: true,
            detect_duplicates: true,
            apply_transformations: true,
        }
    }
}

impl ImportOptions {
    pub fn get(&self, option: ImportOption) -> bool {
        match option {
            ImportOption::AllowPartialImport => self.allow_partial_import,
            ImportOption::EnableRollback => self.enable_rollback,
            ImportOption::DetectDuplicates => self.detect_duplicates,
            ImportOption::ApplyTransformations => self.apply_transformations,
        }
    }

    pub fn set(&mut self, option: ImportOption, value: bool) {
        match option {
            ImportOption::AllowPartialImport => self.allow_partial_import = value,
            ImportOption::EnableRollback => self.enable_rollback = value,
            ImportOption::DetectDuplicates => self.detect_duplicates = value,
            ImportOption::ApplyTransformations => self.apply_transformations = value,
        }
    }
}

// ==========================================
// MappingTarget / FieldMapping - 列映射
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum MappingTarget {
    Field(String),
    Ignore,
}

impl MappingTarget {
    pub fn field_id(&self) -> Option<&str> {
        match self {
            MappingTarget::Field(id) => Some(id.as_str()),
            MappingTarget::Ignore => None,
        }
    }
}

/// 源列名 → 映射目标（键唯一即保证"一列至多映射一个字段"）
pub type FieldMapping = BTreeMap<String, MappingTarget>;

// ==========================================
// CellCorrection - 人工修正
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCorrection {
    pub row_index: usize,
    pub field: String,
    pub column: String,
    pub value: String,
    pub corrected_at: DateTime<Utc>,
}

// ==========================================
// CommitState - 提交进度（可续传）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitState {
    pub written_rows: BTreeSet<usize>,
    pub rejected_rows: Vec<RejectedRow>,
    pub skipped_rows: BTreeSet<usize>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub auto_rolled_back: bool,
    #[serde(default)]
    pub rolled_back_count: usize,
    #[serde(default)]
    pub result: Option<CommitResult>,
}

// ==========================================
// ImportLogEntry - 审计日志条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: ImportStage,
    pub message: String,
}

// ==========================================
// ImportSession - 导入会话
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSession {
    // ===== 标识 =====
    pub session_id: String,
    pub schema_name: String,
    pub stage: ImportStage,

    // ===== 上传阶段产出 =====
    pub source: SourceFileMeta,
    pub headers: Vec<String>,
    pub raw_rows: Vec<Vec<String>>,

    // ===== 映射 / 校验 / 修正 =====
    #[serde(default)]
    pub mapping: FieldMapping,
    #[serde(default)]
    pub validation: Option<ValidationResult>,
    #[serde(default)]
    pub corrections: Vec<CellCorrection>,

    // ===== 选项与转换规则 =====
    pub options: ImportOptions,
    #[serde(default)]
    pub transformation_rules: Vec<TransformationRule>,

    // ===== 提交 =====
    #[serde(default)]
    pub commit: CommitState,

    // ===== 审计 =====
    #[serde(default)]
    pub audit_log: Vec<ImportLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportSession {
    /// 创建上传阶段会话
    pub fn new(
        schema_name: &str,
        source: SourceFileMeta,
        headers: Vec<String>,
        raw_rows: Vec<Vec<String>>,
        options: ImportOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            schema_name: schema_name.to_string(),
            stage: ImportStage::Upload,
            source,
            headers,
            raw_rows,
            mapping: FieldMapping::new(),
            validation: None,
            corrections: Vec::new(),
            options,
            transformation_rules: Vec::new(),
            commit: CommitState::default(),
            audit_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn row_count(&self) -> usize {
        self.raw_rows.len()
    }

    /// 追加审计日志（只追加）
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) -> &ImportLogEntry {
        let now = Utc::now();
        self.audit_log.push(ImportLogEntry {
            timestamp: now,
            level,
            stage: self.stage,
            message: message.into(),
        });
        self.updated_at = now;
        // 刚刚 push，必然存在
        &self.audit_log[self.audit_log.len() - 1]
    }

    /// 直接写入阶段（守卫由 session_flow 负责）
    pub(crate) fn set_stage(&mut self, stage: ImportStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// 映射到指定字段的源列（映射合法时至多一列）
    pub fn column_for_field(&self, field_id: &str) -> Option<&str> {
        self.mapping
            .iter()
            .filter(|(_, target)| target.field_id() == Some(field_id))
            .map(|(column, _)| column.as_str())
            .last()
    }

    /// 修正表：(行, 字段) → 值
    fn correction_index(&self) -> HashMap<(usize, &str), &str> {
        self.corrections
            .iter()
            .map(|c| ((c.row_index, c.field.as_str()), c.value.as_str()))
            .collect()
    }

    /// 记录修正（同一 (行, 字段) 后写覆盖先写）
    pub(crate) fn upsert_correction(&mut self, correction: CellCorrection) {
        self.corrections
            .retain(|c| !(c.row_index == correction.row_index && c.field == correction.field));
        self.corrections.push(correction);
        self.updated_at = Utc::now();
    }

    /// 单元格生效值（修正优先于原始值）
    pub fn effective_value(&self, row_index: usize, field_id: &str) -> Option<String> {
        if let Some(c) = self
            .corrections
            .iter()
            .rev()
            .find(|c| c.row_index == row_index && c.field == field_id)
        {
            return Some(c.value.clone());
        }

        let column = self.column_for_field(field_id)?;
        let col_idx = self.column_index(column)?;
        self.raw_rows
            .get(row_index)
            .map(|row| row.get(col_idx).cloned().unwrap_or_default())
    }

    /// 修正后的行矩阵（原始矩阵 + 修正映射，生成新矩阵）
    pub fn corrected_rows(&self) -> Vec<Vec<String>> {
        let index = self.correction_index();
        let field_columns: HashMap<&str, usize> = self
            .mapping
            .iter()
            .filter_map(|(column, target)| {
                let field = target.field_id()?;
                Some((field, self.column_index(column)?))
            })
            .collect();

        let mut rows = self.raw_rows.clone();
        for ((row_index, field), value) in index {
            if let (Some(row), Some(&col)) = (rows.get_mut(row_index), field_columns.get(field)) {
                if col >= row.len() {
                    row.resize(col + 1, String::new());
                }
                row[col] = value.to_string();
            }
        }
        rows
    }

    /// 按映射投影出 字段 → 生效值 的行
    pub fn mapped_rows(&self) -> Vec<MappedRow> {
        let corrected = self.corrected_rows();
        let projections: Vec<(usize, &str)> = self
            .mapping
            .iter()
            .filter_map(|(column, target)| Some((self.column_index(column)?, target.field_id()?)))
            .collect();

        corrected
            .iter()
            .map(|row| {
                projections
                    .iter()
                    .map(|(col, field)| {
                        (field.to_string(), row.get(*col).cloned().unwrap_or_default())
                    })
                    .collect()
            })
            .collect()
    }

    /// 提交失败且保留了部分写入
    pub fn is_failed_partial(&self) -> bool {
        self.stage == ImportStage::Failed
            && !self.commit.auto_rolled_back
            && !self.commit.written_rows.is_empty()
    }

    pub fn error_row_count(&self) -> usize {
        self.validation
            .as_ref()
            .map(|v| v.error_row_count)
            .unwrap_or(0)
    }
}
