// ==========================================
// 库存表格批量导入系统 - 领域类型定义
// ==========================================
// 职责: 导入阶段 / 字段类型 / 日志级别 / 导入选项
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 导入阶段 (Import Stage)
// ==========================================
// 红线: 阶段只能前进（替换文件的显式重置除外）
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStage {
    Upload,     // 已上传，待解析
    Mapping,    // 列映射
    Validating, // 校验中
    Correcting, // 人工修正
    Committing, // 提交中（可续传）
    Completed,  // 已完成
    Failed,     // 失败（可能部分写入）
    RolledBack, // 已回滚
}

impl ImportStage {
    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportStage::Completed | ImportStage::Failed | ImportStage::RolledBack
        )
    }

    /// 状态机边表
    ///
    /// 仅描述结构上允许的边，业务守卫（映射覆盖/错误数/回滚开关）
    /// 由 `ImportSession` 在迁移时检查。
    pub fn can_transition_to(self, next: ImportStage) -> bool {
        use ImportStage::*;
        match (self, next) {
            (Upload, Mapping) => true,
            (Mapping, Validating) => true,
            (Validating, Correcting) => true,
            (Correcting, Committing) => true,
            (Committing, Completed) | (Committing, Failed) => true,
            (Completed, RolledBack) | (Failed, RolledBack) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportStage::Upload => write!(f, "UPLOAD"),
            ImportStage::Mapping => write!(f, "MAPPING"),
            ImportStage::Validating => write!(f, "VALIDATING"),
            ImportStage::Correcting => write!(f, "CORRECTING"),
            ImportStage::Committing => write!(f, "COMMITTING"),
            ImportStage::Completed => write!(f, "COMPLETED"),
            ImportStage::Failed => write!(f, "FAILED"),
            ImportStage::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

// ==========================================
// 字段类型 (Field Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,    // 文本（不做格式校验）
    Integer, // 整数
    Decimal, // 小数（精度由策略决定）
    Date,    // 日期
    Boolean, // 布尔
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Decimal => write!(f, "decimal"),
            FieldType::Date => write!(f, "date"),
            FieldType::Boolean => write!(f, "boolean"),
        }
    }
}

// ==========================================
// 审计日志级别 (Log Level)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Success => write!(f, "success"),
        }
    }
}

// ==========================================
// 导入选项 (Import Option)
// ==========================================
// 用途: SetOption 操作的选项键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportOption {
    AllowPartialImport,
    EnableRollback,
    DetectDuplicates,
    ApplyTransformations,
}

impl fmt::Display for ImportOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportOption::AllowPartialImport => write!(f, "allowPartialImport"),
            ImportOption::EnableRollback => write!(f, "enableRollback"),
            ImportOption::DetectDuplicates => write!(f, "detectDuplicates"),
            ImportOption::ApplyTransformations => write!(f, "applyTransformations"),
        }
    }
}

impl std::str::FromStr for ImportOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "allowPartialImport" | "allow_partial_import" => Ok(ImportOption::AllowPartialImport),
            "enableRollback" | "enable_rollback" => Ok(ImportOption::EnableRollback),
            "detectDuplicates" | "detect_duplicates" => Ok(ImportOption::DetectDuplicates),
            "applyTransformations" | "apply_transformations" => {
                Ok(ImportOption::ApplyTransformations)
            }
            other => Err(format!("未知导入选项: {}", other)),
        }
    }
}
