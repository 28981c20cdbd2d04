// ==========================================
// 库存表格批量导入系统 - 提交领域模型
// ==========================================
// 职责: 落库记录 / 单条结果 / 提交汇总 / 进度事件
// ==========================================

use crate::domain::session::{ImportLogEntry, MappedRow};
use serde::{Deserialize, Serialize};

// ==========================================
// SinkRecord - 待写入目标库的记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub row_index: usize,            // 源数据行下标
    pub natural_key: Option<String>, // 自然键（多字段以 '|' 连接）
    pub values: MappedRow,           // 字段 ID → 值（已转换）
}

// ==========================================
// RecordOutcome - 单条写入结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordOutcome {
    Written { row_index: usize },
    Rejected { row_index: usize, reason: String },
}

impl RecordOutcome {
    pub fn row_index(&self) -> usize {
        match self {
            RecordOutcome::Written { row_index } => *row_index,
            RecordOutcome::Rejected { row_index, .. } => *row_index,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, RecordOutcome::Written { .. })
    }
}

// ==========================================
// RejectedRow - 被目标库拒绝的行
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub row_index: usize,
    pub reason: String,
}

// ==========================================
// CommitResult - 提交汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub total_rows: usize,
    pub success_rows: usize,
    pub failed_rows: usize,
    pub skipped_rows: usize,
    #[serde(default)]
    pub cancelled: bool,
    /// 失败后自动回滚的行数
    #[serde(default)]
    pub rolled_back_rows: usize,
}

// ==========================================
// CommitProgress - 提交进度（每个批次一次）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitProgress {
    pub processed_rows: usize,
    pub eligible_rows: usize,
    pub success_rows: usize,
    pub failed_rows: usize,
    pub skipped_rows: usize,
}

// ==========================================
// CommitEvent - 提交事件流
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CommitEvent {
    Progress(CommitProgress),
    Log(ImportLogEntry),
}
