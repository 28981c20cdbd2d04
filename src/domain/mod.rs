// ==========================================
// 库存表格批量导入系统 - 领域层
// ==========================================
// 职责: 会话/Schema/校验/转换/提交 的纯数据模型
// ==========================================

pub mod commit;
pub mod schema;
pub mod session;
pub mod transform;
pub mod types;
pub mod validation;

pub use commit::{CommitEvent, CommitProgress, CommitResult, RecordOutcome, RejectedRow, SinkRecord};
pub use schema::{SchemaField, SchemaRegistry, TargetSchema, INVENTORY_SCHEMA};
pub use session::{
    CellCorrection, CommitState, FieldMapping, ImportLogEntry, ImportOptions, ImportSession,
    MappedRow, MappingTarget, SourceFileMeta,
};
pub use transform::{RuleOperation, RulePredicate, TransformationRule};
pub use types::{FieldType, ImportOption, ImportStage, LogLevel};
pub use validation::{ErrorKind, ValidationError, ValidationResult};
