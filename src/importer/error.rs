// ==========================================
// 库存表格批量导入系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 解析错误（会话前，致命）/ 映射错误（阻断，可重映射）
//       会话错误（非法迁移/守卫失败）/ 存储错误（基础设施）
// ==========================================

use crate::domain::types::ImportStage;
use thiserror::Error;

// ==========================================
// ParseError - 文件解析错误（不创建会话）
// ==========================================
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("文件格式不支持: {0}（仅支持 .csv/.tsv/.txt/.xlsx/.xlsm/.xls）")]
    UnsupportedFormat(String),

    #[error("文件已损坏或无法解析: {0}")]
    Corrupt(String),

    #[error("文件编码无法识别: {0}")]
    Encoding(String),

    #[error("文件为空")]
    EmptyFile,

    #[error("未找到表头")]
    NoHeaders,

    #[error("文件无数据行")]
    NoDataRows,
}

// 实现 From<csv::Error>
impl From<csv::Error> for ParseError {
    fn from(err: csv::Error) -> Self {
        ParseError::Corrupt(format!("CSV 解析失败: {}", err))
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ParseError {
    fn from(err: calamine::Error) -> Self {
        ParseError::Corrupt(format!("Excel 解析失败: {}", err))
    }
}

// ==========================================
// MappingError - 映射错误（阻断推进）
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("必填字段未映射: {}", .0.join(", "))]
    UnmappedRequired(Vec<String>),

    #[error("必填字段 {field} 被多列映射: {}", .columns.join(", "))]
    AmbiguousMapping { field: String, columns: Vec<String> },

    #[error("源列不存在: {0}")]
    UnknownColumn(String),

    #[error("目标字段不存在: {0}")]
    UnknownField(String),
}

// ==========================================
// SessionError - 会话状态机错误
// ==========================================
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("无效的阶段迁移: from={from} to={to}")]
    InvalidTransition { from: ImportStage, to: ImportStage },

    #[error("会话已结束（{stage}），不可修改；请新建导入会话")]
    Terminal { stage: ImportStage },

    #[error("当前阶段 {stage} 不允许操作: {operation}")]
    WrongStage {
        stage: ImportStage,
        operation: &'static str,
    },

    #[error("仍有 {error_rows} 行存在错误，且未开启部分导入")]
    BlockingErrors { error_rows: usize },

    #[error("尚未执行校验")]
    NotValidated,

    #[error("会话未开启回滚")]
    RollbackDisabled,

    #[error("当前阶段 {0} 不允许回滚（需 COMPLETED 或部分写入的 FAILED）")]
    RollbackNotAllowed(ImportStage),

    #[error("行号越界: {row_index}（共 {total} 行）")]
    RowOutOfRange { row_index: usize, total: usize },

    #[error("字段 {0} 未映射到任何源列")]
    FieldNotMapped(String),

    #[error("Schema 不存在: {0}")]
    UnknownSchema(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

// ==========================================
// ImportError - 导入流程统一错误
// ==========================================
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),

    #[error("映射错误: {0}")]
    Mapping(#[from] MappingError),

    #[error("会话错误: {0}")]
    Session(#[from] SessionError),

    #[error("目标库错误: {0}")]
    Store(String),

    #[error("转换规则无效 ({field}): {message}")]
    InvalidRule { field: String, message: String },
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Store(err.to_string())
    }
}

// 实现 From<RepositoryError>
impl From<crate::repository::RepositoryError> for ImportError {
    fn from(err: crate::repository::RepositoryError) -> Self {
        ImportError::Store(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
