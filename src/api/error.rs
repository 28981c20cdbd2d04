// ==========================================
// 库存表格批量导入系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换 Repository / Import 错误为用户友好的错误消息
// ==========================================

use crate::importer::error::{ImportError, SessionError};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
/// 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 导入流程错误
    // ==========================================
    #[error("文件解析失败: {0}")]
    ParseError(String),

    #[error("列映射无效: {0}")]
    MappingError(String),

    #[error("目标库写入失败: {0}")]
    StoreError(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("配置读取失败: {0}")]
    ConfigError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将Repository层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::SerializationError(msg) => {
                ApiError::InternalError(format!("会话快照损坏: {}", msg))
            }
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Parse(e) => ApiError::ParseError(e.to_string()),
            ImportError::Mapping(e) => ApiError::MappingError(e.to_string()),
            ImportError::Session(SessionError::InvalidTransition { from, to }) => {
                ApiError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            ImportError::Session(SessionError::Mapping(e)) => ApiError::MappingError(e.to_string()),
            ImportError::Session(SessionError::UnknownSchema(name)) => {
                ApiError::NotFound(format!("Schema {} 不存在", name))
            }
            ImportError::Session(
                e @ (SessionError::RowOutOfRange { .. } | SessionError::FieldNotMapped(_)),
            ) => ApiError::InvalidInput(e.to_string()),
            ImportError::Session(e) => ApiError::BusinessRuleViolation(e.to_string()),
            ImportError::InvalidRule { field, message } => {
                ApiError::InvalidInput(format!("转换规则无效 ({}): {}", field, message))
            }
            ImportError::Store(msg) => ApiError::StoreError(msg),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ImportStage;
    use crate::importer::error::{MappingError, ParseError};

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "ImportSession".to_string(),
            id: "S001".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("ImportSession"));
                assert!(msg.contains("S001"));
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn test_import_error_conversion() {
        let api_err: ApiError = ImportError::from(ParseError::EmptyFile).into();
        assert!(matches!(api_err, ApiError::ParseError(_)));

        let api_err: ApiError =
            ImportError::from(MappingError::UnmappedRequired(vec!["sku".into()])).into();
        match api_err {
            ApiError::MappingError(msg) => assert!(msg.contains("sku")),
            _ => panic!("Expected MappingError"),
        }

        let api_err: ApiError = ImportError::from(SessionError::InvalidTransition {
            from: ImportStage::Mapping,
            to: ImportStage::Committing,
        })
        .into();
        match api_err {
            ApiError::InvalidStateTransition { from, to } => {
                assert_eq!(from, "MAPPING");
                assert_eq!(to, "COMMITTING");
            }
            _ => panic!("Expected InvalidStateTransition"),
        }

        let api_err: ApiError = ImportError::from(SessionError::BlockingErrors { error_rows: 2 }).into();
        assert!(matches!(api_err, ApiError::BusinessRuleViolation(_)));
    }
}
