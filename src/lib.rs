// ==========================================
// 库存表格批量导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 表格文件 → 库存记录 的批量导入（人工确认映射与修正）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 会话/Schema/校验/转换/提交模型
pub mod domain;

// 数据仓储层 - 会话快照 / 目标库
pub mod repository;

// 导入层 - 解析/映射/校验/修正/提交
pub mod importer;

// 配置层 - 导入参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{FieldType, ImportOption, ImportStage, LogLevel};

// 领域实体
pub use domain::{
    CommitEvent, CommitResult, ImportOptions, ImportSession, SchemaRegistry, TargetSchema,
    TransformationRule, ValidationError, ValidationResult,
};

// API
pub use api::{ApiError, ApiResult, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "库存表格批量导入系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
