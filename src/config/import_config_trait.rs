// ==========================================
// 库存表格批量导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入流程所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::session::ImportOptions;
use async_trait::async_trait;
use std::error::Error;

/// 配置读取结果
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入流程所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 校验配置 =====

    /// 获取小数精度（字段未声明精度时使用）
    ///
    /// # 默认值
    /// - 2
    async fn get_decimal_precision(&self) -> ConfigResult<u32>;

    /// 获取并行校验阈值（行数达到该值时按行并行校验）
    ///
    /// # 默认值
    /// - 1000
    async fn get_parallel_validation_threshold(&self) -> ConfigResult<usize>;

    // ===== 映射配置 =====

    /// 获取映射建议的最低置信度
    ///
    /// # 默认值
    /// - 0.4
    async fn get_suggestion_min_confidence(&self) -> ConfigResult<f64>;

    // ===== 提交配置 =====

    /// 获取提交批次大小
    ///
    /// # 默认值
    /// - 100
    async fn get_commit_batch_size(&self) -> ConfigResult<usize>;

    // ===== 会话默认选项 =====

    /// 获取新建会话的默认导入选项
    ///
    /// # 默认值
    /// - allow_partial_import = false
    /// - enable_rollback = true
    /// - detect_duplicates = true
    /// - apply_transformations = true
    async fn get_default_options(&self) -> ConfigResult<ImportOptions>;
}
