// ==========================================
// 库存表格批量导入系统 - 配置层
// ==========================================
// 职责: 导入参数（精度/批次/阈值/默认选项）的读取与写入
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_config_trait::{ConfigResult, ImportConfigReader};
