// ==========================================
// 库存表格批量导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (key-value + scope)，仅使用 global scope
// ==========================================

use crate::config::import_config_trait::{ConfigResult, ImportConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::session::ImportOptions;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 读取并解析配置，格式错误时记录告警并回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: std::str::FromStr + Copy + std::fmt::Display,
    {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                warn!(config_key = key, raw_value = %raw, default = %default, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置的快照（JSON格式）
    ///
    /// # 用途
    /// - CLI `config` 子命令展示
    /// - 会话审计时附带当时的配置
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> ConfigResult<bool> {
        let value = self.get_config_or_default(key, if default { "true" } else { "false" })?;
        Ok(match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => true,
            "false" | "0" | "no" | "n" => false,
            _ => default,
        })
    }
}

// ==========================================
// ImportConfigReader Trait 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_decimal_precision(&self) -> ConfigResult<u32> {
        self.get_parsed_or_default(config_keys::DECIMAL_PRECISION, 2)
    }

    async fn get_parallel_validation_threshold(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::PARALLEL_VALIDATION_THRESHOLD, 1000)
    }

    async fn get_suggestion_min_confidence(&self) -> ConfigResult<f64> {
        let value: f64 =
            self.get_parsed_or_default(config_keys::SUGGESTION_MIN_CONFIDENCE, 0.4)?;
        Ok(value.clamp(0.0, 1.0))
    }

    async fn get_commit_batch_size(&self) -> ConfigResult<usize> {
        let value = self.get_parsed_or_default(config_keys::COMMIT_BATCH_SIZE, 100usize)?;
        Ok(value.max(1))
    }

    async fn get_default_options(&self) -> ConfigResult<ImportOptions> {
        let defaults = ImportOptions::default();
        Ok(ImportOptions {
            allow_partial_import: self.get_bool_or_default(
                config_keys::DEFAULT_ALLOW_PARTIAL_IMPORT,
                defaults.allow_partial_import,
            )?,
            enable_rollback: self
                .get_bool_or_default(config_keys::DEFAULT_ENABLE_ROLLBACK, defaults.enable_rollback)?,
            detect_duplicates: self.get_bool_or_default(
                config_keys::DEFAULT_DETECT_DUPLICATES,
                defaults.detect_duplicates,
            )?,
            apply_transformations: self.get_bool_or_default(
                config_keys::DEFAULT_APPLY_TRANSFORMATIONS,
                defaults.apply_transformations,
            )?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 校验
    pub const DECIMAL_PRECISION: &str = "decimal_precision";
    pub const PARALLEL_VALIDATION_THRESHOLD: &str = "parallel_validation_threshold";

    // 映射建议
    pub const SUGGESTION_MIN_CONFIDENCE: &str = "suggestion_min_confidence";

    // 提交
    pub const COMMIT_BATCH_SIZE: &str = "commit_batch_size";

    // 会话默认选项
    pub const DEFAULT_ALLOW_PARTIAL_IMPORT: &str = "default_allow_partial_import";
    pub const DEFAULT_ENABLE_ROLLBACK: &str = "default_enable_rollback";
    pub const DEFAULT_DETECT_DUPLICATES: &str = "default_detect_duplicates";
    pub const DEFAULT_APPLY_TRANSFORMATIONS: &str = "default_apply_transformations";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let manager = make_manager();
        assert_eq!(manager.get_decimal_precision().await.unwrap(), 2);
        assert_eq!(manager.get_commit_batch_size().await.unwrap(), 100);
        assert_eq!(manager.get_parallel_validation_threshold().await.unwrap(), 1000);
        assert!((manager.get_suggestion_min_confidence().await.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(
            manager.get_default_options().await.unwrap(),
            ImportOptions::default()
        );
    }

    #[tokio::test]
    async fn test_set_and_read_back() {
        let manager = make_manager();
        manager.set_config_value(config_keys::COMMIT_BATCH_SIZE, "25").unwrap();
        manager.set_config_value(config_keys::DEFAULT_ALLOW_PARTIAL_IMPORT, "1").unwrap();
        manager.set_config_value(config_keys::COMMIT_BATCH_SIZE, "30").unwrap();

        assert_eq!(manager.get_commit_batch_size().await.unwrap(), 30);
        assert!(manager.get_default_options().await.unwrap().allow_partial_import);

        let snapshot = manager.get_config_snapshot().unwrap();
        assert!(snapshot.contains("\"commit_batch_size\":\"30\""));
    }

    #[tokio::test]
    async fn test_malformed_value_falls_back() {
        let manager = make_manager();
        manager.set_config_value(config_keys::DECIMAL_PRECISION, "abc").unwrap();
        manager.set_config_value(config_keys::COMMIT_BATCH_SIZE, "0").unwrap();

        assert_eq!(manager.get_decimal_precision().await.unwrap(), 2);
        assert_eq!(manager.get_commit_batch_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_min_confidence_clamped() {
        let manager = make_manager();
        manager.set_config_value(config_keys::SUGGESTION_MIN_CONFIDENCE, "1.7").unwrap();
        assert_eq!(manager.get_suggestion_min_confidence().await.unwrap(), 1.0);

        manager.set_config_value(config_keys::SUGGESTION_MIN_CONFIDENCE, "-0.2").unwrap();
        assert_eq!(manager.get_suggestion_min_confidence().await.unwrap(), 0.0);

        manager.set_config_value(config_keys::SUGGESTION_MIN_CONFIDENCE, "0.65").unwrap();
        assert!((manager.get_suggestion_min_confidence().await.unwrap() - 0.65).abs() < 1e-9);
    }
}
