// ==========================================
// 库存表格批量导入系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建表（配置 / 会话快照 / 库存记录）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 目标记录表（v2: 自然键按 schema_name 隔离）
const INVENTORY_RECORD_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS inventory_record (
        record_id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_tag TEXT NOT NULL,
        row_index INTEGER NOT NULL,
        schema_name TEXT NOT NULL,
        natural_key TEXT,
        values_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (session_tag, row_index),
        UNIQUE (schema_name, natural_key)
    );
    CREATE INDEX IF NOT EXISTS idx_inventory_record_tag ON inventory_record(session_tag);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）
///
/// - config_kv: 全局配置键值
/// - import_session: 会话快照（JSON）
/// - inventory_record: 导入写入的目标记录，按 session_tag 可回滚
///
/// v1 库（自然键全局唯一）在此升级到 v2。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    if read_schema_version(conn)? == Some(1) {
        migrate_v1_to_v2(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS import_session (
            session_id TEXT PRIMARY KEY,
            schema_name TEXT NOT NULL,
            stage TEXT NOT NULL,
            file_name TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            session_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_import_session_updated_at ON import_session(updated_at DESC);
        "#,
    )?;
    conn.execute_batch(INVENTORY_RECORD_DDL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// v1 → v2: 重建 inventory_record，已有记录归入内置 inventory Schema
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        r#"
        DROP INDEX IF EXISTS idx_inventory_record_tag;
        ALTER TABLE inventory_record RENAME TO inventory_record_v1;
        "#,
    )?;
    tx.execute_batch(INVENTORY_RECORD_DDL)?;
    tx.execute_batch(
        r#"
        INSERT INTO inventory_record (
            record_id, session_tag, row_index, schema_name, natural_key, values_json, created_at
        )
        SELECT record_id, session_tag, row_index, 'inventory', natural_key, values_json, created_at
        FROM inventory_record_v1;
        DROP TABLE inventory_record_v1;
        "#,
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    tx.commit()
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
