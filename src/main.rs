// ==========================================
// 库存表格批量导入系统 - 命令行入口
// ==========================================
// 子命令:
//   suggest <file>            上传文件并输出映射建议
//   import <file> [...]       上传 → 映射 → 校验 → 修正 → 提交
//   resume <session_id>       从检查点继续提交
//   rollback <session_id>     回滚会话写入
//   log <session_id>          输出审计日志
//   show <session_id>         输出会话概要
//   sessions                  最近会话列表
//   config [--set k=v]        查看/写入配置
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use inventory_import::config::{ConfigManager, ImportConfigReader};
use inventory_import::domain::commit::CommitEvent;
use inventory_import::domain::schema::INVENTORY_SCHEMA;
use inventory_import::importer::{CancelFlag, MappingEntry};
use inventory_import::{
    logging, CommitResult, ImportApi, ImportOption, ImportSession, SchemaRegistry,
    TransformationRule,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "inventory-import")]
#[command(version, about = "批量导入表格文件到库存记录", long_about = None)]
struct Cli {
    /// 数据库文件（默认: $INVENTORY_IMPORT_DB_PATH 或用户数据目录）
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// 自定义 Schema JSON 文件（单个 Schema 或数组）
    #[arg(long, global = true)]
    schema_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传文件并输出映射建议
    Suggest {
        /// 输入文件（csv/tsv/txt/xlsx/xlsm/xls）
        input: PathBuf,

        /// 目标 Schema 名称
        #[arg(short, long, default_value = INVENTORY_SCHEMA)]
        schema: String,
    },

    /// 执行完整导入
    Import {
        /// 输入文件（csv/tsv/txt/xlsx/xlsm/xls）
        input: PathBuf,

        /// 目标 Schema 名称
        #[arg(short, long, default_value = INVENTORY_SCHEMA)]
        schema: String,

        /// 显式映射 "源列=字段ID"，字段ID 为 "-" 表示忽略；未指定时接受映射建议
        #[arg(short, long = "map", value_name = "COLUMN=FIELD")]
        mappings: Vec<String>,

        /// 修正单元格 "行号:字段ID=值"（行号从 1 开始）
        #[arg(long = "fix", value_name = "ROW:FIELD=VALUE")]
        fixes: Vec<String>,

        /// 转换规则 JSON 文件（规则数组）
        #[arg(long)]
        rules: Option<PathBuf>,

        /// 跳过全部错误行（部分导入）
        #[arg(long)]
        skip_errors: bool,

        /// 关闭回滚
        #[arg(long)]
        no_rollback: bool,

        /// 关闭重复检测
        #[arg(long)]
        no_duplicates: bool,

        /// 不应用转换规则
        #[arg(long)]
        no_transform: bool,

        /// 仅校验，不提交
        #[arg(long)]
        dry_run: bool,
    },

    /// 从检查点继续提交
    Resume { session_id: String },

    /// 回滚会话写入的全部记录
    Rollback { session_id: String },

    /// 输出审计日志
    Log { session_id: String },

    /// 输出会话概要
    Show {
        session_id: String,

        /// 同时输出全部校验错误
        #[arg(long)]
        errors: bool,
    },

    /// 最近会话列表
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 查看或写入全局配置
    Config {
        /// 写入配置 "key=value"
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

/// 获取默认数据库路径
///
/// 优先使用 INVENTORY_IMPORT_DB_PATH，其次为用户数据目录
fn get_default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("INVENTORY_IMPORT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    let mut path = PathBuf::from("./inventory_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("inventory-import");
        if fs::create_dir_all(&dir).is_ok() {
            path = dir.join("inventory_import.db");
        }
    }
    path
}

fn load_schemas(schema_file: Option<&Path>) -> Result<SchemaRegistry> {
    match schema_file {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("读取 Schema 文件失败: {}", path.display()))?;
            SchemaRegistry::from_json_str(&json).map_err(|e| anyhow!(e))
        }
        None => Ok(SchemaRegistry::with_builtin()),
    }
}

fn read_input(input: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = fs::read(input).with_context(|| format!("读取文件失败: {}", input.display()))?;
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input.display().to_string());
    Ok((file_name, bytes))
}

/// "源列=字段ID" → MappingEntry
fn parse_mapping(spec: &str) -> Result<MappingEntry> {
    let (column, field) = spec
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("映射格式应为 COLUMN=FIELD: {}", spec))?;
    let field = field.trim();
    Ok(if field == "-" || field.is_empty() {
        MappingEntry::ignore(column.trim())
    } else {
        MappingEntry::field(column.trim(), field)
    })
}

/// "行号:字段ID=值" → (行下标, 字段, 值)
fn parse_fix(spec: &str) -> Result<(usize, String, String)> {
    let (target, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("修正格式应为 ROW:FIELD=VALUE: {}", spec))?;
    let (row, field) = target
        .split_once(':')
        .ok_or_else(|| anyhow!("修正格式应为 ROW:FIELD=VALUE: {}", spec))?;
    let row: usize = row.trim().parse().with_context(|| format!("行号无效: {}", row))?;
    if row == 0 {
        bail!("行号从 1 开始: {}", spec);
    }
    Ok((row - 1, field.trim().to_string(), value.to_string()))
}

fn config_err(err: Box<dyn std::error::Error + Send + Sync>) -> anyhow::Error {
    anyhow!(err)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn session_overview(session: &ImportSession, with_errors: bool) -> serde_json::Value {
    let mut overview = json!({
        "session_id": session.session_id,
        "schema": session.schema_name,
        "stage": session.stage,
        "file": session.source,
        "rows": session.row_count(),
        "mapping": session.mapping,
        "options": session.options,
        "corrections": session.corrections.len(),
        "commit": session.commit.result,
    });
    if let Some(validation) = &session.validation {
        overview["validation"] = json!({
            "total_rows": validation.total_rows,
            "valid_rows": validation.valid_row_count,
            "error_rows": validation.error_row_count,
            "duplicates": validation.duplicate_count,
        });
        if with_errors {
            overview["errors"] = json!(validation.errors);
        }
    }
    overview
}

/// 执行提交，Ctrl-C 在批次间取消
async fn run_commit(api: &ImportApi, session_id: &str) -> Result<CommitResult> {
    let cancel = CancelFlag::new();
    let ctrl_c_flag = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，将在当前批次结束后取消提交");
            ctrl_c_flag.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<CommitEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                CommitEvent::Progress(p) => info!(
                    processed = p.processed_rows,
                    eligible = p.eligible_rows,
                    success = p.success_rows,
                    failed = p.failed_rows,
                    skipped = p.skipped_rows,
                    "提交进度"
                ),
                CommitEvent::Log(entry) => {
                    eprintln!("[{}] {}", entry.level, entry.message);
                }
            }
        }
    });

    let outcome = api.commit(session_id, &cancel, Some(&tx)).await;
    drop(tx);
    ctrl_c.abort();
    printer.await.ok();

    let (session, result) = outcome?;
    print_json(&json!({
        "session_id": session.session_id,
        "stage": session.stage,
        "result": result,
    }))?;
    Ok(result)
}

async fn run_import(api: &ImportApi, cmd: Commands) -> Result<()> {
    let Commands::Import {
        input,
        schema,
        mappings,
        fixes,
        rules,
        skip_errors,
        no_rollback,
        no_duplicates,
        no_transform,
        dry_run,
    } = cmd
    else {
        bail!("内部错误: 非 import 命令");
    };

    let (file_name, bytes) = read_input(&input)?;
    let session = api.start_import(&schema, &file_name, &bytes).await?;
    let session_id = session.session_id.clone();
    eprintln!("会话: {}", session_id);

    // 选项
    for (option, disabled) in [
        (ImportOption::EnableRollback, no_rollback),
        (ImportOption::DetectDuplicates, no_duplicates),
        (ImportOption::ApplyTransformations, no_transform),
    ] {
        if disabled {
            api.set_option(&session_id, option, false).await?;
        }
    }

    // 映射
    let (_, warnings) = if mappings.is_empty() {
        api.accept_suggestions(&session_id).await?
    } else {
        let entries = mappings
            .iter()
            .map(|m| parse_mapping(m))
            .collect::<Result<Vec<_>>>()?;
        api.set_mapping(&session_id, &entries).await?
    };
    for warning in warnings {
        warn!("{}", warning);
    }

    // 转换规则
    if let Some(path) = rules {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("读取规则文件失败: {}", path.display()))?;
        let rules: Vec<TransformationRule> =
            serde_json::from_str(&raw).context("规则文件格式错误")?;
        api.set_transformation_rules(&session_id, rules).await?;
    }

    // 校验 + 修正
    let mut session = api.run_validation(&session_id).await?;
    for fix in &fixes {
        let (row_index, field, value) = parse_fix(fix)?;
        session = api.correct_cell(&session_id, row_index, &field, &value).await?;
    }
    if skip_errors {
        session = api.skip_all(&session_id).await?;
    }

    let blocking = session.error_row_count() > 0 && !session.options.allow_partial_import;
    if dry_run || blocking {
        print_json(&session_overview(&session, true))?;
        if blocking {
            bail!(
                "仍有 {} 行存在错误：使用 --fix 修正或 --skip-errors 跳过",
                session.error_row_count()
            );
        }
        return Ok(());
    }

    let result = run_commit(api, &session_id).await?;
    if result.failed_rows > 0 {
        bail!("提交未完全成功: 失败 {} 行", result.failed_rows);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.clone().unwrap_or_else(get_default_db_path);
    let db_path = db_path.to_string_lossy().to_string();
    info!(db_path = %db_path, version = inventory_import::VERSION, "使用数据库");

    if let Commands::Config { set } = &cli.command {
        let manager = ConfigManager::new(&db_path).map_err(config_err)?;
        for pair in set {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("配置格式应为 KEY=VALUE: {}", pair))?;
            manager
                .set_config_value(key.trim(), value.trim())
                .map_err(config_err)?;
        }
        let snapshot = manager.get_config_snapshot().map_err(config_err)?;
        let effective = json!({
            "stored": serde_json::from_str::<serde_json::Value>(&snapshot)?,
            "effective": {
                "decimal_precision": manager.get_decimal_precision().await.map_err(config_err)?,
                "commit_batch_size": manager.get_commit_batch_size().await.map_err(config_err)?,
                "parallel_validation_threshold": manager.get_parallel_validation_threshold().await.map_err(config_err)?,
                "suggestion_min_confidence": manager.get_suggestion_min_confidence().await.map_err(config_err)?,
                "default_options": manager.get_default_options().await.map_err(config_err)?,
            }
        });
        return print_json(&effective);
    }

    let schemas = load_schemas(cli.schema_file.as_deref())?;
    let api = ImportApi::open(&db_path, schemas)?;

    match cli.command {
        Commands::Suggest { input, schema } => {
            let (file_name, bytes) = read_input(&input)?;
            let session = api.start_import(&schema, &file_name, &bytes).await?;
            let suggestions = api.suggest_mapping(&session.session_id).await?;
            print_json(&json!({
                "session_id": session.session_id,
                "headers": session.headers,
                "rows": session.row_count(),
                "suggestions": suggestions,
            }))?;
        }
        cmd @ Commands::Import { .. } => run_import(&api, cmd).await?,
        Commands::Resume { session_id } => {
            run_commit(&api, &session_id).await?;
        }
        Commands::Rollback { session_id } => {
            let (session, deleted) = api.rollback(&session_id).await?;
            print_json(&json!({
                "session_id": session.session_id,
                "stage": session.stage,
                "deleted_rows": deleted,
            }))?;
        }
        Commands::Log { session_id } => {
            for entry in api.get_audit_log(&session_id).await? {
                println!(
                    "{} [{}] {:<11} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.level,
                    entry.stage.to_string(),
                    entry.message
                );
            }
        }
        Commands::Show { session_id, errors } => {
            let session = api.get_session(&session_id).await?;
            print_json(&session_overview(&session, errors))?;
        }
        Commands::Sessions { limit } => {
            print_json(&api.list_sessions(limit).await?)?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
