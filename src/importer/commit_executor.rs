// ==========================================
// 库存表格批量导入系统 - 提交/回滚执行器
// ==========================================
// 流程: 进入提交 → 记录跳过行 → 转换 → 分批落库 → 完成/失败
// 职责: 批次写入、进度事件、检查点、自动回滚、手动回滚
// 红线: 写入按 (session_id, 行号) 幂等；批次间可取消；
//       COMMITTING 非终态，进程中断后再次提交从检查点继续
// ==========================================

use crate::domain::commit::{
    CommitEvent, CommitProgress, CommitResult, RecordOutcome, RejectedRow, SinkRecord,
};
use crate::domain::schema::TargetSchema;
use crate::domain::session::{ImportSession, MappedRow};
use crate::domain::types::{ImportStage, LogLevel};
use crate::importer::error::{ImportResult, SessionError};
use crate::importer::session_flow;
use crate::importer::transformer;
use crate::importer::validator;
use crate::repository::{ImportSessionRepository, RecordSink};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument, warn};

// ==========================================
// CancelFlag - 协作式取消
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 事件发送（接收端已关闭时忽略）
fn emit(events: Option<&UnboundedSender<CommitEvent>>, event: CommitEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// 追加审计日志并推送日志事件
fn log_event(
    session: &mut ImportSession,
    events: Option<&UnboundedSender<CommitEvent>>,
    level: LogLevel,
    message: String,
) {
    let entry = session.log(level, message).clone();
    emit(events, CommitEvent::Log(entry));
}

/// 行号列表（1 起）
fn format_rows(rows: impl IntoIterator<Item = usize>) -> String {
    rows.into_iter()
        .map(|r| (r + 1).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ==========================================
// CommitExecutor
// ==========================================
pub struct CommitExecutor {
    sink: Arc<dyn RecordSink>,
    sessions: Arc<dyn ImportSessionRepository>,
    batch_size: usize,
}

impl CommitExecutor {
    pub fn new(
        sink: Arc<dyn RecordSink>,
        sessions: Arc<dyn ImportSessionRepository>,
        batch_size: usize,
    ) -> Self {
        Self {
            sink,
            sessions,
            batch_size: batch_size.max(1),
        }
    }

    async fn checkpoint(&self, session: &ImportSession) -> ImportResult<()> {
        self.sessions.save(session).await?;
        Ok(())
    }

    fn progress(session: &ImportSession, eligible_rows: usize) -> CommitProgress {
        let failed_rows = session.commit.rejected_rows.len();
        CommitProgress {
            processed_rows: session.commit.written_rows.len() + failed_rows,
            eligible_rows,
            success_rows: session.commit.written_rows.len(),
            failed_rows,
            skipped_rows: session.commit.skipped_rows.len(),
        }
    }

    /// 提交会话
    ///
    /// # 返回
    /// - Ok((session', CommitResult)): 会话进入 COMPLETED 或 FAILED
    /// - Err: 守卫失败（会话不变）或基础设施错误（会话停留在 COMMITTING，可续传）
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn commit(
        &self,
        mut session: ImportSession,
        schema: &TargetSchema,
        cancel: &CancelFlag,
        events: Option<&UnboundedSender<CommitEvent>>,
    ) -> ImportResult<(ImportSession, CommitResult)> {
        session_flow::begin_commit(&mut session, schema)?;
        self.checkpoint(&session).await?;

        let total_rows = session.row_count();
        let validation = session
            .validation
            .clone()
            .ok_or(SessionError::NotValidated)?;
        let error_rows = validation.error_rows();

        // === 步骤 1: 跳过错误行（记录原始错误原因） ===
        for row_index in &error_rows {
            if session.commit.skipped_rows.contains(row_index) {
                continue;
            }
            let reasons: Vec<&str> = validation
                .errors_for_row(*row_index)
                .map(|e| e.message.as_str())
                .collect();
            let message = format!("跳过第 {} 行: {}", row_index + 1, reasons.join("; "));
            session.commit.skipped_rows.insert(*row_index);
            log_event(&mut session, events, LogLevel::Warning, message);
        }

        // === 步骤 2: 转换（仅提交时，纯函数） ===
        let mapped = session.mapped_rows();
        let compiled = if session.options.apply_transformations {
            transformer::compile_rules(&session.transformation_rules)?
        } else {
            Vec::new()
        };
        let eligible: Vec<(usize, MappedRow)> = mapped
            .iter()
            .enumerate()
            .filter(|(idx, _)| !error_rows.contains(idx))
            .map(|(idx, row)| (idx, transformer::transform_row(row, &compiled)))
            .collect();
        let eligible_rows = eligible.len();

        let pending: Vec<&(usize, MappedRow)> = eligible
            .iter()
            .filter(|(idx, _)| !session.commit.written_rows.contains(idx))
            .collect();
        info!(
            total_rows,
            eligible_rows,
            pending = pending.len(),
            skipped = error_rows.len(),
            "开始提交"
        );

        // === 步骤 3: 分批写入 ===
        let mut rejected_now = false;
        for (batch_no, chunk) in pending.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                session.commit.cancelled = true;
                break;
            }

            let records: Vec<SinkRecord> = chunk
                .iter()
                .map(|(idx, row)| SinkRecord {
                    row_index: *idx,
                    natural_key: validator::natural_key_of(row, schema),
                    values: row.clone(),
                })
                .collect();

            let outcomes = match self
                .sink
                .insert_batch(records, &session.session_id, &schema.name)
                .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    // 基础设施错误: 停留在 COMMITTING，保留检查点以便续传
                    error!(error = %e, batch_no, "批次写入失败");
                    log_event(
                        &mut session,
                        events,
                        LogLevel::Error,
                        format!("批次 {} 写入失败（可重新提交续传）: {}", batch_no + 1, e),
                    );
                    self.checkpoint(&session).await?;
                    return Err(e.into());
                }
            };

            let mut written = 0;
            for outcome in outcomes {
                match outcome {
                    RecordOutcome::Written { row_index } => {
                        session.commit.written_rows.insert(row_index);
                        written += 1;
                    }
                    RecordOutcome::Rejected { row_index, reason } => {
                        session
                            .commit
                            .rejected_rows
                            .push(RejectedRow { row_index, reason });
                        rejected_now = true;
                    }
                }
            }

            let progress = Self::progress(&session, eligible_rows);
            log_event(
                &mut session,
                events,
                LogLevel::Info,
                format!(
                    "批次 {}: 写入 {} / {} 行（累计 {} / {}）",
                    batch_no + 1,
                    written,
                    chunk.len(),
                    progress.success_rows,
                    eligible_rows
                ),
            );
            emit(events, CommitEvent::Progress(progress));
            self.checkpoint(&session).await?;
            debug!(batch_no, written, "批次完成");

            if rejected_now {
                break;
            }
        }

        // === 步骤 4: 收尾 ===
        let result = if rejected_now {
            self.finish_rejected(&mut session, schema, events, total_rows, eligible_rows)
                .await?
        } else if session.commit.cancelled {
            self.finish_cancelled(&mut session, schema, events, total_rows, eligible_rows)?
        } else {
            session_flow::transition(&mut session, ImportStage::Completed, schema)?;
            let result = CommitResult {
                total_rows,
                success_rows: session.commit.written_rows.len(),
                failed_rows: 0,
                skipped_rows: error_rows.len(),
                cancelled: false,
                rolled_back_rows: 0,
            };
            log_event(
                &mut session,
                events,
                LogLevel::Success,
                format!(
                    "提交完成: 写入 {} 行，跳过 {} 行",
                    result.success_rows, result.skipped_rows
                ),
            );
            result
        };

        session.commit.result = Some(result.clone());
        emit(events, CommitEvent::Progress(Self::progress(&session, eligible_rows)));
        self.checkpoint(&session).await?;

        info!(
            stage = %session.stage,
            success = result.success_rows,
            failed = result.failed_rows,
            skipped = result.skipped_rows,
            "提交结束"
        );
        Ok((session, result))
    }

    /// 目标库拒绝: 开启回滚则自动回滚，否则保留部分写入
    async fn finish_rejected(
        &self,
        session: &mut ImportSession,
        schema: &TargetSchema,
        events: Option<&UnboundedSender<CommitEvent>>,
        total_rows: usize,
        eligible_rows: usize,
    ) -> ImportResult<CommitResult> {
        let rejected = session.commit.rejected_rows.clone();
        for row in &rejected {
            log_event(
                session,
                events,
                LogLevel::Error,
                format!("第 {} 行被目标库拒绝: {}", row.row_index + 1, row.reason),
            );
        }

        let skipped_rows = session.commit.skipped_rows.len();
        if session.options.enable_rollback {
            let deleted = self.sink.delete_by_tag(&session.session_id).await?;
            session.commit.auto_rolled_back = true;
            session.commit.rolled_back_count = deleted;
            warn!(deleted, "目标库拒绝，已自动回滚");
            log_event(
                session,
                events,
                LogLevel::Warning,
                format!("目标库拒绝 {} 行，已自动回滚 {} 行", rejected.len(), deleted),
            );
            session_flow::transition(session, ImportStage::Failed, schema)?;

            Ok(CommitResult {
                total_rows,
                success_rows: 0,
                failed_rows: eligible_rows,
                skipped_rows,
                cancelled: false,
                rolled_back_rows: deleted,
            })
        } else {
            let written: BTreeSet<usize> = session.commit.written_rows.clone();
            log_event(
                session,
                events,
                LogLevel::Error,
                format!(
                    "提交失败（未开启回滚）: 保留已写入的 {} 行: {}",
                    written.len(),
                    format_rows(written.iter().copied())
                ),
            );
            session_flow::transition(session, ImportStage::Failed, schema)?;

            Ok(CommitResult {
                total_rows,
                success_rows: written.len(),
                failed_rows: eligible_rows - written.len(),
                skipped_rows,
                cancelled: false,
                rolled_back_rows: 0,
            })
        }
    }

    /// 批次间取消: 保留已写入行（部分失败，可回滚）
    fn finish_cancelled(
        &self,
        session: &mut ImportSession,
        schema: &TargetSchema,
        events: Option<&UnboundedSender<CommitEvent>>,
        total_rows: usize,
        eligible_rows: usize,
    ) -> ImportResult<CommitResult> {
        let written = session.commit.written_rows.len();
        let message = format!(
            "提交已取消: 保留已写入的 {} 行: {}",
            written,
            format_rows(session.commit.written_rows.iter().copied())
        );
        log_event(session, events, LogLevel::Warning, message);
        session_flow::transition(session, ImportStage::Failed, schema)?;

        Ok(CommitResult {
            total_rows,
            success_rows: written,
            failed_rows: eligible_rows - written,
            skipped_rows: session.commit.skipped_rows.len(),
            cancelled: true,
            rolled_back_rows: 0,
        })
    }

    /// 回滚会话写入的全部记录
    ///
    /// 仅在开启回滚且会话为 COMPLETED 或部分写入的 FAILED 时允许。
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn rollback(
        &self,
        mut session: ImportSession,
        schema: &TargetSchema,
    ) -> ImportResult<(ImportSession, usize)> {
        session_flow::ensure_can_rollback(&session)?;

        let deleted = self.sink.delete_by_tag(&session.session_id).await?;
        session.commit.rolled_back_count = deleted;
        session_flow::transition(&mut session, ImportStage::RolledBack, schema)?;
        session.log(LogLevel::Success, format!("回滚完成: 撤销 {} 行", deleted));
        self.checkpoint(&session).await?;

        info!(deleted, "回滚完成");
        Ok((session, deleted))
    }
}
