//! The per-message state machine: classify → query → retrieve → draft →
//! verify → optional send.
//!
//! Cancellation is cooperative. Fixed checkpoints read the user's stop
//! flags; an honoured stop reverts the message to `pending`, removes its
//! individual flag, persists, emits `email_process_stopped`, and returns
//! the `Cancelled` sentinel. A message that finishes entirely between a
//! stop request and the next checkpoint wins the race — mark-read and
//! rate-limit commit are idempotent at the observable level.

use std::sync::Arc;

use mailflow_core::config::DRAFT_MAX_TRIALS;
use mailflow_core::event::EventKind;
use mailflow_core::types::{ActivityLevel, EmailCategory, EmailStatus};
use mailflow_limiter::{Admission, SendRateLimiter};
use mailflow_mailbox::OutboundReply;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::pools::WorkerPools;
use crate::ports::UserPorts;
use crate::state::{UserHandle, UserRegistry};
use crate::summary::spawn_summarise;
use crate::urgency;

/// Reply recorded on the unrelated fast-path.
pub const SKIPPED_REPLY: &str = "无关邮件，已跳过";

/// Shared services the pipeline needs besides the per-user ports.
#[derive(Clone)]
pub struct PipelineEnv {
    pub registry: Arc<UserRegistry>,
    pub bus: Arc<EventBus>,
    pub pools: Arc<WorkerPools>,
    pub limiter: Arc<SendRateLimiter>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Send immediately after a sendable draft, subject to rate limiting.
    pub auto_send: bool,
    /// Client-edited queries that replace query synthesis (retry-RAG).
    pub queries_override: Option<Vec<String>>,
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed {
        category: EmailCategory,
        status: EmailStatus,
    },
    /// A checkpoint honoured a stop request; the message is `pending` again.
    Cancelled,
    Failed(String),
    NotFound,
    /// Another pipeline run currently owns this message.
    Busy,
}

enum Step {
    /// Stop observed and handled at a checkpoint.
    Stopped,
    /// Unrecoverable error; message becomes `failed`.
    Error(String),
}

pub async fn run_pipeline(
    env: &PipelineEnv,
    handle: &Arc<UserHandle>,
    ports: &UserPorts,
    email_id: &str,
    opts: PipelineOptions,
) -> PipelineOutcome {
    let user_id = handle.user_id.to_string();

    // Checkpoint: before classify. Covers a stop that raced the submission.
    if checkpoint(env, handle, email_id).await {
        return PipelineOutcome::Cancelled;
    }

    // Claim the message. `processing` is set exactly once per run, under
    // the user lock.
    let claimed = {
        let mut data = handle.data.lock().await;
        match data.find_mut(email_id) {
            None => return PipelineOutcome::NotFound,
            Some(m) if m.status == EmailStatus::Processing => return PipelineOutcome::Busy,
            Some(m) => {
                m.status = EmailStatus::Processing;
                (m.subject.clone(), m.body.clone())
            }
        }
    };
    let (subject, body) = claimed;
    info!(user = %user_id, email_id, subject = %subject, "pipeline started");

    match run_steps(env, handle, ports, email_id, &subject, &body, &opts).await {
        Ok(outcome) => outcome,
        Err(Step::Stopped) => PipelineOutcome::Cancelled,
        Err(Step::Error(message)) => {
            fail_message(env, handle, email_id, &message).await;
            PipelineOutcome::Failed(message)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_steps(
    env: &PipelineEnv,
    handle: &Arc<UserHandle>,
    ports: &UserPorts,
    email_id: &str,
    subject: &str,
    body: &str,
    opts: &PipelineOptions,
) -> Result<PipelineOutcome, Step> {
    let user_id = handle.user_id.to_string();

    // ── classify ─────────────────────────────────────────────────────────
    let (urgency_level, urgency_keywords) = urgency::analyze(subject, body);
    let category = ports
        .llm
        .classify(body)
        .await
        .map_err(|e| Step::Error(format!("分类失败: {e}")))?;
    {
        let mut data = handle.data.lock().await;
        if let Some(m) = data.find_mut(email_id) {
            m.category = Some(category);
            m.urgency = urgency_level;
            m.urgency_keywords = urgency_keywords;
        }
    }
    info!(email_id, %category, urgency = %urgency_level, "classified");

    // Checkpoint: after classify.
    guard(env, handle, email_id).await?;

    if category == EmailCategory::Unrelated {
        return Ok(skip_unrelated(env, handle, ports, email_id).await);
    }

    // ── query synthesis ──────────────────────────────────────────────────
    // Checkpoint: before query synthesis.
    guard(env, handle, email_id).await?;

    let queries = match &opts.queries_override {
        Some(qs) if !qs.is_empty() => qs.clone(),
        _ => ports
            .llm
            .rag_queries(body)
            .await
            .map_err(|e| Step::Error(format!("查询生成失败: {e}")))?,
    };
    {
        let mut data = handle.data.lock().await;
        if let Some(m) = data.find_mut(email_id) {
            m.rag_queries = queries.clone();
        }
    }
    env.bus.emit(
        &user_id,
        EventKind::RagQueriesGenerated,
        serde_json::json!({"email_id": email_id, "queries": queries}),
    );

    // ── retrieve + compose ───────────────────────────────────────────────
    // Only the first query feeds the final context: one retrieval plus one
    // composition round-trip per message is the latency budget.
    let retrieved = match queries.first() {
        Some(query) => {
            let docs = ports
                .retriever
                .retrieve(query, category)
                .await
                .map_err(|e| Step::Error(format!("检索失败: {e}")))?;
            ports
                .llm
                .compose_answer(query, &docs, category)
                .await
                .map_err(|e| Step::Error(format!("检索失败: {e}")))?
        }
        None => String::new(),
    };

    // Checkpoint: after retrieve.
    guard(env, handle, email_id).await?;

    // ── draft / verify loop ──────────────────────────────────────────────
    let draft_input = mailflow_llm::DraftInput {
        category,
        body: body.to_string(),
        retrieved,
    };
    let mut writer_history: Vec<String> = Vec::new();
    let mut final_draft = String::new();
    let mut sendable = false;

    for trial in 1..=DRAFT_MAX_TRIALS {
        // Checkpoint: before each draft trial.
        guard(env, handle, email_id).await?;

        let draft = ports
            .llm
            .draft(&draft_input, &writer_history)
            .await
            .map_err(|e| Step::Error(format!("草稿生成失败: {e}")))?;
        writer_history.push(format!("**Draft {}:**\n{}", trial, draft));
        final_draft = draft;

        // Checkpoint: before verify.
        guard(env, handle, email_id).await?;

        let verdict = ports
            .llm
            .proofread(body, &final_draft)
            .await
            .map_err(|e| Step::Error(format!("校对失败: {e}")))?;
        writer_history.push(format!("**Proofreader Feedback:**\n{}", verdict.feedback));

        // Checkpoint: after verify.
        guard(env, handle, email_id).await?;

        if verdict.sendable {
            sendable = true;
            break;
        }
        info!(email_id, trial, "draft rejected by proofreader");
    }

    // Checkpoint: before save.
    guard(env, handle, email_id).await?;

    // ── optional send ────────────────────────────────────────────────────
    let (status, send_note) = if opts.auto_send && sendable {
        attempt_send(env, handle, ports, email_id, &final_draft).await
    } else {
        (EmailStatus::Processed, None)
    };

    // Mark read is best-effort; pipeline success does not depend on it.
    mark_read_best_effort(handle, ports, email_id).await;

    // ── save + history ───────────────────────────────────────────────────
    {
        let mut data = handle.data.lock().await;
        if let Some(m) = data.find_mut(email_id) {
            m.reply = Some(final_draft.clone());
            m.status = status;
        }
        data.stats.processed += 1;
        if status == EmailStatus::Sent {
            data.stats.sent += 1;
        }
        if let Some(snapshot) = data.find(email_id).cloned() {
            data.record_history(snapshot);
        }
        let (level, icon, text) = if status == EmailStatus::Sent {
            (ActivityLevel::Success, "📤", format!("已自动回复: {}", subject))
        } else if !sendable {
            (
                ActivityLevel::Warning,
                "⚠",
                format!("草稿未通过校对，已保留待人工确认: {}", subject),
            )
        } else if let Some(note) = &send_note {
            (ActivityLevel::Warning, "⏳", note.clone())
        } else {
            (ActivityLevel::Success, "✅", format!("已生成回复: {}", subject))
        };
        data.push_activity(level, icon, text);
        env.registry.persist(&handle.user_id, &data);
    }

    env.bus.emit(
        &user_id,
        EventKind::EmailProcessComplete,
        serde_json::json!({
            "email_id": email_id,
            "category": category,
            "status": status,
            "sendable": sendable,
        }),
    );

    spawn_summarise(
        env.registry.clone(),
        env.bus.clone(),
        env.pools.clone(),
        ports.llm.clone(),
        handle.clone(),
        email_id.to_string(),
        true,
        true,
    );

    Ok(PipelineOutcome::Completed { category, status })
}

/// Unrelated fast-path: mark read, record the skip, no LLM drafting.
async fn skip_unrelated(
    env: &PipelineEnv,
    handle: &Arc<UserHandle>,
    ports: &UserPorts,
    email_id: &str,
) -> PipelineOutcome {
    let user_id = handle.user_id.to_string();
    mark_read_best_effort(handle, ports, email_id).await;

    {
        let mut data = handle.data.lock().await;
        let subject = data
            .find(email_id)
            .map(|m| m.subject.clone())
            .unwrap_or_default();
        if let Some(m) = data.find_mut(email_id) {
            m.reply = Some(SKIPPED_REPLY.to_string());
            m.status = EmailStatus::Skipped;
        }
        data.stats.processed += 1;
        if let Some(snapshot) = data.find(email_id).cloned() {
            data.record_history(snapshot);
        }
        data.push_activity(ActivityLevel::Info, "⏭", format!("跳过无关邮件: {}", subject));
        env.registry.persist(&handle.user_id, &data);
    }

    env.bus.emit(
        &user_id,
        EventKind::EmailProcessComplete,
        serde_json::json!({
            "email_id": email_id,
            "category": EmailCategory::Unrelated,
            "status": EmailStatus::Skipped,
        }),
    );

    // Body-only summary; there is no reply worth summarising.
    spawn_summarise(
        env.registry.clone(),
        env.bus.clone(),
        env.pools.clone(),
        ports.llm.clone(),
        handle.clone(),
        email_id.to_string(),
        false,
        true,
    );

    PipelineOutcome::Completed {
        category: EmailCategory::Unrelated,
        status: EmailStatus::Skipped,
    }
}

/// Admit → send → commit. Budget is only consumed after a successful send.
async fn attempt_send(
    env: &PipelineEnv,
    handle: &Arc<UserHandle>,
    ports: &UserPorts,
    email_id: &str,
    reply_text: &str,
) -> (EmailStatus, Option<String>) {
    let user_id = handle.user_id.to_string();
    match env.limiter.admit(&user_id) {
        Admission::Allowed => {}
        Admission::Denied { message, .. } => {
            return (EmailStatus::Processed, Some(message));
        }
    }

    let reply = {
        let data = handle.data.lock().await;
        data.find(email_id).map(|m| {
            OutboundReply::replying_to(&m.sender, &m.subject, &m.message_id, &m.references, reply_text)
        })
    };
    let Some(reply) = reply else {
        return (EmailStatus::Processed, Some("邮件已不在缓存中".to_string()));
    };

    match ports.mailbox.send_reply(&reply).await {
        Ok(()) => {
            env.limiter.commit(&user_id);
            (EmailStatus::Sent, None)
        }
        Err(e) => {
            warn!(email_id, error = %e, "auto-send failed; draft kept");
            (EmailStatus::Processed, Some(format!("发送失败: {e}")))
        }
    }
}

async fn mark_read_best_effort(handle: &Arc<UserHandle>, ports: &UserPorts, email_id: &str) {
    let seq = {
        let data = handle.data.lock().await;
        data.find(email_id).map(|m| m.mailbox_seq.clone())
    };
    if let Some(seq) = seq {
        if seq.is_empty() {
            return;
        }
        if let Err(e) = ports.mailbox.mark_read(&seq).await {
            warn!(email_id, error = %e, "mark-read failed; continuing");
        }
    }
}

/// Checkpoint that maps an observed stop into the `Step::Stopped` error arm.
async fn guard(env: &PipelineEnv, handle: &Arc<UserHandle>, email_id: &str) -> Result<(), Step> {
    if checkpoint(env, handle, email_id).await {
        Err(Step::Stopped)
    } else {
        Ok(())
    }
}

/// Observe stop flags. When set: revert to `pending`, drop the individual
/// flag, persist, emit `email_process_stopped`. Returns true when a stop
/// was honoured.
pub async fn checkpoint(env: &PipelineEnv, handle: &Arc<UserHandle>, email_id: &str) -> bool {
    if !handle.flags.is_stop_requested(email_id) {
        return false;
    }

    {
        let mut data = handle.data.lock().await;
        let subject = data
            .find(email_id)
            .map(|m| m.subject.clone())
            .unwrap_or_default();
        if let Some(m) = data.find_mut(email_id) {
            m.status = EmailStatus::Pending;
        }
        handle.flags.acknowledge(email_id);
        data.push_activity(ActivityLevel::Warning, "⏹", format!("已停止处理: {}", subject));
        env.registry.persist(&handle.user_id, &data);
    }

    env.bus.emit(
        &handle.user_id.to_string(),
        EventKind::EmailProcessStopped,
        serde_json::json!({"email_id": email_id}),
    );
    info!(email_id, "stop honoured at checkpoint");
    true
}

/// Unknown-error disposition: `failed` status, stats, history, event. The
/// reply field is left untouched.
async fn fail_message(env: &PipelineEnv, handle: &Arc<UserHandle>, email_id: &str, message: &str) {
    let user_id = handle.user_id.to_string();
    {
        let mut data = handle.data.lock().await;
        let subject = data
            .find(email_id)
            .map(|m| m.subject.clone())
            .unwrap_or_default();
        if let Some(m) = data.find_mut(email_id) {
            m.status = EmailStatus::Failed;
        }
        data.stats.failed += 1;
        if let Some(snapshot) = data.find(email_id).cloned() {
            data.record_history(snapshot);
        }
        data.push_activity(
            ActivityLevel::Error,
            "❌",
            format!("处理失败: {} ({})", subject, message),
        );
        env.registry.persist(&handle.user_id, &data);
    }
    env.bus.emit(
        &user_id,
        EventKind::EmailProcessComplete,
        serde_json::json!({
            "email_id": email_id,
            "status": EmailStatus::Failed,
            "error": message,
        }),
    );
    warn!(email_id, message, "pipeline failed");
}
