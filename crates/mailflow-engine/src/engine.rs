//! Per-user orchestration: the monitor loop, the auto-send loop, sweep
//! execution, stop requests, and the manual operations behind the client
//! surface.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use mailflow_core::config::{AUTO_SEND_TICK_SECS, MAX_FETCH_PER_CYCLE, STOP_FLAG_CLEAR_SECS};
use mailflow_core::event::EventKind;
use mailflow_core::types::{
    ActivityLevel, EmailCategory, EmailMessage, EmailStatus, UserSettings,
};
use mailflow_limiter::{Admission, DenialReason, SendRateLimiter};
use mailflow_mailbox::{InboundEmail, OutboundReply};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::error::{EngineError, Result};
use crate::pipeline::{self, PipelineEnv, PipelineOptions, PipelineOutcome};
use crate::pools::WorkerPools;
use crate::ports::UserPorts;
use crate::state::{MonitorTask, UserHandle, UserRegistry};
use crate::summary::spawn_summarise;
use crate::urgency;

/// Aggregate result of one "process all" sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Process-wide engine: one instance serves every user, holding the shared
/// registry, event bus, worker pools, and rate limiter.
pub struct Engine {
    pub registry: Arc<UserRegistry>,
    pub bus: Arc<EventBus>,
    pub pools: Arc<WorkerPools>,
    pub limiter: Arc<SendRateLimiter>,
}

impl Engine {
    pub fn new(users_dir: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(UserRegistry::new(users_dir.as_ref())),
            bus: Arc::new(EventBus::new()),
            pools: Arc::new(WorkerPools::new()),
            limiter: Arc::new(SendRateLimiter::new()),
        })
    }

    fn env(&self) -> PipelineEnv {
        PipelineEnv {
            registry: self.registry.clone(),
            bus: self.bus.clone(),
            pools: self.pools.clone(),
            limiter: self.limiter.clone(),
        }
    }

    // ── single-message processing ────────────────────────────────────────

    /// Run the pipeline for one message on the single-item pool.
    pub async fn process_one(
        &self,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        email_id: &str,
        auto_send: bool,
        queries_override: Option<Vec<String>>,
    ) -> PipelineOutcome {
        let settings = ports.settings.settings();
        self.pools.ensure_single(settings.single_concurrency_clamped());

        self.bus.emit(
            &handle.user_id.to_string(),
            EventKind::EmailProcessStarted,
            serde_json::json!({"email_id": email_id}),
        );

        let _permit = self.pools.acquire_single().await;
        pipeline::run_pipeline(
            &self.env(),
            handle,
            ports,
            email_id,
            PipelineOptions {
                auto_send,
                queries_override,
            },
        )
        .await
    }

    // ── full sweep ───────────────────────────────────────────────────────

    /// Process every pending message in batches of `batch_size`. Batches
    /// run concurrently on the batch pool; the next batch is not submitted
    /// until the previous one finished or a global stop was observed.
    pub async fn process_all(
        self: &Arc<Self>,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        auto_send: bool,
    ) -> SweepSummary {
        let settings = ports.settings.settings();
        let batch_size = settings.batch_size_clamped();
        self.pools.ensure_batch(batch_size);

        // A stale global stop from an earlier request must not cancel this
        // sweep before it starts.
        handle.flags.clear_stop_all();

        let pending_ids: Vec<String> = {
            let data = handle.data.lock().await;
            data.cache
                .iter()
                .filter(|m| m.status == EmailStatus::Pending)
                .map(|m| m.id.clone())
                .collect()
        };

        let mut summary = SweepSummary {
            total: pending_ids.len(),
            ..Default::default()
        };
        let user_id = handle.user_id.to_string();
        info!(user = %user_id, total = summary.total, batch_size, "sweep started");

        let mut remaining = pending_ids.as_slice();
        while !remaining.is_empty() {
            if handle.flags.stop_all_requested() {
                // No new batches after a stop; the rest count as cancelled.
                summary.cancelled += remaining.len();
                break;
            }
            let (batch, rest) = remaining.split_at(batch_size.min(remaining.len()));
            remaining = rest;

            let futures: Vec<_> = batch
                .iter()
                .map(|id| {
                    let engine = Arc::clone(self);
                    let handle = handle.clone();
                    let ports = ports.clone();
                    let id = id.clone();
                    tokio::spawn(async move {
                        let _permit = engine.pools.acquire_batch().await;
                        pipeline::run_pipeline(
                            &engine.env(),
                            &handle,
                            &ports,
                            &id,
                            PipelineOptions {
                                auto_send,
                                queries_override: None,
                            },
                        )
                        .await
                    })
                })
                .collect();

            for joined in join_all(futures).await {
                match joined {
                    Ok(PipelineOutcome::Completed { .. }) => summary.processed += 1,
                    Ok(PipelineOutcome::Failed(_)) => summary.failed += 1,
                    Ok(PipelineOutcome::Cancelled)
                    | Ok(PipelineOutcome::NotFound)
                    | Ok(PipelineOutcome::Busy) => summary.cancelled += 1,
                    Err(e) => {
                        error!(error = %e, "sweep worker panicked");
                        summary.failed += 1;
                    }
                }
            }
        }

        let kind = if summary.cancelled > 0 {
            EventKind::ProcessAllStopped
        } else {
            EventKind::ProcessAllComplete
        };
        self.bus.emit(&user_id, kind, serde_json::json!(summary));
        info!(user = %user_id, ?summary, "sweep finished");
        summary
    }

    // ── stop requests ────────────────────────────────────────────────────

    /// Request cancellation of one message. Effective at the pipeline's
    /// next checkpoint; the flag self-clears after the deferred window.
    pub async fn stop_one(&self, handle: &Arc<UserHandle>, email_id: &str) {
        {
            let mut data = handle.data.lock().await;
            if let Some(m) = data.find_mut(email_id) {
                if m.status == EmailStatus::Processing {
                    m.status = EmailStatus::Stopping;
                }
            }
        }
        handle.flags.request_stop(email_id);
        Self::spawn_deferred_clear(handle.clone());
        self.bus.emit(
            &handle.user_id.to_string(),
            EventKind::EmailProcessStopping,
            serde_json::json!({"email_id": email_id}),
        );
    }

    /// Request cancellation of everything in flight for this user.
    pub async fn stop_all(&self, handle: &Arc<UserHandle>) {
        {
            let mut data = handle.data.lock().await;
            for m in data.cache.iter_mut() {
                if m.status == EmailStatus::Processing {
                    m.status = EmailStatus::Stopping;
                }
            }
        }
        handle.flags.request_stop_all();
        Self::spawn_deferred_clear(handle.clone());
        self.bus.emit(
            &handle.user_id.to_string(),
            EventKind::ProcessAllStopping,
            serde_json::json!({}),
        );
    }

    /// Clear stop flags after the deferred window unless a newer stop
    /// request superseded this one. The window exceeds the worst-case
    /// checkpoint-to-checkpoint interval.
    fn spawn_deferred_clear(handle: Arc<UserHandle>) {
        let epoch = handle.flags.epoch();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(STOP_FLAG_CLEAR_SECS)).await;
            if handle.flags.clear_all_if_epoch(epoch) {
                info!(user = %handle.user_id, "stop flags auto-cleared");
            }
        });
    }

    // ── monitor / auto-send loops ────────────────────────────────────────

    /// Start the per-user supervising task (monitor + auto-send children).
    /// Returns false if the monitor was already running.
    pub fn start_monitor(self: &Arc<Self>, handle: Arc<UserHandle>, ports: UserPorts) -> bool {
        if handle.monitor_running.swap(true, Ordering::SeqCst) {
            return false;
        }
        handle.auto_send_running.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        let monitor = {
            let engine = Arc::clone(self);
            let handle = handle.clone();
            let ports = ports.clone();
            let token = token.clone();
            tokio::spawn(async move {
                engine.monitor_loop(handle, ports, token).await;
            })
        };
        let auto_send = {
            let engine = Arc::clone(self);
            let handle = handle.clone();
            let token = token.clone();
            tokio::spawn(async move {
                engine.auto_send_loop(handle, ports, token).await;
            })
        };

        *handle.monitor_task.lock().unwrap() = Some(MonitorTask {
            token,
            children: vec![monitor, auto_send],
        });
        info!(user = %handle.user_id, "monitor started");
        true
    }

    /// Cancel the supervising token and wait for both children to finish.
    pub async fn stop_monitor(&self, handle: &Arc<UserHandle>) {
        let task = handle.monitor_task.lock().unwrap().take();
        if let Some(task) = task {
            task.token.cancel();
            for child in task.children {
                let _ = child.await;
            }
        }
        handle.monitor_running.store(false, Ordering::SeqCst);
        handle.auto_send_running.store(false, Ordering::SeqCst);
        info!(user = %handle.user_id, "monitor stopped");
    }

    async fn monitor_loop(
        self: Arc<Self>,
        handle: Arc<UserHandle>,
        ports: UserPorts,
        token: CancellationToken,
    ) {
        loop {
            let settings = ports.settings.settings();
            self.run_monitor_cycle(&handle, &ports, &settings, true).await;

            let interval = Duration::from_secs(settings.check_interval_mins.max(1) * 60);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn auto_send_loop(
        self: Arc<Self>,
        handle: Arc<UserHandle>,
        ports: UserPorts,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(AUTO_SEND_TICK_SECS)) => {}
            }
            if ports.settings.settings().auto_send {
                self.auto_send_sweep(&handle, &ports).await;
            }
        }
    }

    /// One monitor cycle: fetch unread (bounded), reconcile the cache,
    /// announce new arrivals, then optionally run the auto-process sweep.
    pub async fn run_monitor_cycle(
        self: &Arc<Self>,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        settings: &UserSettings,
        allow_auto_process: bool,
    ) -> usize {
        // A sweep from this cycle must not be cancelled by a stale stop.
        handle.flags.clear_stop_all();

        let fetched = match ports.mailbox.fetch_unread(MAX_FETCH_PER_CYCLE).await {
            Ok(list) => list,
            Err(e) => {
                warn!(user = %handle.user_id, error = %e, "mailbox fetch failed");
                let mut data = handle.data.lock().await;
                data.push_activity(ActivityLevel::Error, "📭", format!("收件失败: {e}"));
                return 0;
            }
        };

        let new_ids = {
            let mut data = handle.data.lock().await;
            let unread_ids: HashSet<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
            // Messages that are no longer unread leave the cache, unless
            // they are terminal (kept for the UI) or currently in flight.
            data.cache.retain(|m| {
                m.status.is_terminal()
                    || matches!(m.status, EmailStatus::Processing | EmailStatus::Stopping)
                    || unread_ids.contains(m.id.as_str())
            });

            let mut new_ids = Vec::new();
            for inbound in fetched {
                if data.find(&inbound.id).is_some() {
                    continue;
                }
                let message = ingest(inbound);
                new_ids.push(message.id.clone());
                data.cache.push(message);
            }

            data.last_check_time = Some(chrono::Utc::now().to_rfc3339());
            data.auto_process = settings.auto_process;
            data.check_interval = Some(settings.check_interval_mins);
            if !new_ids.is_empty() {
                data.push_activity(
                    ActivityLevel::Info,
                    "📬",
                    format!("收到 {} 封新邮件", new_ids.len()),
                );
            }
            self.registry.persist(&handle.user_id, &data);
            new_ids
        };

        if !new_ids.is_empty() {
            self.bus.emit(
                &handle.user_id.to_string(),
                EventKind::NewEmails,
                serde_json::json!({"count": new_ids.len(), "ids": new_ids}),
            );
            // Body summaries for fresh arrivals. Batch ingestion skips the
            // per-message persist; the cycle above already saved once and
            // the next save picks the summaries up.
            for id in &new_ids {
                spawn_summarise(
                    self.registry.clone(),
                    self.bus.clone(),
                    self.pools.clone(),
                    ports.llm.clone(),
                    handle.clone(),
                    id.clone(),
                    false,
                    false,
                );
            }
        }

        if allow_auto_process && settings.auto_process {
            let summary = self.process_all(handle, ports, settings.auto_send).await;
            self.bus.emit(
                &handle.user_id.to_string(),
                EventKind::AutoProcessComplete,
                serde_json::json!(summary),
            );
        }

        new_ids.len()
    }

    /// One auto-send pass: deliver every `processed` message with a reply,
    /// stopping early when a quantity window is exhausted.
    pub async fn auto_send_sweep(&self, handle: &Arc<UserHandle>, ports: &UserPorts) -> usize {
        let user_id = handle.user_id.to_string();
        let candidates: Vec<String> = {
            let data = handle.data.lock().await;
            data.cache
                .iter()
                .filter(|m| {
                    m.status == EmailStatus::Processed
                        && m.reply.as_deref().map(|r| !r.is_empty()).unwrap_or(false)
                })
                .map(|m| m.id.clone())
                .collect()
        };

        let mut sent = 0;
        for id in candidates {
            match self.limiter.admit(&user_id) {
                Admission::Denied {
                    reason: DenialReason::Interval,
                    ..
                } => continue,
                Admission::Denied { message, .. } => {
                    // Quantity windows apply to every remaining message
                    // equally; stop the sweep.
                    info!(user = %user_id, %message, "auto-send sweep stopped by quota");
                    break;
                }
                Admission::Allowed => {}
            }

            match self.deliver_reply(handle, ports, &id, None).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(user = %user_id, email_id = %id, error = %e, "auto-send failed");
                }
            }
        }
        sent
    }

    // ── manual operations ────────────────────────────────────────────────

    /// Send (or resend) a reply immediately, subject to the rate limiter.
    pub async fn send_reply_manual(
        &self,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        email_id: &str,
        reply_override: Option<String>,
    ) -> Result<()> {
        let user_id = handle.user_id.to_string();
        if let Admission::Denied { message, .. } = self.limiter.admit(&user_id) {
            return Err(EngineError::RateLimited(message));
        }
        self.deliver_reply(handle, ports, email_id, reply_override).await
    }

    /// Shared send path: build the threaded reply, deliver, commit budget,
    /// flip status to `sent`, and record history. Callers have already
    /// passed admission.
    async fn deliver_reply(
        &self,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        email_id: &str,
        reply_override: Option<String>,
    ) -> Result<()> {
        let user_id = handle.user_id.to_string();
        let (reply, subject) = {
            let mut data = handle.data.lock().await;
            let m = data
                .find_mut(email_id)
                .ok_or_else(|| EngineError::EmailNotFound(email_id.to_string()))?;
            if let Some(text) = reply_override {
                m.reply = Some(text);
            }
            let text = m
                .reply
                .clone()
                .filter(|r| !r.is_empty())
                .ok_or_else(|| EngineError::Internal("回复内容为空".to_string()))?;
            (
                OutboundReply::replying_to(&m.sender, &m.subject, &m.message_id, &m.references, text),
                m.subject.clone(),
            )
        };

        ports.mailbox.send_reply(&reply).await?;
        self.limiter.commit(&user_id);

        {
            let mut data = handle.data.lock().await;
            if let Some(m) = data.find_mut(email_id) {
                m.status = EmailStatus::Sent;
            }
            data.stats.sent += 1;
            if let Some(snapshot) = data.find(email_id).cloned() {
                data.record_history(snapshot);
            }
            data.push_activity(ActivityLevel::Success, "📤", format!("已发送回复: {}", subject));
            self.registry.persist(&handle.user_id, &data);
        }
        Ok(())
    }

    /// Overwrite a drafted reply without sending.
    pub async fn update_reply(&self, handle: &Arc<UserHandle>, email_id: &str, reply: String) -> Result<()> {
        let mut data = handle.data.lock().await;
        let m = data
            .find_mut(email_id)
            .ok_or_else(|| EngineError::EmailNotFound(email_id.to_string()))?;
        m.reply = Some(reply);
        m.reply_summary = None;
        self.registry.persist(&handle.user_id, &data);
        Ok(())
    }

    /// Drop a message from the cache (history is untouched).
    pub async fn delete_message(&self, handle: &Arc<UserHandle>, email_id: &str) -> Result<()> {
        let mut data = handle.data.lock().await;
        let before = data.cache.len();
        data.cache.retain(|m| m.id != email_id);
        if data.cache.len() == before {
            return Err(EngineError::EmailNotFound(email_id.to_string()));
        }
        self.registry.persist(&handle.user_id, &data);
        Ok(())
    }

    /// Flag a message read in the mailbox and mirror that in the cache.
    pub async fn mark_read_manual(
        &self,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        email_id: &str,
    ) -> Result<()> {
        let seq = {
            let data = handle.data.lock().await;
            data.find(email_id)
                .map(|m| m.mailbox_seq.clone())
                .ok_or_else(|| EngineError::EmailNotFound(email_id.to_string()))?
        };
        if !seq.is_empty() {
            ports.mailbox.mark_read(&seq).await?;
        }
        let mut data = handle.data.lock().await;
        if let Some(m) = data.find_mut(email_id) {
            if !m.status.is_terminal() {
                m.status = EmailStatus::Read;
            }
        }
        self.registry.persist(&handle.user_id, &data);
        Ok(())
    }

    pub async fn clear_history(&self, handle: &Arc<UserHandle>) -> Result<()> {
        let mut data = handle.data.lock().await;
        data.history.clear();
        data.push_activity(ActivityLevel::Info, "🧹", "历史记录已清空");
        self.registry.persist(&handle.user_id, &data);
        Ok(())
    }

    /// Knowledge-base self-test: retrieve + compose for an ad-hoc question
    /// using the broad enquiry strategy, announced via the event bus.
    pub async fn rag_test(
        &self,
        handle: &Arc<UserHandle>,
        ports: &UserPorts,
        question: &str,
    ) -> Result<String> {
        let docs = ports
            .retriever
            .retrieve(question, EmailCategory::ProductEnquiry)
            .await?;
        let answer = ports
            .llm
            .compose_answer(question, &docs, EmailCategory::ProductEnquiry)
            .await?;
        self.bus.emit(
            &handle.user_id.to_string(),
            EventKind::RagTestComplete,
            serde_json::json!({"question": question, "answer": answer}),
        );
        Ok(answer)
    }
}

/// Convert an inbound mailbox message into a pending cache entry with
/// urgency annotation.
fn ingest(inbound: InboundEmail) -> EmailMessage {
    let (urgency_level, urgency_keywords) = urgency::analyze(&inbound.subject, &inbound.body);
    let mut message = EmailMessage::ingested(
        inbound.id,
        inbound.sender,
        inbound.subject,
        inbound.body,
    );
    message.thread_id = inbound.thread_id;
    message.message_id = inbound.message_id;
    message.references = inbound.references;
    message.mailbox_seq = inbound.mailbox_seq;
    message.urgency = urgency_level;
    message.urgency_keywords = urgency_keywords;
    message
}
