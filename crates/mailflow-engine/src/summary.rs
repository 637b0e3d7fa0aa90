//! Out-of-band message summarisation.
//!
//! Runs after a message reaches a terminal status (or body-only at
//! ingestion). Best-effort throughout: failures are logged at debug level
//! and never surface; partial success (one of two summaries) is kept.

use std::sync::Arc;

use mailflow_core::event::EventKind;
use mailflow_llm::SupportLlm;
use tracing::debug;

use crate::bus::EventBus;
use crate::pools::WorkerPools;
use crate::state::{UserHandle, UserRegistry};

/// Spawn a summarisation task for one message. `include_reply` adds the
/// reply summary; `persist` writes the data file on completion (monitor
/// ingestion passes `false` and lets the caller coalesce saves).
pub fn spawn_summarise(
    registry: Arc<UserRegistry>,
    bus: Arc<EventBus>,
    pools: Arc<WorkerPools>,
    llm: Arc<dyn SupportLlm>,
    handle: Arc<UserHandle>,
    email_id: String,
    include_reply: bool,
    persist: bool,
) {
    tokio::spawn(async move {
        summarise_message(registry, bus, pools, llm, handle, email_id, include_reply, persist)
            .await;
    });
}

#[allow(clippy::too_many_arguments)]
pub async fn summarise_message(
    registry: Arc<UserRegistry>,
    bus: Arc<EventBus>,
    pools: Arc<WorkerPools>,
    llm: Arc<dyn SupportLlm>,
    handle: Arc<UserHandle>,
    email_id: String,
    include_reply: bool,
    persist: bool,
) {
    // The permit bounds overall summariser fan-out to the fixed pool size
    // and is held across both LLM calls.
    let _permit = pools.acquire_summary().await;

    let (body, reply, has_body_summary, has_reply_summary) = {
        let data = handle.data.lock().await;
        let Some(m) = data.find(&email_id) else {
            return;
        };
        (
            m.body.clone(),
            m.reply.clone(),
            m.body_summary.is_some(),
            m.reply_summary.is_some(),
        )
    };

    let want_body = !has_body_summary && !body.trim().is_empty();
    let want_reply = include_reply
        && !has_reply_summary
        && reply.as_deref().map(|r| !r.trim().is_empty()).unwrap_or(false);
    if !want_body && !want_reply {
        return;
    }

    // Body and reply summaries run in parallel; each failure is silent and
    // independent.
    let body_fut = async {
        if want_body {
            llm.summarise(&body).await.ok()
        } else {
            None
        }
    };
    let reply_fut = async {
        if want_reply {
            llm.summarise(reply.as_deref().unwrap_or_default()).await.ok()
        } else {
            None
        }
    };
    let (body_summary, reply_summary) = tokio::join!(body_fut, reply_fut);

    if body_summary.is_none() && reply_summary.is_none() {
        debug!(email_id, "no summaries produced");
        return;
    }

    {
        let mut data = handle.data.lock().await;
        if let Some(m) = data.find_mut(&email_id) {
            if let Some(s) = &body_summary {
                m.body_summary = Some(s.clone());
            }
            if let Some(s) = &reply_summary {
                m.reply_summary = Some(s.clone());
            }
        }
        if let Some(r) = data.history.iter_mut().find(|r| r.email.id == email_id) {
            if let Some(s) = &body_summary {
                r.email.body_summary = Some(s.clone());
            }
            if let Some(s) = &reply_summary {
                r.email.reply_summary = Some(s.clone());
            }
        }
        if persist {
            registry.persist(&handle.user_id, &data);
        }
    }

    bus.emit(
        &handle.user_id.to_string(),
        EventKind::SummarySaved,
        serde_json::json!({
            "email_id": email_id,
            "body_summary": body_summary.is_some(),
            "reply_summary": reply_summary.is_some(),
        }),
    );
}
