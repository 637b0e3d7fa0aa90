use std::time::Duration;

use async_trait::async_trait;
use mailflow_core::config::LLM_REQUEST_TIMEOUT_SECS;
use mailflow_core::types::EmailCategory;
use tracing::warn;

use crate::client::{ChatClient, ChatMessage};
use crate::error::Result;
use crate::prompts;
use crate::structured::{self, ParseOutcome};

const TEMPERATURE: f32 = 0.1;
const CHAT_RETRIES: u32 = 2;
const COMPOSE_RETRIES: u32 = 1;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Signature/greeting/closing injected into the writer prompt.
#[derive(Debug, Clone)]
pub struct ReplyTemplates {
    pub greeting: String,
    pub closing: String,
    pub signature: String,
}

impl Default for ReplyTemplates {
    fn default() -> Self {
        Self {
            greeting: "尊敬的客户，您好！".to_string(),
            closing: "祝好！".to_string(),
            signature: "Agentia 团队".to_string(),
        }
    }
}

/// Input to one draft trial.
#[derive(Debug, Clone)]
pub struct DraftInput {
    pub category: EmailCategory,
    pub body: String,
    /// Composed retrieval answer; empty for complaint/feedback without
    /// retrieval context.
    pub retrieved: String,
}

/// Proofreader verdict surfaced to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proofread {
    pub sendable: bool,
    pub feedback: String,
}

/// The language-model operations the pipeline depends on.
///
/// Implementations absorb structured-output flakiness internally: every
/// method either returns a usable value (possibly a documented default) or
/// a transport-level error after retries.
#[async_trait]
pub trait SupportLlm: Send + Sync {
    async fn classify(&self, body: &str) -> Result<EmailCategory>;

    /// 1-3 focused knowledge-base questions for the email.
    async fn rag_queries(&self, body: &str) -> Result<Vec<String>>;

    /// Category-specific answer composition over retrieved context.
    async fn compose_answer(
        &self,
        query: &str,
        context: &str,
        category: EmailCategory,
    ) -> Result<String>;

    /// One draft trial; `history` carries earlier drafts and proofreader
    /// feedback for this message.
    async fn draft(&self, input: &DraftInput, history: &[String]) -> Result<String>;

    async fn proofread(&self, original: &str, draft: &str) -> Result<Proofread>;

    /// 50-100 character summary of arbitrary text.
    async fn summarise(&self, text: &str) -> Result<String>;
}

/// Production implementation over a SiliconFlow-compatible chat endpoint.
pub struct SiliconFlowLlm {
    chat: ChatClient,
    templates: ReplyTemplates,
}

impl SiliconFlowLlm {
    pub fn new(api_key: String, base_url: String, model: String, templates: ReplyTemplates) -> Self {
        let chat = ChatClient::new(
            api_key,
            base_url,
            model,
            Duration::from_secs(LLM_REQUEST_TIMEOUT_SECS),
        );
        Self { chat, templates }
    }

    pub fn model(&self) -> &str {
        self.chat.model()
    }

    async fn single_user_call(&self, prompt: String, retries: u32) -> Result<String> {
        self.chat
            .complete(&[ChatMessage::user(prompt)], TEMPERATURE, retries, RETRY_BACKOFF)
            .await
    }
}

#[async_trait]
impl SupportLlm for SiliconFlowLlm {
    async fn classify(&self, body: &str) -> Result<EmailCategory> {
        let prompt = prompts::fill(prompts::CATEGORIZE_EMAIL_PROMPT, &[("email", body)]);
        let raw = self.single_user_call(prompt, CHAT_RETRIES).await?;
        Ok(match structured::parse_category(&raw) {
            ParseOutcome::Parsed(cat) => cat,
            ParseOutcome::Fallback(cat) => {
                warn!(category = %cat, "classification recovered from free text");
                cat
            }
            ParseOutcome::Unusable => {
                warn!("classification unusable; defaulting to product_enquiry");
                EmailCategory::ProductEnquiry
            }
        })
    }

    async fn rag_queries(&self, body: &str) -> Result<Vec<String>> {
        let prompt = prompts::fill(prompts::GENERATE_RAG_QUERIES_PROMPT, &[("email", body)]);
        let raw = self.single_user_call(prompt, CHAT_RETRIES).await?;
        Ok(match structured::parse_queries(&raw) {
            ParseOutcome::Parsed(qs) => qs,
            ParseOutcome::Fallback(qs) => {
                warn!(count = qs.len(), "queries recovered from free text");
                qs
            }
            ParseOutcome::Unusable => {
                warn!("queries unusable; falling back to body prefix");
                vec![structured::body_prefix_query(body)]
            }
        })
    }

    async fn compose_answer(
        &self,
        query: &str,
        context: &str,
        category: EmailCategory,
    ) -> Result<String> {
        let template = match category {
            EmailCategory::ProductEnquiry => prompts::GENERATE_RAG_ANSWER_PRODUCT_ENQUIRY,
            EmailCategory::CustomerComplaint => prompts::GENERATE_RAG_ANSWER_CUSTOMER_COMPLAINT,
            EmailCategory::CustomerFeedback => prompts::GENERATE_RAG_ANSWER_CUSTOMER_FEEDBACK,
            EmailCategory::Unrelated => prompts::GENERATE_RAG_ANSWER_PROMPT,
        };
        let prompt = prompts::fill(template, &[("context", context), ("question", query)]);
        let answer = self.single_user_call(prompt, COMPOSE_RETRIES).await?;
        Ok(answer.trim().to_string())
    }

    async fn draft(&self, input: &DraftInput, history: &[String]) -> Result<String> {
        let system = prompts::writer_system_prompt(
            &self.templates.greeting,
            &self.templates.closing,
            &self.templates.signature,
        );
        let information = format!(
            "# **EMAIL CATEGORY:** {}\n\n# **EMAIL CONTENT:**\n{}\n\n# **INFORMATION:**\n{}",
            input.category, input.body, input.retrieved
        );

        let mut messages = vec![ChatMessage::system(system)];
        for entry in history {
            // Drafts came from the writer, feedback from the proofreader.
            if entry.starts_with("**Draft") {
                messages.push(ChatMessage::assistant(entry.clone()));
            } else {
                messages.push(ChatMessage::user(entry.clone()));
            }
        }
        messages.push(ChatMessage::user(information.clone()));

        let raw = self
            .chat
            .complete(&messages, TEMPERATURE, CHAT_RETRIES, RETRY_BACKOFF)
            .await?;
        match structured::parse_draft(&raw) {
            ParseOutcome::Parsed(text) => Ok(text),
            ParseOutcome::Fallback(text) => {
                warn!("draft recovered from free text");
                Ok(text)
            }
            ParseOutcome::Unusable => {
                // Free-text retry without the JSON instruction.
                warn!("draft unusable; retrying as plain text");
                let plain = format!("{}\n\n直接输出邮件正文，不要JSON。", information);
                let raw = self.single_user_call(plain, CHAT_RETRIES).await?;
                Ok(raw.trim().to_string())
            }
        }
    }

    async fn proofread(&self, original: &str, draft: &str) -> Result<Proofread> {
        let prompt = prompts::fill(
            prompts::EMAIL_PROOFREADER_PROMPT,
            &[("initial_email", original), ("generated_email", draft)],
        );
        let raw = self.single_user_call(prompt, CHAT_RETRIES).await?;
        Ok(match structured::parse_proofread(&raw) {
            ParseOutcome::Parsed(v) | ParseOutcome::Fallback(v) => Proofread {
                sendable: v.sendable,
                feedback: v.feedback,
            },
            ParseOutcome::Unusable => {
                // Conservative: never send a draft whose review we could
                // not read.
                warn!("proofread verdict unusable; treating as not sendable");
                Proofread {
                    sendable: false,
                    feedback: raw.trim().to_string(),
                }
            }
        })
    }

    async fn summarise(&self, text: &str) -> Result<String> {
        let prompt = prompts::fill(prompts::SUMMARISE_PROMPT, &[("text", text)]);
        let raw = self.single_user_call(prompt, CHAT_RETRIES).await?;
        Ok(raw.trim().to_string())
    }
}
