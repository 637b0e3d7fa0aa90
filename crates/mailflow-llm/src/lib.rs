pub mod agents;
pub mod client;
pub mod error;
pub mod models;
pub mod prompts;
pub mod structured;

pub use agents::{DraftInput, Proofread, ReplyTemplates, SiliconFlowLlm, SupportLlm};
pub use error::{LlmError, Result};
