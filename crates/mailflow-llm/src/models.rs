//! Per-user model resolution: custom models first, then user settings,
//! then the service-wide defaults from the environment.

use mailflow_core::config::AiConfig;
use mailflow_core::types::{CustomModel, ModelKind, UserSettings};

use crate::error::{LlmError, Result};

/// Everything needed to construct a client for one model slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
}

/// Infer embedding dimensionality from well-known model id patterns.
/// Unknown models fall back to an embedding probe at index/load time.
pub fn dimension_from_model_name(model: &str) -> Option<usize> {
    let m = model.to_lowercase();
    if m.contains("embedding-8b") {
        Some(4096)
    } else if m.contains("embedding-4b") {
        Some(2560)
    } else if m.contains("embedding-2b") || m.contains("embedding-1.5b") {
        Some(1024)
    } else {
        None
    }
}

pub fn resolve_reply_model(
    ai: &AiConfig,
    settings: &UserSettings,
    custom: &[CustomModel],
) -> Result<ModelSelection> {
    resolve(ai, settings.reply_model.as_deref(), custom, ModelKind::Reply, &ai.reply_model)
}

pub fn resolve_embedding_model(
    ai: &AiConfig,
    settings: &UserSettings,
    custom: &[CustomModel],
) -> Result<ModelSelection> {
    resolve(
        ai,
        settings.embedding_model.as_deref(),
        custom,
        ModelKind::Embedding,
        &ai.embedding_model,
    )
}

fn resolve(
    ai: &AiConfig,
    user_model: Option<&str>,
    custom: &[CustomModel],
    kind: ModelKind,
    default_model: &str,
) -> Result<ModelSelection> {
    // A custom model of the right kind wins outright, with its own key and
    // endpoint. When the user picked a model name, prefer a custom entry
    // matching that name; otherwise the first of the kind.
    let chosen = match user_model {
        Some(name) => custom
            .iter()
            .find(|m| m.kind == kind && m.model_id == name),
        None => custom.iter().find(|m| m.kind == kind),
    };
    if let Some(cm) = chosen {
        return Ok(ModelSelection {
            model: cm.model_id.clone(),
            api_key: cm.api_key.clone(),
            base_url: cm
                .base_url
                .clone()
                .unwrap_or_else(|| ai.api_base.clone()),
        });
    }

    let api_key = ai.api_key.clone().ok_or(LlmError::MissingApiKey)?;
    Ok(ModelSelection {
        model: user_model.unwrap_or(default_model).to_string(),
        api_key,
        base_url: ai.api_base.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai() -> AiConfig {
        AiConfig {
            api_key: Some("env-key".to_string()),
            ..AiConfig::default()
        }
    }

    fn custom(kind: ModelKind, model_id: &str) -> CustomModel {
        CustomModel {
            provider: "custom".to_string(),
            model_id: model_id.to_string(),
            api_key: "custom-key".to_string(),
            kind,
            base_url: Some("https://example.com/v1".to_string()),
        }
    }

    #[test]
    fn dimension_patterns() {
        assert_eq!(dimension_from_model_name("Qwen/Qwen3-Embedding-8B"), Some(4096));
        assert_eq!(dimension_from_model_name("Qwen/Qwen3-Embedding-4B"), Some(2560));
        assert_eq!(dimension_from_model_name("BAAI/embedding-1.5B"), Some(1024));
        assert_eq!(dimension_from_model_name("some-unknown-model"), None);
    }

    #[test]
    fn defaults_when_nothing_configured() {
        let sel = resolve_reply_model(&ai(), &UserSettings::default(), &[]).unwrap();
        assert_eq!(sel.model, mailflow_core::config::DEFAULT_REPLY_MODEL);
        assert_eq!(sel.api_key, "env-key");
    }

    #[test]
    fn user_setting_overrides_default_model() {
        let mut settings = UserSettings::default();
        settings.reply_model = Some("deepseek-ai/DeepSeek-V3".to_string());
        let sel = resolve_reply_model(&ai(), &settings, &[]).unwrap();
        assert_eq!(sel.model, "deepseek-ai/DeepSeek-V3");
    }

    #[test]
    fn custom_model_wins_with_own_key_and_base() {
        let mut settings = UserSettings::default();
        settings.embedding_model = Some("my-embed".to_string());
        let custom_models = vec![custom(ModelKind::Embedding, "my-embed")];
        let sel = resolve_embedding_model(&ai(), &settings, &custom_models).unwrap();
        assert_eq!(sel.model, "my-embed");
        assert_eq!(sel.api_key, "custom-key");
        assert_eq!(sel.base_url, "https://example.com/v1");
    }

    #[test]
    fn missing_key_is_an_actionable_error() {
        let mut cfg = ai();
        cfg.api_key = None;
        let err = resolve_reply_model(&cfg, &UserSettings::default(), &[]).unwrap_err();
        assert!(err.to_string().contains("SILICONFLOW_API_KEY"));
    }
}
