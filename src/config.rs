//! Runtime configuration loaded from the environment

use rust_decimal::Decimal;
use std::env;

/// Speech-to-text provider settings.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub language: String,
    pub model: String,
    pub project_id: String,
    pub location: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            language: "es-MX".to_string(),
            model: "latest_long".to_string(),
            project_id: "numa-local".to_string(),
            location: "us-central1".to_string(),
        }
    }
}

/// Reasoning provider settings.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub model: String,
    pub api_key: String,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NumaConfig {
    pub stt: SttConfig,
    pub reasoning: ReasoningConfig,
    /// Minimum classifier confidence for a category label to be accepted.
    pub confidence_threshold: f32,
    /// Amounts below this are treated as ant expenses in convenience contexts.
    pub ant_expense_threshold: Decimal,
    /// End-to-end budget for one request, in milliseconds.
    pub request_deadline_ms: u64,
    /// Shared secret the facade uses to sign owner tokens.
    pub auth_secret: String,
}

impl Default for NumaConfig {
    fn default() -> Self {
        Self {
            stt: SttConfig::default(),
            reasoning: ReasoningConfig::default(),
            confidence_threshold: 0.7,
            ant_expense_threshold: Decimal::from(200u32),
            request_deadline_ms: 8000,
            auth_secret: "a_very_secret_key_for_dev".to_string(),
        }
    }
}

impl NumaConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = NumaConfig::default();

        if let Ok(language) = env::var("STT_LANGUAGE") {
            config.stt.language = language;
        }
        if let Ok(model) = env::var("STT_MODEL") {
            config.stt.model = model;
        }
        if let Ok(project_id) = env::var("GOOGLE_PROJECT_ID") {
            config.stt.project_id = project_id;
        }
        if let Ok(location) = env::var("GOOGLE_LOCATION") {
            config.stt.location = location;
        }
        if let Ok(model) = env::var("REASONING_MODEL") {
            config.reasoning.model = model;
        }
        if let Ok(api_key) = env::var("GEMINI_API_KEY") {
            config.reasoning.api_key = api_key;
        }
        if let Some(threshold) = env::var("INTENT_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
        {
            config.confidence_threshold = threshold;
        }
        if let Some(threshold) = env::var("ANT_EXPENSE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<Decimal>().ok())
        {
            config.ant_expense_threshold = threshold;
        }
        if let Some(deadline) = env::var("REQUEST_DEADLINE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.request_deadline_ms = deadline;
        }
        if let Ok(secret) = env::var("SECRET_KEY") {
            config.auth_secret = secret;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NumaConfig::default();
        assert_eq!(config.stt.language, "es-MX");
        assert_eq!(config.stt.model, "latest_long");
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.ant_expense_threshold, Decimal::from(200u32));
        assert_eq!(config.request_deadline_ms, 8000);
    }
}
