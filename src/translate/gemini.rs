//! Gemini REST client with a model fallback chain.
//!
//! Each segment attempt walks the configured model list in order. Any
//! per-attempt failure that is not a quota error moves on to the next
//! model; quota errors surface immediately so the engine can pause.
//! Safety thresholds are opened up as far as the API allows, because
//! literary fiction routinely trips the default filters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TranslateConfig;

use super::{integrity, TranslateError, TranslateResult, Translator};

const SAFETY_CATEGORIES: [&str; 5] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

pub struct GeminiTranslator {
    client: Client,
    config: TranslateConfig,
}

impl GeminiTranslator {
    pub fn new(config: TranslateConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("HTTP client creation should not fail");

        Self { client, config }
    }

    /// System instruction shared by every attempt. The wording is the
    /// contract the integrity check later enforces.
    fn system_instruction(&self) -> String {
        let source = language_name(&self.config.source_language);
        let target = language_name(&self.config.target_language);

        format!(
            "You are a professional literary translator working from {source} to {target}.\n\
             \n\
             You will receive a fragment of HTML markup from a book. Rules:\n\
             1. Translate ONLY the text content into {target}. Every tag must be preserved \
             identically, including attributes and nesting.\n\
             2. Never introduce, remove, or reorder any tag.\n\
             3. Return the raw markup only: no code fences, no preamble, no commentary.\n\
             4. Keep numerals exactly as written in the source.\n\
             5. Keep technical terms in {source} where that is idiomatic in {target}.\n"
        )
    }

    async fn attempt(&self, model: &str, markup: &str) -> TranslateResult<String> {
        let Some(api_key) = self.config.resolve_api_key() else {
            return Err(TranslateError::Transport(
                "no API key configured (set translate.api_key or GEMINI_API_KEY)".to_string(),
            ));
        };
        self.attempt_with_key(model, markup, &api_key).await
    }

    async fn attempt_with_key(
        &self,
        model: &str,
        markup: &str,
        api_key: &str,
    ) -> TranslateResult<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            model
        );

        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(self.system_instruction()),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(markup.to_string()),
                }],
            }],
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: "BLOCK_NONE".to_string(),
                })
                .collect(),
        };

        debug!("Sending {} chars to {}", markup.len(), model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TranslateError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Quota(format!("HTTP 429: {}", truncate(&body))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("RESOURCE_EXHAUSTED") || body.to_lowercase().contains("quota") {
                return Err(TranslateError::Quota(format!("{status}: {}", truncate(&body))));
            }
            return Err(TranslateError::Transport(format!(
                "{status}: {}",
                truncate(&body)
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Transport(format!("unreadable response: {e}")))?;

        if let Some(feedback) = &parsed.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(TranslateError::SafetyBlocked(reason.clone()));
            }
        }

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or(TranslateError::EmptyResponse)?;

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            // An empty candidate with a non-STOP finish reason is the
            // API's way of reporting a silent safety block.
            let reason = candidate.finish_reason.unwrap_or_default();
            if !reason.is_empty() && reason != "STOP" {
                return Err(TranslateError::SafetyBlocked(reason));
            }
            return Err(TranslateError::EmptyResponse);
        }

        let cleaned = integrity::strip_code_fence(&text).to_string();
        if !integrity::tags_match(markup, &cleaned) {
            return Err(TranslateError::IntegrityMismatch);
        }

        Ok(cleaned)
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, markup: &str) -> TranslateResult<String> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut last_error = TranslateError::Transport("no models configured".to_string());

        for model in &self.config.models {
            let outcome = tokio::time::timeout(timeout, self.attempt(model, markup)).await;
            match outcome {
                Ok(Ok(translated)) => return Ok(translated),
                Ok(Err(err)) if err.is_quota() => return Err(err),
                Ok(Err(err)) => {
                    warn!("Model {} failed: {}", model, err);
                    last_error = err;
                }
                Err(_) => {
                    warn!("Model {} timed out after {} ms", model, self.config.timeout_ms);
                    last_error = TranslateError::Timeout(self.config.timeout_ms);
                }
            }
        }

        Err(last_error)
    }
}

/// Expand a language code into the name used in prompts.
fn language_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "en" => "English".to_string(),
        "ar" => "Arabic".to_string(),
        "fa" => "Persian".to_string(),
        "he" => "Hebrew".to_string(),
        "ur" => "Urdu".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "it" => "Italian".to_string(),
        "pt" => "Portuguese".to_string(),
        "ru" => "Russian".to_string(),
        "tr" => "Turkish".to_string(),
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        "zh" => "Chinese".to_string(),
        "hi" => "Hindi".to_string(),
        _ => code.to_string(),
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 300 {
        let head: String = trimmed.chars().take(300).collect();
        format!("{}…", head)
    } else {
        trimmed.to_string()
    }
}
