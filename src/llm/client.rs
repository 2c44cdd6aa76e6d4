//! Chat-completion client for Ollama or OpenAI-compatible endpoints,
//! plus the HTTP and text plumbing every LLM-adjacent call site shares
//! (chat, embeddings, the reranker sidecar).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// POST a JSON body and decode the JSON response, with uniform
/// status-code and parse handling for every endpoint the pipeline
/// talks to.
pub(crate) async fn post_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &impl Serialize,
    timeout: Duration,
) -> Result<T> {
    let mut request = client.post(url).timeout(timeout).json(body);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {key}"));
    }

    let resp = request
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{url} returned {status}: {body}");
    }

    resp.json()
        .await
        .with_context(|| format!("Failed to parse response from {url}"))
}

/// Clip text to a byte budget without splitting a UTF-8 character.
/// Used wherever a model context bounds how much of a chunk is sent.
pub(crate) fn clip_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let cut = text
        .char_indices()
        .map(|(at, _)| at)
        .take_while(|at| *at <= max_bytes)
        .last()
        .unwrap_or(0);
    &text[..cut]
}

/// Slice out the first JSON object in a response, tolerating markdown
/// fences and prose around it.
pub fn extract_json_object(content: &str) -> &str {
    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content,
    }
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

fn messages_for(prompt: &str, system: Option<&str>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(Message {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    messages.push(Message {
        role: "user".to_string(),
        content: prompt.to_string(),
    });
    messages
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Message,
}

/// Run one prompt against the configured provider and return the raw
/// response text.
pub async fn generate(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    prompt: &str,
    system: Option<&str>,
) -> Result<String> {
    match config.provider.as_str() {
        "ollama" => {
            let url = format!("{}/api/chat", config.base_url);
            let body = serde_json::json!({
                "model": model,
                "messages": messages_for(prompt, system),
                "stream": false,
            });
            let resp: OllamaChatResponse =
                post_json(client, &url, None, &body, LLM_TIMEOUT).await?;
            Ok(resp.message.content)
        }
        "openai" => {
            let url = format!("{}/v1/chat/completions", config.base_url);
            let body = serde_json::json!({
                "model": model,
                "messages": messages_for(prompt, system),
                "temperature": 0.3,
            });
            let resp: OpenAiChatResponse = post_json(
                client,
                &url,
                config.api_key.as_deref(),
                &body,
                LLM_TIMEOUT,
            )
            .await?;
            Ok(resp
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default())
        }
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── extract_json_object ──────────────────────────────

    #[test]
    fn test_extract_object_from_fenced_response() {
        let content = "Here you go:\n```json\n{\"a\": 1}\n```\nanything else";
        assert_eq!(extract_json_object(content), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_object_plain() {
        assert_eq!(extract_json_object("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_object_absent_returns_input() {
        assert_eq!(extract_json_object("no json here"), "no json here");
    }

    // ── clip_to_boundary ─────────────────────────────────

    #[test]
    fn test_clip_short_text_untouched() {
        assert_eq!(clip_to_boundary("short text", 100), "short text");
    }

    #[test]
    fn test_clip_cuts_to_budget() {
        let text = "a".repeat(200);
        assert_eq!(clip_to_boundary(&text, 100).len(), 100);
    }

    #[test]
    fn test_clip_respects_utf8_boundary() {
        // é is 2 bytes in UTF-8; an odd budget lands mid-character
        let text = "é".repeat(100);
        let clipped = clip_to_boundary(&text, 151);
        assert!(clipped.len() <= 151);
        assert!(clipped.len() % 2 == 0);
        assert!(text.starts_with(clipped));
    }

    // ── message assembly ─────────────────────────────────

    #[test]
    fn test_messages_with_system() {
        let messages = messages_for("hi", Some("be terse"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn test_messages_without_system() {
        let messages = messages_for("hi", None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }
}
