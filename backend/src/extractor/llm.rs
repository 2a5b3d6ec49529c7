use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::extractor::Extractor;
use crate::model::AttrMap;

const SYSTEM_PROMPT: &str = "You classify server-hardware marketplace listing titles. \
Respond with a single JSON object and nothing else: \
{\"component_type\": one of ram|cpu|ssd|hdd|nic|hba|psu|gpu|other, \
\"attributes\": an object of extracted attributes (generation, ecc, capacity, \
speed, family, model, interface, form_factor, cores, rpm, wattage, ports, \
memory, mode; include only what the title states)}";

/// Language-model backed extractor speaking an OpenAI-compatible chat API.
pub struct LlmExtractor {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmExtractor {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    #[instrument(skip(self, context), fields(title = %title), level = "debug")]
    async fn classify_and_extract(
        &self,
        title: &str,
        context: Option<&AttrMap>,
    ) -> Result<(String, AttrMap)> {
        let mut user = format!("Title: {title}");
        if let Some(ctx) = context {
            if !ctx.is_empty() {
                user.push_str(&format!(
                    "\nKnown attributes: {}",
                    serde_json::to_string(ctx)?
                ));
            }
        }

        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let completion: ChatResponse = resp.json().await?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("extractor returned no choices"))?;

        let parsed: ExtractionDto = serde_json::from_str(strip_fences(content))
            .with_context(|| format!("unparseable extraction output: {content}"))?;

        debug!(
            component_type = %parsed.component_type,
            attr_count = parsed.attributes.len(),
            "listing extracted"
        );

        Ok((parsed.component_type, parsed.attributes))
    }
}

/// Models wrap JSON in markdown fences often enough to tolerate it.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ExtractionDto {
    component_type: String,
    #[serde(default)]
    attributes: AttrMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fences_handles_plain_and_fenced() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn extraction_dto_tolerates_missing_attributes() {
        let dto: ExtractionDto =
            serde_json::from_str("{\"component_type\":\"ram\"}").expect("parse");
        assert_eq!(dto.component_type, "ram");
        assert!(dto.attributes.is_empty());
    }
}
