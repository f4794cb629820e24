//! Built-in AI tool catalog: prompt-template tools dispatched through the
//! default model chain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ai::service::AiDispatcher;
use crate::ai::{ChatMessage, ChatOptions};
use crate::tools::{ToolOutput, ToolProcessor, ToolSpec};
use crate::Result;

const MAX_TEXT_LEN: usize = 6000;
const ALLOWED_TONES: &[&str] = &["formal", "casual", "friendly", "persuasive"];

/// A chat tool described entirely by its prompts. The user prompt is
/// assembled from the validated input payload.
struct PromptTool {
    system_prompt: &'static str,
    build_user_prompt: fn(&Value) -> String,
    options: ChatOptions,
}

#[async_trait]
impl ToolProcessor for PromptTool {
    async fn process(&self, input: &Value, ai: &AiDispatcher) -> Result<ToolOutput> {
        let chain = ai.default_chain().await?;
        let messages = vec![
            ChatMessage::system(self.system_prompt),
            ChatMessage::user((self.build_user_prompt)(input)),
        ];
        let result = ai.chat(&chain, &messages, &self.options).await?;

        Ok(ToolOutput {
            content: json!({ "text": result.content }),
            model: Some(result.model_name.clone()),
            used_ai: true,
            ai_tokens: result.total_tokens() as i32,
            ai_cost: result.cost,
        })
    }
}

pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            id: "summarizer".into(),
            require_auth: false,
            skip_usage_check: false,
            skip_moderation: false,
            validate: validate_text_input,
            processor: Arc::new(PromptTool {
                system_prompt: "You summarize text. Reply with a concise summary of the \
                                provided content, at most three sentences.",
                build_user_prompt: |input| text_field(input).to_string(),
                options: ChatOptions { max_tokens: 512, temperature: Some(0.3) },
            }),
        },
        ToolSpec {
            id: "headline-generator".into(),
            require_auth: false,
            skip_usage_check: false,
            skip_moderation: false,
            validate: validate_text_input,
            processor: Arc::new(PromptTool {
                system_prompt: "You write headlines. Produce five short, punchy headline \
                                options for the provided content, one per line.",
                build_user_prompt: |input| text_field(input).to_string(),
                options: ChatOptions { max_tokens: 256, temperature: Some(0.9) },
            }),
        },
        ToolSpec {
            id: "tone-rewriter".into(),
            require_auth: false,
            skip_usage_check: false,
            skip_moderation: false,
            validate: validate_tone_input,
            processor: Arc::new(PromptTool {
                system_prompt: "You rewrite text in a requested tone while preserving its \
                                meaning. Reply with the rewritten text only.",
                build_user_prompt: |input| {
                    format!(
                        "Rewrite in a {} tone:\n\n{}",
                        input.get("tone").and_then(Value::as_str).unwrap_or("neutral"),
                        text_field(input)
                    )
                },
                options: ChatOptions { max_tokens: 1024, temperature: Some(0.7) },
            }),
        },
    ]
}

fn text_field(input: &Value) -> &str {
    input.get("text").and_then(Value::as_str).unwrap_or_default()
}

fn validate_text_input(input: &Value) -> std::result::Result<(), String> {
    let text = input
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| "field 'text' is required".to_string())?;

    if text.trim().is_empty() {
        return Err("field 'text' must not be empty".to_string());
    }
    if text.len() > MAX_TEXT_LEN {
        return Err(format!("field 'text' exceeds {} characters", MAX_TEXT_LEN));
    }
    Ok(())
}

fn validate_tone_input(input: &Value) -> std::result::Result<(), String> {
    validate_text_input(input)?;

    let tone = input
        .get("tone")
        .and_then(Value::as_str)
        .ok_or_else(|| "field 'tone' is required".to_string())?;

    if !ALLOWED_TONES.contains(&tone) {
        return Err(format!("tone must be one of: {}", ALLOWED_TONES.join(", ")));
    }
    Ok(())
}
