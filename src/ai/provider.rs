use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ai::{ChatMessage, ChatOptions, ChatOutcome, ChatRole, ModelInfo, ProviderKind};
use crate::error::{AppError, ProviderError};
use crate::Result;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const GOOGLE_BASE: &str = "https://generativelanguage.googleapis.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 600;

/// One vendor endpoint bound to one model, holding a decrypted key for
/// the lifetime of the request being served. Construction is the only
/// place the plaintext key is accepted; it is never logged or serialized.
pub struct ChatBackend {
    kind: ProviderKind,
    api_key: String,
    base_url: Url,
    model_id: String,
    client: Client,
    timeout: Duration,
}

impl ChatBackend {
    pub fn new(
        kind: ProviderKind,
        api_key: String,
        base_url: Option<&str>,
        model_id: String,
        timeout: Duration,
    ) -> Result<Self> {
        let base = match (kind, base_url) {
            (_, Some(url)) => url.trim_end_matches('/').to_string(),
            (ProviderKind::OpenAi, None) => OPENAI_BASE.to_string(),
            (ProviderKind::Anthropic, None) => ANTHROPIC_BASE.to_string(),
            (ProviderKind::Google, None) => GOOGLE_BASE.to_string(),
            (ProviderKind::Custom, None) => {
                return Err(AppError::ConfigError(
                    "custom provider requires a base URL".to_string(),
                ))
            }
        };
        let base_url = Url::parse(&base)
            .map_err(|e| AppError::ConfigError(format!("invalid provider base URL: {}", e)))?;

        let client = Client::builder()
            .build()
            .map_err(|e| AppError::InternalError(format!("http client build failed: {}", e)))?;

        Ok(Self {
            kind,
            api_key,
            base_url,
            model_id,
            client,
            timeout,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn vendor(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Sends one chat completion in the vendor's wire format and maps the
    /// reply into the uniform outcome shape.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> std::result::Result<ChatOutcome, ProviderError> {
        match self.kind {
            // Custom endpoints speak the OpenAI dialect at their own URL.
            ProviderKind::OpenAi | ProviderKind::Custom => self.chat_openai(messages, options).await,
            ProviderKind::Anthropic => self.chat_anthropic(messages, options).await,
            ProviderKind::Google => self.chat_google(messages, options).await,
        }
    }

    /// Vendor model listing where the API offers one; the configured model
    /// as a single-entry list where it does not.
    pub async fn list_models(&self) -> std::result::Result<Vec<ModelInfo>, ProviderError> {
        match self.kind {
            ProviderKind::OpenAi => {
                let url = self.endpoint("/models");
                let body: OpenAiModelList = self
                    .execute(self.client.get(url).bearer_auth(&self.api_key))
                    .await?;
                Ok(body
                    .data
                    .into_iter()
                    .map(|m| ModelInfo { display_name: m.id.clone(), id: m.id })
                    .collect())
            }
            ProviderKind::Anthropic => {
                let url = self.endpoint("/v1/models");
                let body: AnthropicModelList = self
                    .execute(
                        self.client
                            .get(url)
                            .header("x-api-key", &self.api_key)
                            .header("anthropic-version", ANTHROPIC_VERSION),
                    )
                    .await?;
                Ok(body
                    .data
                    .into_iter()
                    .map(|m| ModelInfo {
                        display_name: m.display_name.unwrap_or_else(|| m.id.clone()),
                        id: m.id,
                    })
                    .collect())
            }
            ProviderKind::Google => {
                let mut url = self.endpoint("/v1beta/models");
                url.query_pairs_mut().append_pair("key", &self.api_key);
                let body: GoogleModelList = self.execute(self.client.get(url)).await?;
                Ok(body
                    .models
                    .into_iter()
                    .map(|m| ModelInfo {
                        id: m.name.trim_start_matches("models/").to_string(),
                        display_name: m.display_name.unwrap_or(m.name),
                    })
                    .collect())
            }
            ProviderKind::Custom => Ok(vec![ModelInfo {
                id: self.model_id.clone(),
                display_name: self.model_id.clone(),
            }]),
        }
    }

    async fn chat_openai(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> std::result::Result<ChatOutcome, ProviderError> {
        let payload = OpenAiChatRequest {
            model: &self.model_id,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: openai_role(m.role),
                    content: &m.content,
                })
                .collect(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let url = self.endpoint("/chat/completions");
        let body: OpenAiChatResponse = self
            .execute(self.client.post(url).bearer_auth(&self.api_key).json(&payload))
            .await?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = body.usage.unwrap_or_default();

        Ok(ChatOutcome {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_anthropic(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> std::result::Result<ChatOutcome, ProviderError> {
        // System turns ride in the dedicated field, not the message list.
        let system = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let payload = AnthropicChatRequest {
            model: &self.model_id,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system: if system.is_empty() { None } else { Some(&system) },
            messages: messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| AnthropicMessage {
                    role: if m.role == ChatRole::Assistant { "assistant" } else { "user" },
                    content: &m.content,
                })
                .collect(),
        };

        let url = self.endpoint("/v1/messages");
        let body: AnthropicChatResponse = self
            .execute(
                self.client
                    .post(url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&payload),
            )
            .await?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatOutcome {
            content,
            prompt_tokens: body.usage.input_tokens,
            completion_tokens: body.usage.output_tokens,
        })
    }

    async fn chat_google(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> std::result::Result<ChatOutcome, ProviderError> {
        let system_text = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let payload = GoogleChatRequest {
            contents: messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| GoogleContent {
                    role: if m.role == ChatRole::Assistant { "model" } else { "user" },
                    parts: vec![GooglePart { text: m.content.clone() }],
                })
                .collect(),
            system_instruction: if system_text.is_empty() {
                None
            } else {
                Some(GoogleContent {
                    role: "user",
                    parts: vec![GooglePart { text: system_text }],
                })
            },
            generation_config: GoogleGenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
            },
        };

        let mut url = self.endpoint(&format!("/v1beta/models/{}:generateContent", self.model_id));
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let body: GoogleChatResponse = self.execute(self.client.post(url).json(&payload)).await?;

        let content = body
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = body.usage_metadata.unwrap_or_default();

        Ok(ChatOutcome {
            content,
            prompt_tokens: usage.prompt_token_count.unwrap_or(0),
            completion_tokens: usage.candidates_token_count.unwrap_or(0),
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}{}",
            url.path().trim_end_matches('/'),
            path
        );
        url.set_path(&joined);
        url
    }

    /// Sends a request with the per-attempt timeout and decodes the JSON
    /// body. Error details carry status and body only; request URLs are
    /// dropped so query-string credentials can never surface.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, ProviderError> {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    vendor: self.vendor(),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                ProviderError::RequestFailed {
                    vendor: self.vendor(),
                    status: 0,
                    detail: e.without_url().to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(self.vendor(), status, &body));
        }

        response.json::<T>().await.map_err(|e| ProviderError::InvalidResponse {
            vendor: self.vendor(),
            source: e.without_url(),
        })
    }
}

fn map_http_error(vendor: &'static str, status: StatusCode, body: &str) -> ProviderError {
    let mut detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    if detail.is_empty() {
        detail = status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string();
    }
    ProviderError::RequestFailed {
        vendor,
        status: status.as_u16(),
        detail,
    }
}

fn openai_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

// --- OpenAI-compatible wire format ---

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiInboundMessage,
}

#[derive(Deserialize)]
struct OpenAiInboundMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAiModelList {
    data: Vec<OpenAiModelEntry>,
}

#[derive(Deserialize)]
struct OpenAiModelEntry {
    id: String,
}

// --- Anthropic wire format ---

#[derive(Serialize)]
struct AnthropicChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicChatResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicModelList {
    data: Vec<AnthropicModelEntry>,
}

#[derive(Deserialize)]
struct AnthropicModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

// --- Google wire format ---

#[derive(Serialize)]
struct GoogleChatRequest {
    contents: Vec<GoogleContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GoogleGenerationConfig,
}

#[derive(Serialize)]
struct GoogleContent {
    role: &'static str,
    parts: Vec<GooglePart>,
}

#[derive(Serialize, Deserialize)]
struct GooglePart {
    text: String,
}

#[derive(Serialize)]
struct GoogleGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct GoogleChatResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GoogleUsage>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: GoogleInboundContent,
}

#[derive(Deserialize)]
struct GoogleInboundContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize, Default)]
struct GoogleUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct GoogleModelList {
    #[serde(default)]
    models: Vec<GoogleModelEntry>,
}

#[derive(Deserialize)]
struct GoogleModelEntry {
    name: String,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
}
