//! Google Gemini provider implementation

use super::models::ModelDef;
use super::types::{
    ContentBlock, LlmRequest, LlmResponse, MessageRole, StreamDelta, ToolCall, Usage,
};
use super::{LlmError, LlmService, LlmStream};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    api_key: String,
    model: &'static ModelDef,
    base_url: String,
}

impl GeminiService {
    pub fn new(
        api_key: String,
        model: &'static ModelDef,
        base_url: Option<&str>,
    ) -> Result<Self, LlmError> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url,
        })
    }

    fn endpoint(&self, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model.api_name
            )
        } else {
            format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model.api_name
            )
        }
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = if request.system.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(
                    request
                        .system
                        .iter()
                        .map(|s| s.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                )],
            })
        };

        let mut contents = Vec::new();
        for msg in &request.messages {
            let role = match msg.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "model",
            };

            let parts: Vec<GeminiPart> = msg
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => GeminiPart::text(text.clone()),
                    ContentBlock::ToolUse { name, input, .. } => GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: name.clone(),
                            args: input.clone(),
                        }),
                        ..GeminiPart::default()
                    },
                    ContentBlock::ToolResult {
                        name,
                        content,
                        is_error,
                        ..
                    } => {
                        let response = if *is_error {
                            json!({ "error": content })
                        } else {
                            json!({ "result": content })
                        };
                        GeminiPart {
                            function_response: Some(GeminiFunctionResponse {
                                name: name.clone(),
                                response,
                            }),
                            ..GeminiPart::default()
                        }
                    }
                })
                .collect();

            if !parts.is_empty() {
                contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts,
                });
            }
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(vec![GeminiTool {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    })
                    .collect(),
            }])
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: request.max_tokens.map(|max| GeminiGenerationConfig {
                max_output_tokens: Some(max),
            }),
        }
    }

    /// Convert one response (or one streamed chunk) into deltas
    fn response_deltas(resp: GeminiResponse) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();

        if let Some(candidate) = resp.candidates.into_iter().next() {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if part.thought {
                    continue;
                }
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        deltas.push(StreamDelta::Text(text));
                    }
                }
                if let Some(call) = part.function_call {
                    deltas.push(StreamDelta::ToolCall(ToolCall::generated(
                        call.name, call.args,
                    )));
                }
            }
            if let Some(reason) = candidate.finish_reason {
                deltas.push(StreamDelta::Finish {
                    end_turn: reason == "STOP",
                });
            }
        }

        if let Some(usage) = resp.usage_metadata {
            deltas.push(StreamDelta::Usage(Usage {
                input_tokens: u64::from(usage.prompt_token_count),
                output_tokens: u64::from(usage.candidates_token_count),
            }));
        }

        deltas
    }

    fn normalize_response(resp: GeminiResponse) -> Result<LlmResponse, LlmError> {
        if resp.candidates.is_empty() {
            let reason = resp
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(LlmError::unknown(format!("Empty response from model: {reason}")));
        }

        let mut progress = StreamProgress::default();
        let deltas = progress.observe(resp)?;
        progress.finish()?;

        let mut acc = super::ResponseAccumulator::new();
        for delta in deltas {
            acc.push(delta);
        }
        Ok(acc.finish())
    }

    async fn send(&self, streaming: bool, request: &LlmRequest) -> Result<reqwest::Response, LlmError> {
        let body = Self::translate_request(request);

        let response = self
            .client
            .post(self.endpoint(streaming))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        let message = serde_json::from_str::<GeminiErrorResponse>(&body)
            .map_or(body, |err| err.error.message);
        let err = LlmError::from_status(status.as_u16(), &message);
        Err(match retry_after {
            Some(wait) => err.with_retry_after(wait),
            None => err,
        })
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let response = self.send(false, request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(gemini_response)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        let response = self.send(true, request).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = SseLineBuffer::default();
            let mut progress = StreamProgress::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::network(format!("Stream interrupted: {e}"))))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&chunk) {
                    let parsed = serde_json::from_str::<GeminiResponse>(&data)
                        .map_err(|e| {
                            LlmError::unknown(format!(
                                "Failed to parse stream chunk: {e} - data: {data}"
                            ))
                        })
                        .and_then(|resp| progress.observe(resp));
                    match parsed {
                        Ok(deltas) => {
                            for delta in deltas {
                                if tx.send(Ok(delta)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if let Err(e) = progress.finish() {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    fn model_id(&self) -> &str {
        self.model.id
    }

    fn context_window(&self) -> usize {
        self.model.context_window
    }
}

/// What a response has produced so far. A blocked prompt, or a response
/// that ends with neither content nor a normal stop, is an error rather
/// than an empty reply.
#[derive(Debug, Default)]
struct StreamProgress {
    produced_content: bool,
    stopped: bool,
}

impl StreamProgress {
    fn observe(&mut self, resp: GeminiResponse) -> Result<Vec<StreamDelta>, LlmError> {
        if resp.candidates.is_empty() {
            if let Some(reason) = resp.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
                return Err(LlmError::unknown(format!("Prompt blocked by model: {reason}")));
            }
        }

        let deltas = GeminiService::response_deltas(resp);
        for delta in &deltas {
            match delta {
                StreamDelta::Text(_) | StreamDelta::ToolCall(_) => self.produced_content = true,
                StreamDelta::Finish { end_turn: true } => self.stopped = true,
                StreamDelta::Finish { .. } | StreamDelta::Usage(_) => {}
            }
        }
        Ok(deltas)
    }

    fn finish(&self) -> Result<(), LlmError> {
        if self.produced_content || self.stopped {
            Ok(())
        } else {
            Err(LlmError::unknown("Empty response from model: no content"))
        }
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
    #[serde(default, skip_serializing)]
    thought: bool,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
