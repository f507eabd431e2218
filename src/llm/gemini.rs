use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::classification::{response_schema, ClassificationResult};
use crate::config::{Config, SafetyProfile, CLASSIFY_SYSTEM_PROMPT};
use crate::llm::media::{truncate_for_log, ImageFile};
use crate::llm::prompt::ChatRequest;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub classify_model: String,
    pub temperature: f32,
    pub max_output_tokens: i32,
    pub safety_profile: SafetyProfile,
    pub request_timeout: Duration,
}

impl GeminiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.gemini_base_url.clone(),
            api_key: config.gemini_api_key.clone(),
            chat_model: config.gemini_chat_model.clone(),
            classify_model: config.gemini_classify_model.clone(),
            temperature: config.gemini_temperature,
            max_output_tokens: config.gemini_max_output_tokens,
            safety_profile: config.gemini_safety_settings,
            request_timeout: config.request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        let mut text_parts = Vec::new();
        for candidate in self.candidates.as_deref().unwrap_or(&[]) {
            let parts = candidate
                .content
                .as_ref()
                .and_then(|content| content.parts.as_deref())
                .unwrap_or(&[]);
            for part in parts {
                if let GeminiPart::Text { text, thought } = part {
                    if !*thought && !text.is_empty() {
                        text_parts.push(text.as_str());
                    }
                }
            }
        }
        text_parts.concat()
    }

    fn block_reason(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
        {
            return Some(reason);
        }
        self.candidates
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(|candidate| candidate.finish_reason.as_deref())
            .find(|reason| {
                matches!(
                    *reason,
                    "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" | "RECITATION"
                )
            })
            .map(|reason| reason.to_string())
    }

    fn into_text(self) -> Result<String> {
        let text = self.text();
        if !text.trim().is_empty() {
            return Ok(text);
        }
        match self.block_reason() {
            Some(reason) => Err(anyhow!("Gemini blocked the response ({})", reason)),
            None => Err(anyhow!("Gemini returned no text")),
        }
    }
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_safety_settings(profile: SafetyProfile) -> Vec<Value> {
    let threshold = profile.threshold();
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|category| json!({ "category": category, "threshold": threshold }))
    .collect()
}

fn inline_image_part(image: &ImageFile) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": general_purpose::STANDARD.encode(&image.bytes)
        }
    })
}

fn build_chat_parts(request: &ChatRequest) -> Vec<Value> {
    let mut parts = Vec::new();
    if let Some(text) = &request.text {
        parts.push(json!({ "text": text }));
    }
    if let Some(image) = &request.image {
        parts.push(inline_image_part(image));
    }
    parts
}

fn build_chat_payload(request: &ChatRequest, settings: &GeminiSettings) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
        "contents": [{ "role": "user", "parts": build_chat_parts(request) }],
        "generationConfig": {
            "temperature": settings.temperature,
            "maxOutputTokens": settings.max_output_tokens,
        },
        "safetySettings": build_safety_settings(settings.safety_profile),
    })
}

fn build_classification_payload(image: &ImageFile, settings: &GeminiSettings) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": CLASSIFY_SYSTEM_PROMPT }] },
        "contents": [{ "role": "user", "parts": [inline_image_part(image)] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
        },
        "safetySettings": build_safety_settings(settings.safety_profile),
    })
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

/// Loggable view of a payload: prompt replaced by a label, image data by its length.
fn summarize_gemini_payload(payload: &Value, system_prompt_label: &str) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(system_prompt_label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let summarized_contents = contents
            .iter()
            .map(|content| {
                let role = content
                    .get("role")
                    .and_then(|value| value.as_str())
                    .unwrap_or("user");
                let parts = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| summarize_gemini_parts(parts))
                    .unwrap_or_default();
                json!({ "role": role, "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        let mut config = config.clone();
        if let Some(object) = config.as_object_mut() {
            if object.remove("responseSchema").is_some() {
                object.insert("responseSchema".to_string(), json!("classification"));
            }
        }
        summary.insert("generationConfig".to_string(), config);
    }

    Value::Object(summary)
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

/// What one `data:` line of the streaming endpoint carried.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Text(String),
    Blocked(String),
}

/// Splits a `streamGenerateContent?alt=sse` body into events.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = decode_sse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_sse_line(&line).into_iter().collect()
    }
}

fn decode_sse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\n', '\r']);
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let response = match serde_json::from_str::<GeminiResponse>(data) {
        Ok(response) => response,
        Err(err) => {
            debug!(target: "llm.gemini", "Skipping unparsable SSE chunk: {err}");
            return None;
        }
    };

    let text = response.text();
    if !text.is_empty() {
        return Some(SseEvent::Text(text));
    }
    response.block_reason().map(SseEvent::Blocked)
}

/// Incremental text of one streamed answer.
pub struct GeminiTextStream {
    response: Response,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

impl GeminiTextStream {
    fn new(response: Response) -> Self {
        Self {
            response,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next text delta; `None` once the stream is exhausted.
    pub async fn next_delta(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return match event {
                    SseEvent::Text(text) => Some(Ok(text)),
                    SseEvent::Blocked(reason) => {
                        self.finished = true;
                        self.pending.clear();
                        Some(Err(anyhow!("Gemini blocked the response ({})", reason)))
                    }
                };
            }
            if self.finished {
                return None;
            }

            match self.response.chunk().await {
                Ok(Some(chunk)) => {
                    let events = self.decoder.push(&chunk);
                    self.pending.extend(events);
                }
                Ok(None) => {
                    self.finished = true;
                    let events = self.decoder.finish();
                    self.pending.extend(events);
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(anyhow!("Gemini stream interrupted: {}", err)));
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    settings: Arc<GeminiSettings>,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            http: get_http_client().clone(),
            settings: Arc::new(settings),
        }
    }

    async fn post_with_retry(&self, url: &str, payload: &Value) -> Result<Response> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(url)
                .header("x-goog-api-key", &self.settings.api_key)
                .timeout(self.settings.request_timeout)
                .json(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(gemini_retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("Gemini request failed: {}", err));
                }
            };

            if response.status().is_success() {
                return Ok(response);
            }

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry =
                gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
            warn!(
                "Gemini API error: status={}, body={}, retrying={}",
                status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(gemini_retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.settings.base_url, model, method)
    }

    /// Structured identification of a single image.
    pub async fn classify_image(&self, image: &ImageFile) -> Result<ClassificationResult> {
        let model = self.settings.classify_model.as_str();
        let payload = build_classification_payload(image, &self.settings);
        if tracing::enabled!(tracing::Level::DEBUG) {
            let summary = summarize_gemini_payload(&payload, "classify_system_prompt");
            debug!(target: "llm.gemini", model = model, payload = %summary);
        }

        let metadata = json!({
            "mimeType": image.mime_type,
            "bytes": image.bytes.len(),
            "name": image.display_name,
        });
        let raw = log_llm_timing("gemini", model, "classify_image", Some(metadata), || async {
            let url = self.endpoint(model, "generateContent");
            let response = self.post_with_retry(&url, &payload).await?;
            let response = response
                .json::<GeminiResponse>()
                .await
                .context("Gemini classification response was not valid JSON")?;
            response.into_text()
        })
        .await?;

        ClassificationResult::parse(&raw).map_err(|err| {
            warn!(
                "Failed to parse structured classification: {} raw={}",
                err,
                truncate_for_log(&raw, 500)
            );
            anyhow!("unparsable classification: {}", err)
        })
    }

    /// Opens a streamed chat answer.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<GeminiTextStream> {
        if request.is_empty() {
            return Err(anyhow!("chat request has neither text nor image"));
        }
        let model = self.settings.chat_model.as_str();
        let payload = build_chat_payload(request, &self.settings);
        if tracing::enabled!(tracing::Level::DEBUG) {
            let summary = summarize_gemini_payload(&payload, "mushroom_system_prompt");
            debug!(target: "llm.gemini", model = model, payload = %summary);
        }

        let metadata = json!({
            "hasText": request.text.is_some(),
            "hasImage": request.image.is_some(),
        });
        log_llm_timing("gemini", model, "stream_chat_open", Some(metadata), || async {
            let url = format!("{}?alt=sse", self.endpoint(model, "streamGenerateContent"));
            let response = self.post_with_retry(&url, &payload).await?;
            Ok(GeminiTextStream::new(response))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;
    use crate::roles::UserRole;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn settings(base_url: String) -> GeminiSettings {
        GeminiSettings {
            base_url,
            api_key: "test-key".to_string(),
            chat_model: "chat-model".to_string(),
            classify_model: "classify-model".to_string(),
            temperature: 0.2,
            max_output_tokens: 256,
            safety_profile: SafetyProfile::Standard,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn png() -> ImageFile {
        ImageFile::new(PNG_HEADER.to_vec(), None, None)
    }

    fn text_response(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn chat_payload_puts_text_before_image() {
        let request = ChatRequest::new("what is this?", Some(png()), UserRole::Forager, None);
        let payload = build_chat_payload(&request, &settings("http://x".to_string()));
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "what is this?");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(
            parts[1]["inlineData"]["data"],
            general_purpose::STANDARD.encode(PNG_HEADER)
        );
        assert!(payload["generationConfig"].get("responseSchema").is_none());
        assert!((payload["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn classification_payload_requests_json_only() {
        let payload = build_classification_payload(&png(), &settings("http://x".to_string()));
        assert_eq!(
            payload["systemInstruction"]["parts"][0]["text"],
            CLASSIFY_SYSTEM_PROMPT
        );
        assert_eq!(payload["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(payload["generationConfig"]["responseSchema"], response_schema());
        assert_eq!(payload["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn permissive_profile_turns_filters_off() {
        let settings = build_safety_settings(SafetyProfile::Permissive);
        assert_eq!(settings.len(), 4);
        assert!(settings.iter().all(|entry| entry["threshold"] == "OFF"));
        assert!(build_safety_settings(SafetyProfile::Standard)
            .iter()
            .all(|entry| entry["threshold"] == "BLOCK_MEDIUM_AND_ABOVE"));
    }

    #[test]
    fn payload_summary_hides_image_data() {
        let request = ChatRequest::new("hi", Some(png()), UserRole::Forager, None);
        let payload = build_chat_payload(&request, &settings("http://x".to_string()));
        let summary = summarize_gemini_payload(&payload, "label");
        assert_eq!(summary["systemInstruction"], "label");
        let image = &summary["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(image["mimeType"], "image/png");
        assert!(image.get("data").is_none());
    }

    #[test]
    fn response_text_skips_thoughts_and_other_parts() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "thinking...", "thought": true },
                { "functionCall": { "name": "x" } },
                { "text": "Chanterelle" }
            ] } }]
        }))
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "Chanterelle");
    }

    #[test]
    fn empty_blocked_response_reports_reason() {
        let response: GeminiResponse =
            serde_json::from_value(json!({ "promptFeedback": { "blockReason": "SAFETY" } }))
                .unwrap();
        let err = response.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn sse_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Kantarell \"}]}}]}\r\n\r\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"är gul\"}]}}]}\r\n\r\ndata: [DONE]\r\n";
        let bytes = body.as_bytes();
        // Split inside the multi-byte 'ä'.
        let split = body.find('ä').unwrap() + 1;
        let mut events = decoder.push(&bytes[..split]);
        events.extend(decoder.push(&bytes[split..]));
        events.extend(decoder.finish());
        assert_eq!(
            events,
            vec![
                SseEvent::Text("Kantarell ".to_string()),
                SseEvent::Text("är gul".to_string())
            ]
        );
    }

    #[test]
    fn sse_decoder_flushes_unterminated_last_line() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]}}]}");
        assert!(events.is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Text("x".to_string())]);
    }

    #[test]
    fn sse_decoder_reports_blocks_and_ignores_noise() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(
            b": keep-alive\nevent: message\ndata: not json\ndata: {\"promptFeedback\":{\"blockReason\":\"OTHER\"}}\n",
        );
        assert_eq!(events, vec![SseEvent::Blocked("OTHER".to_string())]);
    }

    #[tokio::test]
    async fn classify_image_parses_structured_output() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/classify-model:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .body_contains("responseSchema");
                then.status(200).json_body(text_response(
                    r#"{"common_name":"Fly agaric","genus":"Amanita","confidence":0.9,"visible":["white warts"],"color":"red","edible":false}"#,
                ));
            })
            .await;

        let client = GeminiClient::new(settings(server.url("/v1beta")));
        let result = client.classify_image(&png()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(result.common_name.as_deref(), Some("Fly agaric"));
        assert_eq!(result.edible, Some(false));
        assert_eq!(result.confidence_percent(), 90);
    }

    #[tokio::test]
    async fn classify_image_fails_on_prose() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/classify-model:generateContent");
                then.status(200)
                    .json_body(text_response("Sorry, that is a cat."));
            })
            .await;

        let client = GeminiClient::new(settings(server.url("/v1beta")));
        let err = client.classify_image(&png()).await.unwrap_err();
        assert!(err.to_string().contains("unparsable classification"));
    }

    #[tokio::test]
    async fn retries_server_errors_once_then_fails() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/classify-model:generateContent");
                then.status(503)
                    .json_body(json!({ "error": { "message": "overloaded" } }));
            })
            .await;

        let client = GeminiClient::new(settings(server.url("/v1beta")));
        let err = client.classify_image(&png()).await.unwrap_err();
        assert_eq!(mock.hits_async().await, GEMINI_MAX_RETRY_ATTEMPTS);
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/classify-model:generateContent");
                then.status(400)
                    .json_body(json!({ "error": { "message": "bad image" } }));
            })
            .await;

        let client = GeminiClient::new(settings(server.url("/v1beta")));
        let err = client.classify_image(&png()).await.unwrap_err();
        assert_eq!(mock.hits_async().await, 1);
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn stream_chat_yields_deltas_in_order() {
        let server = MockServer::start_async().await;
        let body = [
            format!("data: {}\r\n\r\n", text_response("Look for ")),
            format!("data: {}\r\n\r\n", text_response("a ring.")),
        ]
        .concat();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/chat-model:streamGenerateContent")
                    .query_param("alt", "sse")
                    .body_contains("Please reply in Swedish.");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = GeminiClient::new(settings(server.url("/v1beta")));
        let request = ChatRequest::new("ring?", None, UserRole::Forager, Some("Swedish"));
        let mut stream = client.stream_chat(&request).await.unwrap();
        assert_eq!(stream.next_delta().await.unwrap().unwrap(), "Look for ");
        assert_eq!(stream.next_delta().await.unwrap().unwrap(), "a ring.");
        assert!(stream.next_delta().await.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stream_chat_surfaces_blocks() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/chat-model:streamGenerateContent");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("data: {\"promptFeedback\":{\"blockReason\":\"SAFETY\"}}\n\n");
            })
            .await;

        let client = GeminiClient::new(settings(server.url("/v1beta")));
        let request = ChatRequest::new("hello", None, UserRole::Forager, None);
        let mut stream = client.stream_chat(&request).await.unwrap();
        let err = stream.next_delta().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn stream_chat_rejects_empty_requests() {
        let client = GeminiClient::new(settings("http://127.0.0.1:9".to_string()));
        let request = ChatRequest::new("  ", None, UserRole::Forager, None);
        assert!(client.stream_chat(&request).await.is_err());
    }
}
