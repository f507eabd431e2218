use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use teloxide::types::Message;
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

const LOGGED_TEXT_LIMIT: usize = 300;

/// Times one chat turn from the incoming message to the last edit.
#[derive(Debug)]
pub struct TurnTimer {
    kind: String,
    chat_id: i64,
    user_id: Option<i64>,
    message_id: i32,
    text: Option<String>,
    has_image: bool,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl TurnTimer {
    pub fn from_message(kind: &str, message: &Message, has_image: bool) -> Self {
        let text = message
            .text()
            .or_else(|| message.caption())
            .map(|value| {
                value
                    .replace('\n', " ")
                    .chars()
                    .take(LOGGED_TEXT_LIMIT)
                    .collect::<String>()
            });

        TurnTimer {
            kind: kind.to_string(),
            chat_id: message.chat.id.0,
            user_id: message
                .from
                .as_ref()
                .and_then(|user| i64::try_from(user.id.0).ok()),
            message_id: message.id.0,
            text,
            has_image,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_received(&self) {
        info!(
            target: TIMING_TARGET,
            "event=turn_received kind={} chat_id={} user_id={:?} message_id={} has_image={} received_at={} text={:?}",
            self.kind,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.has_image,
            self.started_at.to_rfc3339(),
            self.text
        );
    }

    pub fn complete(&mut self, status: &str, detail: Option<String>) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.status = status.to_string();
        self.detail = detail;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: TIMING_TARGET,
            "event=turn_completed kind={} chat_id={} user_id={:?} message_id={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.kind,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for TurnTimer {
    fn drop(&mut self) {
        if !self.completed {
            self.complete("aborted", None);
        }
    }
}

pub fn start_turn_timer(kind: &str, message: &Message, has_image: bool) -> TurnTimer {
    let timer = TurnTimer::from_message(kind, message, has_image);
    timer.log_received();
    timer
}

pub async fn log_llm_timing<T, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, anyhow::Error>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status,
        metadata_text
    );

    result
}
