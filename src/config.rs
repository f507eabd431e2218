use std::env;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Threshold set sent as Gemini `safetySettings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyProfile {
    Standard,
    Permissive,
}

impl SafetyProfile {
    pub fn threshold(self) -> &'static str {
        match self {
            SafetyProfile::Standard => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyProfile::Permissive => "OFF",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_chat_model: String,
    pub gemini_classify_model: String,
    pub gemini_temperature: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: SafetyProfile,
    pub request_timeout_secs: u64,
    pub rate_limit_seconds: u64,
    pub telegram_max_length: usize,
    pub stream_edit_interval_ms: u64,
    pub max_image_bytes: usize,
    pub mycologists_file_path: String,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).unwrap_or_else(|| default.to_string())
}

fn env_f32<F>(lookup: &F, name: &str, default: f32) -> f32
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32<F>(lookup: &F, name: &str, default: i32) -> i32
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize<F>(lookup: &F, name: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name).unwrap_or_default();
    if value.trim().is_empty() {
        return Err(anyhow::anyhow!("{name} is required"));
    }
    Ok(value.trim().to_string())
}

fn normalize_gemini_safety_settings(value: String) -> SafetyProfile {
    match value.trim().to_lowercase().as_str() {
        "" | "standard" => SafetyProfile::Standard,
        "permissive" | "off" | "none" => SafetyProfile::Permissive,
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to standard.",
                value
            );
            SafetyProfile::Standard
        }
    }
}

fn normalize_base_url(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_GEMINI_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = required(&lookup, "BOT_TOKEN")?;
        let gemini_api_key = required(&lookup, "GEMINI_API_KEY")?;

        Ok(Config {
            bot_token,
            log_level: env_string(&lookup, "LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key,
            gemini_base_url: normalize_base_url(env_string(
                &lookup,
                "GEMINI_BASE_URL",
                DEFAULT_GEMINI_BASE_URL,
            )),
            gemini_chat_model: env_string(&lookup, "GEMINI_CHAT_MODEL", "gemini-2.5-flash"),
            gemini_classify_model: env_string(
                &lookup,
                "GEMINI_CLASSIFY_MODEL",
                "gemini-2.5-flash",
            ),
            gemini_temperature: env_f32(&lookup, "GEMINI_TEMPERATURE", 0.2),
            gemini_max_output_tokens: env_i32(&lookup, "GEMINI_MAX_OUTPUT_TOKENS", 1024),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                &lookup,
                "GEMINI_SAFETY_SETTINGS",
                "standard",
            )),
            request_timeout_secs: env_u64(&lookup, "REQUEST_TIMEOUT_SECS", 90).max(1),
            rate_limit_seconds: env_u64(&lookup, "RATE_LIMIT_SECONDS", 5),
            telegram_max_length: env_usize(&lookup, "TELEGRAM_MAX_LENGTH", 4000).max(200),
            stream_edit_interval_ms: env_u64(&lookup, "STREAM_EDIT_INTERVAL_MS", 1200),
            max_image_bytes: env_usize(&lookup, "MAX_IMAGE_BYTES", 15 * 1024 * 1024),
            mycologists_file_path: env_string(
                &lookup,
                "MYCOLOGISTS_FILE_PATH",
                "mycologists.txt",
            ),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_edit_interval(&self) -> Duration {
        Duration::from_millis(self.stream_edit_interval_ms)
    }
}

pub const MUSHROOM_SYSTEM_PROMPT: &str = "You are MushroomGPT: a helpful, cautious mycological expert.
Goals:
- Keep the conversation on mushrooms/mycology. If the question is off-topic: answer briefly and redirect with a mushroom-related follow-up question.
- Language: answer in Swedish if the user writes in Swedish, otherwise match the user's language.
- Safety first: Image-based species identification is uncertain. Never give definitive advice about eating. Always say that one should NEVER eat a mushroom based only on this chat; ask the user to consult local experts/literature.
- When someone asks \"is it edible/poisonous?\": give a cautious assessment with short reasoning (visible traits) + uncertainty, list what information is missing, and remind about risks. Do NOT give consumption recommendations. If it is only edible with the correct preparation, say so.
- Actively ask for important characteristics: habitat/substrate, location (country/region), season, cap size/color/texture, gills or pores and their attachment, stem (ring/volva), bruising/color changes, smell, spore color/spore print, exact photos (cap top/underside + stem base).
- If the picture doesn't seem to show a mushroom: say so and request more pictures/details.
- Keep answers short (max ~3 sentences), preferably bullet points. Use metric units.
- Do not give medical advice.
";

pub const CLASSIFY_SYSTEM_PROMPT: &str = "Identify the mushroom and return JSON only.";

pub const STUDENT_ROLE_PROMPT: &str = "The user is learning mycology. Explain the identifying traits you mention and define technical terms in plain words, but stay short.";

pub const MYCOLOGIST_ROLE_PROMPT: &str = "The user is an experienced mycologist. Use technical vocabulary and Latin names freely. You may discuss pigments, colour reactions, toxins and microscopic features in detail. Still never give a consumption recommendation.";
