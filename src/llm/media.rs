use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{error, warn};

use crate::utils::http::get_http_client;

pub const FALLBACK_IMAGE_MIME: &str = "image/jpeg";

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heix" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
            if brand == b"heif" || brand == b"mif1" {
                return Some("image/heif".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn mime_from_file_name(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

pub fn normalize_image_mime(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

pub fn gemini_supports_image(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/png" | "image/jpeg" | "image/webp" | "image/heic" | "image/heif"
    )
}

/// Sniffed bytes win over the declared type, then the file name, then JPEG.
pub fn resolve_image_mime(
    bytes: &[u8],
    declared: Option<&str>,
    file_name: Option<&str>,
) -> String {
    if let Some(detected) = detect_mime_type(bytes) {
        return normalize_image_mime(&detected);
    }
    if let Some(declared) = declared {
        let normalized = normalize_image_mime(declared);
        if normalized.starts_with("image/") {
            return normalized;
        }
    }
    if let Some(guessed) = file_name.and_then(mime_from_file_name) {
        return guessed.to_string();
    }
    FALLBACK_IMAGE_MIME.to_string()
}

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn redact_url(url: &str) -> String {
    // Telegram file URLs carry the bot token in the path.
    match url.find("/file/bot") {
        Some(index) => {
            let token_start = index + "/file/bot".len();
            let token_end = url[token_start..]
                .find('/')
                .map(|offset| token_start + offset)
                .unwrap_or(url.len());
            format!("{}[redacted]{}", &url[..token_start], &url[token_end..])
        }
        None => url.to_string(),
    }
}

pub async fn download_media(url: &str) -> Option<Vec<u8>> {
    let client = get_http_client();
    let log_url = redact_url(url);
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media {log_url}: timeout={}, connect={}, status={:?}, attempt={}/{}",
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media download failed for {log_url} with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
            tokio::time::sleep(delay).await;
            continue;
        }

        return match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read media bytes {log_url}: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    None
                } else {
                    let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        };
    }

    None
}

#[derive(Debug, Clone)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub display_name: Option<String>,
}

impl ImageFile {
    pub fn new(bytes: Vec<u8>, declared_mime: Option<&str>, display_name: Option<String>) -> Self {
        let mime_type = resolve_image_mime(&bytes, declared_mime, display_name.as_deref());
        Self {
            bytes,
            mime_type,
            display_name,
        }
    }

    pub fn is_supported(&self) -> bool {
        gemini_supports_image(&self.mime_type)
    }
}
