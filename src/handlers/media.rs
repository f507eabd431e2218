use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::warn;

use crate::config::CONFIG;
use crate::llm::media::{download_media, mime_from_file_name, ImageFile};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ImageRejection {
    #[error("image download failed")]
    DownloadFailed,
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("unsupported image type {0}")]
    Unsupported(String),
}

impl ImageRejection {
    pub fn user_message(&self) -> String {
        match self {
            ImageRejection::DownloadFailed => {
                "⚠️ I couldn't download your picture. Please send it again.".to_string()
            }
            ImageRejection::TooLarge { limit, .. } => format!(
                "⚠️ That picture is too large. Please send one under {} MB.",
                limit / (1024 * 1024)
            ),
            ImageRejection::Unsupported(mime) => format!(
                "⚠️ I can't read {} images. Please send a JPEG, PNG, WebP or HEIC photo.",
                mime
            ),
        }
    }
}

/// An image attached to a message, before download.
#[derive(Debug, Clone)]
struct ImageAttachment {
    file_id: FileId,
    size: usize,
    declared_mime: Option<String>,
    file_name: Option<String>,
}

pub fn document_is_image(declared_mime: Option<&str>, file_name: Option<&str>) -> bool {
    if let Some(mime) = declared_mime {
        return mime.trim().to_ascii_lowercase().starts_with("image/");
    }
    file_name.and_then(mime_from_file_name).is_some()
}

pub fn check_size(size: usize, limit: usize) -> Result<(), ImageRejection> {
    if limit > 0 && size > limit {
        return Err(ImageRejection::TooLarge { size, limit });
    }
    Ok(())
}

fn attachment_from_message(message: &Message) -> Option<ImageAttachment> {
    if let Some(photo) = message.photo().and_then(|sizes| sizes.last()) {
        return Some(ImageAttachment {
            file_id: photo.file.id.clone(),
            size: photo.file.size as usize,
            declared_mime: None,
            file_name: None,
        });
    }

    let document = message.document()?;
    let declared_mime = document.mime_type.as_ref().map(|mime| mime.to_string());
    if !document_is_image(declared_mime.as_deref(), document.file_name.as_deref()) {
        return None;
    }
    Some(ImageAttachment {
        file_id: document.file.id.clone(),
        size: document.file.size as usize,
        declared_mime,
        file_name: document.file_name.clone(),
    })
}

/// The message's own image, or the image of the message it replies to.
fn find_attachment(message: &Message) -> Option<ImageAttachment> {
    attachment_from_message(message)
        .or_else(|| message.reply_to_message().and_then(attachment_from_message))
}

pub fn has_image(message: &Message) -> bool {
    find_attachment(message).is_some()
}

pub async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<String> {
    let file = bot.get_file(file_id.clone()).await?;
    Ok(format!(
        "https://api.telegram.org/file/bot{}/{}",
        CONFIG.bot_token, file.path
    ))
}

/// Downloads and validates the image for this turn, if there is one.
pub async fn collect_image(
    bot: &Bot,
    message: &Message,
) -> Result<Option<ImageFile>, ImageRejection> {
    let Some(attachment) = find_attachment(message) else {
        return Ok(None);
    };
    check_size(attachment.size, CONFIG.max_image_bytes)?;

    let url = match get_file_url(bot, &attachment.file_id).await {
        Ok(url) => url,
        Err(err) => {
            warn!("get_file failed for image attachment: {err}");
            return Err(ImageRejection::DownloadFailed);
        }
    };
    let bytes = download_media(&url)
        .await
        .ok_or(ImageRejection::DownloadFailed)?;
    check_size(bytes.len(), CONFIG.max_image_bytes)?;

    let image = ImageFile::new(
        bytes,
        attachment.declared_mime.as_deref(),
        attachment.file_name,
    );
    if !image.is_supported() {
        return Err(ImageRejection::Unsupported(image.mime_type));
    }
    Ok(Some(image))
}
