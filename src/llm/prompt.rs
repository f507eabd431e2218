use crate::config::MUSHROOM_SYSTEM_PROMPT;
use crate::llm::media::ImageFile;
use crate::roles::UserRole;

pub fn build_system_prompt(role: UserRole, response_language: Option<&str>) -> String {
    let mut prompt = MUSHROOM_SYSTEM_PROMPT.trim_end().to_string();
    if let Some(addendum) = role.prompt_addendum() {
        prompt.push_str("\n- Role: ");
        prompt.push_str(addendum);
    }
    if let Some(language) = response_language.map(str::trim).filter(|lang| !lang.is_empty()) {
        prompt.push_str(&format!("\n\nPlease reply in {}.", language));
    }
    prompt
}

/// One chat turn: system prompt, optional user text, optional image.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub text: Option<String>,
    pub image: Option<ImageFile>,
}

impl ChatRequest {
    pub fn new(
        text: &str,
        image: Option<ImageFile>,
        role: UserRole,
        response_language: Option<&str>,
    ) -> Self {
        let text = text.trim();
        Self {
            system_prompt: build_system_prompt(role, response_language),
            text: if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            },
            image,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image.is_none()
    }
}
