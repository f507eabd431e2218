use once_cell::sync::Lazy;
use regex::Regex;
use whatlang::{detect, Script};

const MIN_ALPHA_CHARS: usize = 2;
const LATIN_CONFIDENCE_THRESHOLD: f64 = 0.68;
const NON_LATIN_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Links, bot commands and @mentions carry no language signal.
static NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://\S+|www\.\S+|(^|\s)/[a-z0-9_@]+|(^|\s)@[a-z0-9_]{3,}")
        .expect("valid noise regex")
});

/// Languages the bot has canned text for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Swedish,
}

impl Language {
    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Swedish => "Swedish",
        }
    }
}

fn strip_noise(text: &str) -> String {
    NOISE_RE
        .replace_all(text, " ")
        .replace('`', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Language whatlang is confident about, by English name.
///
/// Short questions usually come back unreliable; callers then leave the
/// choice of reply language to the model.
pub fn reply_language_hint(text: &str) -> Option<String> {
    let cleaned = strip_noise(text);
    if cleaned.chars().filter(|ch| ch.is_alphabetic()).count() < MIN_ALPHA_CHARS {
        return None;
    }

    let info = detect(&cleaned)?;
    let threshold = match info.script() {
        Script::Latin => LATIN_CONFIDENCE_THRESHOLD,
        _ => NON_LATIN_CONFIDENCE_THRESHOLD,
    };
    if info.is_reliable() || info.confidence() >= threshold {
        return Some(info.lang().eng_name().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_swedish_questions_get_no_hint() {
        assert_eq!(reply_language_hint("Var växer kantareller?"), None);
        assert_eq!(reply_language_hint("Hur ser en karljohan ut?"), None);
    }

    #[test]
    fn confident_detection_gives_a_hint() {
        let hint = reply_language_hint(
            "Where do chanterelles usually grow, and which trees should I look under in late summer?",
        );
        assert_eq!(hint.as_deref(), Some("English"));
    }

    #[test]
    fn no_hint_without_letters() {
        assert_eq!(reply_language_hint("🍄 12345"), None);
        assert_eq!(reply_language_hint("/last https://example.com/a.jpg"), None);
    }

    #[test]
    fn strips_links_commands_and_mentions() {
        assert_eq!(
            strip_noise("/role   https://example.com/a.jpg @someone hej"),
            "hej"
        );
    }

    #[test]
    fn language_names_match_prompt_wording() {
        assert_eq!(Language::Swedish.name(), "Swedish");
        assert_eq!(Language::English.name(), "English");
    }
}
