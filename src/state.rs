use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::classification::{ClassificationRecord, ClassificationResult};
use crate::llm::GeminiClient;
use crate::roles::UserRole;

#[derive(Clone)]
pub struct AppState {
    pub gemini: GeminiClient,
    last_classifications: Arc<Mutex<HashMap<i64, ClassificationRecord>>>,
    roles: Arc<Mutex<HashMap<i64, UserRole>>>,
}

impl AppState {
    pub fn new(gemini: GeminiClient) -> Self {
        AppState {
            gemini,
            last_classifications: Arc::new(Mutex::new(HashMap::new())),
            roles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn remember_classification(&self, chat_id: i64, result: ClassificationResult) {
        self.last_classifications
            .lock()
            .insert(chat_id, ClassificationRecord::new(result));
    }

    pub fn last_classification(&self, chat_id: i64) -> Option<ClassificationRecord> {
        self.last_classifications.lock().get(&chat_id).cloned()
    }

    pub fn role_for(&self, user_id: i64) -> UserRole {
        self.roles.lock().get(&user_id).copied().unwrap_or_default()
    }

    pub fn set_role(&self, user_id: i64, role: UserRole) {
        let mut roles = self.roles.lock();
        if role == UserRole::default() {
            roles.remove(&user_id);
        } else {
            roles.insert(user_id, role);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::GeminiSettings;

    fn state() -> AppState {
        AppState::new(GeminiClient::new(GeminiSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "k".to_string(),
            chat_model: "c".to_string(),
            classify_model: "m".to_string(),
            temperature: 0.2,
            max_output_tokens: 64,
            safety_profile: crate::config::SafetyProfile::Standard,
            request_timeout: Duration::from_secs(1),
        }))
    }

    #[test]
    fn keeps_latest_classification_per_chat() {
        let state = state();
        assert!(state.last_classification(1).is_none());

        state.remember_classification(
            1,
            ClassificationResult {
                genus: Some("Russula".to_string()),
                ..Default::default()
            },
        );
        state.remember_classification(
            1,
            ClassificationResult {
                genus: Some("Lactarius".to_string()),
                ..Default::default()
            },
        );
        state.remember_classification(2, ClassificationResult::default());

        let record = state.last_classification(1).unwrap();
        assert_eq!(record.result.genus.as_deref(), Some("Lactarius"));
        assert!(state.last_classification(2).is_some());
    }

    #[test]
    fn roles_default_to_forager_and_are_shared_between_clones() {
        let state = state();
        let clone = state.clone();
        assert_eq!(state.role_for(7), UserRole::Forager);

        clone.set_role(7, UserRole::Student);
        assert_eq!(state.role_for(7), UserRole::Student);

        state.set_role(7, UserRole::Forager);
        assert_eq!(clone.role_for(7), UserRole::Forager);
    }
}
