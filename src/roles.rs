use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{CONFIG, MYCOLOGIST_ROLE_PROMPT, STUDENT_ROLE_PROMPT};
use crate::handlers::safety::RiskCategory;

static MYCOLOGISTS_CACHE: Lazy<Mutex<Option<HashSet<i64>>>> = Lazy::new(|| Mutex::new(None));
static MYCOLOGISTS_LOADED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UserRole {
    #[default]
    Forager,
    Student,
    Mycologist,
}

impl UserRole {
    pub const ALL: [UserRole; 3] = [UserRole::Forager, UserRole::Student, UserRole::Mycologist];

    pub fn name(self) -> &'static str {
        match self {
            UserRole::Forager => "forager",
            UserRole::Student => "student",
            UserRole::Mycologist => "mycologist",
        }
    }

    pub fn prompt_addendum(self) -> Option<&'static str> {
        match self {
            UserRole::Forager => None,
            UserRole::Student => Some(STUDENT_ROLE_PROMPT),
            UserRole::Mycologist => Some(MYCOLOGIST_ROLE_PROMPT),
        }
    }

    /// Medical questions are never waived.
    pub fn is_exempt_from(self, category: RiskCategory) -> bool {
        match (self, category) {
            (_, RiskCategory::Medical) => false,
            (UserRole::Mycologist, RiskCategory::Color | RiskCategory::Edibility) => true,
            _ => false,
        }
    }

    pub fn requires_verification(self) -> bool {
        matches!(self, UserRole::Mycologist)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "forager" | "default" => Ok(UserRole::Forager),
            "student" => Ok(UserRole::Student),
            "mycologist" | "expert" => Ok(UserRole::Mycologist),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

pub fn parse_mycologist_ids(content: &str) -> HashSet<i64> {
    content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid mycologist id '{}'", line);
                None
            }
        })
        .collect()
}

fn read_mycologists(path: &str) -> Option<HashSet<i64>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let ids = parse_mycologist_ids(&content);
            info!("Loaded {} mycologist id(s) from {}", ids.len(), path);
            Some(ids)
        }
        Err(err) => {
            warn!(
                "Mycologists file {} not found or failed to read: {}; the mycologist role is unavailable",
                path, err
            );
            None
        }
    }
}

fn listed_as_mycologist(ids: Option<&HashSet<i64>>, user_id: i64) -> bool {
    ids.is_some_and(|ids| ids.contains(&user_id))
}

pub fn load_mycologists() {
    if MYCOLOGISTS_LOADED.swap(true, Ordering::SeqCst) {
        return;
    }
    *MYCOLOGISTS_CACHE.lock() = read_mycologists(&CONFIG.mycologists_file_path);
}

pub fn is_verified_mycologist(user_id: i64) -> bool {
    if !MYCOLOGISTS_LOADED.load(Ordering::SeqCst) {
        load_mycologists();
    }
    listed_as_mycologist(MYCOLOGISTS_CACHE.lock().as_ref(), user_id)
}
