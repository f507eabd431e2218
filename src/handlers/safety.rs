use once_cell::sync::Lazy;
use regex::Regex;

use crate::roles::UserRole;
use crate::utils::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCategory {
    Color,
    Edibility,
    Medical,
}

impl RiskCategory {
    pub fn name(self) -> &'static str {
        match self {
            RiskCategory::Color => "color",
            RiskCategory::Edibility => "edibility",
            RiskCategory::Medical => "medical",
        }
    }

    pub fn warning(self, language: Language) -> &'static str {
        let swedish = language == Language::Swedish;
        match (self, swedish) {
            (RiskCategory::Color, true) => {
                "⚠️ Jag kan inte direkt säga vilken färg svampen har – ljus, ålder och miljö påverkar.\n\
                 📌 Beskriv istället själv (hatt, skivor/rör, fot, lukt osv.). \
                 Kom ihåg: ät aldrig en svamp baserat på en chatt."
            }
            (RiskCategory::Color, false) => {
                "⚠️ I can't reliably tell the mushroom's color – light, age and surroundings all change it.\n\
                 📌 Please describe it yourself (cap, gills/pores, stem, smell etc.). \
                 Remember: never eat a mushroom based on a chat."
            }
            (RiskCategory::Edibility, true) => {
                "⚠️ Säkerhetsvarning: Frågor om ätlighet/giftighet kan vara farliga.\n\
                 Jag kan gärna beskriva synliga drag och riskfaktorer, \
                 men **du ska aldrig äta en svamp baserat på en chatt**.\n\
                 Kontakta alltid lokala experter eller litteratur."
            }
            (RiskCategory::Edibility, false) => {
                "⚠️ Safety warning: questions about edibility/toxicity can be dangerous.\n\
                 I'm happy to describe visible traits and risk factors, \
                 but **you should never eat a mushroom based on a chat**.\n\
                 Always consult local experts or literature."
            }
            (RiskCategory::Medical, true) => {
                "⚠️ Jag kan inte ge medicinska råd om svampförgiftning.\n\
                 Rådfråga alltid sjukvård. Mitt fokus är endast på mykologiska kännetecken."
            }
            (RiskCategory::Medical, false) => {
                "⚠️ I can't give medical advice about mushroom poisoning.\n\
                 Always contact healthcare or a poison control center. I only cover mycological traits."
            }
        }
    }
}

/// A question caught by the filter, with the language of the wording that matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskMatch {
    pub category: RiskCategory,
    pub language: Language,
}

impl RiskMatch {
    pub fn warning(self) -> &'static str {
        self.category.warning(self.language)
    }
}

fn compile(patterns: &[(Language, &str)]) -> Vec<(Language, Regex)> {
    patterns
        .iter()
        .map(|(language, pattern)| {
            (*language, Regex::new(pattern).expect("valid risk pattern"))
        })
        .collect()
}

static RISK_PATTERNS: Lazy<Vec<(RiskCategory, Vec<(Language, Regex)>)>> = Lazy::new(|| {
    use Language::{English, Swedish};
    vec![
        (
            RiskCategory::Color,
            compile(&[
                (English, r"what\s+colou?r\s+is\s+the\s+mushroom"),
                (English, r"mushroom'?s\s+colou?r"),
                (Swedish, r"vilken\s+färg\s+har\s+svampen"),
            ]),
        ),
        (
            RiskCategory::Edibility,
            compile(&[
                (English, r"\b(is\s+it\s+edible|eat\s+this)\b"),
                (Swedish, r"\bkan\s+man\s+äta\b"),
                (English, r"\b(poisonous|toxic)\b"),
                (Swedish, r"\bgiftig\b"),
            ]),
        ),
        (
            RiskCategory::Medical,
            compile(&[
                (English, r"\b(symptoms?|treatment|cure|medicine)\b"),
                (Swedish, r"\b(symtom|behandling|medicin|sjukdom)\b"),
            ]),
        ),
    ]
});

/// First risk category the question matches, checked in a fixed order.
pub fn classify_question(text: &str) -> Option<RiskMatch> {
    let lowered = text.to_lowercase();
    RISK_PATTERNS.iter().find_map(|(category, patterns)| {
        patterns
            .iter()
            .find(|(_, pattern)| pattern.is_match(&lowered))
            .map(|(language, _)| RiskMatch {
                category: *category,
                language: *language,
            })
    })
}

/// Match that blocks the question for this role, if any.
pub fn blocking_category(text: &str, role: UserRole) -> Option<RiskMatch> {
    classify_question(text).filter(|found| !role.is_exempt_from(found.category))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(text: &str) -> Option<RiskCategory> {
        classify_question(text).map(|found| found.category)
    }

    #[test]
    fn matches_english_and_swedish_questions() {
        assert_eq!(
            category("What color is the mushroom in the photo?"),
            Some(RiskCategory::Color)
        );
        assert_eq!(category("Vilken färg har svampen?"), Some(RiskCategory::Color));
        assert_eq!(category("Is it edible?"), Some(RiskCategory::Edibility));
        assert_eq!(category("Kan man äta den här?"), Some(RiskCategory::Edibility));
        assert_eq!(category("Är den GIFTIG"), Some(RiskCategory::Edibility));
        assert_eq!(
            category("What treatment helps after eating it"),
            Some(RiskCategory::Medical)
        );
        assert_eq!(category("Vilka symtom får man"), Some(RiskCategory::Medical));
    }

    #[test]
    fn ignores_ordinary_questions() {
        assert_eq!(classify_question("Where do chanterelles grow?"), None);
        assert_eq!(classify_question("Does it have a ring on the stem?"), None);
        assert_eq!(classify_question("nontoxicology lecture"), None);
    }

    #[test]
    fn checks_categories_in_order() {
        assert_eq!(
            category("Is it poisonous and what are the symptoms?"),
            Some(RiskCategory::Edibility)
        );
    }

    #[test]
    fn short_swedish_questions_get_swedish_warnings() {
        for question in [
            "Kan man äta den här?",
            "Är den giftig?",
            "Vilken färg har svampen?",
            "Vilka symtom får man?",
            "Behandling?",
            "giftig?",
        ] {
            let found = classify_question(question).unwrap();
            assert_eq!(found.language, Language::Swedish, "{question}");
        }

        let found = blocking_category("Kan man äta den här?", UserRole::Forager).unwrap();
        assert!(found.warning().contains("du ska aldrig äta en svamp"));
    }

    #[test]
    fn english_questions_get_english_warnings() {
        let found = classify_question("Is it edible?").unwrap();
        assert_eq!(found.language, Language::English);
        assert!(found.warning().contains("never eat a mushroom"));

        let found = classify_question("which medicine cures it").unwrap();
        assert_eq!(found.language, Language::English);
        assert!(found.warning().contains("medical advice"));
    }

    #[test]
    fn mycologists_pass_edibility_but_not_medical() {
        assert_eq!(blocking_category("is it toxic?", UserRole::Mycologist), None);
        assert_eq!(
            blocking_category("is it toxic?", UserRole::Forager).map(|found| found.category),
            Some(RiskCategory::Edibility)
        );
        assert_eq!(
            blocking_category("vilken medicin hjälper", UserRole::Mycologist)
                .map(|found| found.category),
            Some(RiskCategory::Medical)
        );
    }
}
