//! Tri-state classification of establishments against the state public
//! catering service (SPE) perimeter.
//!
//! Rules run in a fixed order, first match wins. They are strictly additive:
//! nothing downgrades a confirmation, and anything no rule recognizes lands
//! in `NeedsReview` for a human pass.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::config::SpeRules;
use crate::models::Establishment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeLabel {
    ConfirmedInScope,
    NeedsReview,
    ConfirmedOutOfScope,
}

impl SpeLabel {
    /// French display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ConfirmedInScope => "SPE confirmé",
            Self::NeedsReview => "À vérifier",
            Self::ConfirmedOutOfScope => "Hors périmètre",
        }
    }
}

/// Lowercase, strip accents, map apostrophes and slashes to spaces, collapse
/// runs of whitespace. Rule keywords are stored pre-normalized.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .map(|c| match c {
            '\'' | '’' | '/' => ' ',
            other => other,
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment over whitespace-split tokens.
fn contains_word(text: &str, word: &str) -> bool {
    text.split_whitespace().any(|token| token == word)
}

/// Everything a rule may look at, normalized once up front.
struct RuleCtx<'a> {
    name: String,
    sectors: Vec<String>,
    ministry: String,
    siret: Option<&'a str>,
    legal_category: Option<&'a str>,
}

type Rule = fn(&SpeRules, &RuleCtx) -> Option<SpeLabel>;

/// The collectivity override runs first: a `72xx` legal category means a
/// territorial collectivity owns the site, and no name or sector heuristic
/// is allowed to auto-confirm it.
fn rule_collectivity(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    let category = ctx.legal_category?;
    category
        .starts_with(&rules.collectivity_prefix)
        .then_some(SpeLabel::NeedsReview)
}

fn rule_operator_name(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    rules
        .state_operators
        .iter()
        .any(|op| {
            if op.contains(' ') || op.len() > 5 {
                ctx.name.contains(op.as_str())
            } else {
                contains_word(&ctx.name, op)
            }
        })
        .then_some(SpeLabel::ConfirmedInScope)
}

fn rule_justice(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    if ctx.ministry != "justice" {
        return None;
    }
    let phrase = rules
        .justice_phrases
        .iter()
        .any(|p| ctx.name.contains(p.as_str()));
    let acronym = rules
        .justice_acronyms
        .iter()
        .any(|a| contains_word(&ctx.name, a));
    (phrase || acronym).then_some(SpeLabel::ConfirmedInScope)
}

fn rule_operator_sector(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    ctx.sectors
        .iter()
        .any(|sector| rules.state_operators.iter().any(|op| sector.contains(op.as_str())))
        .then_some(SpeLabel::ConfirmedInScope)
}

fn rule_ria_sector(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    ctx.sectors
        .iter()
        .any(|sector| rules.ria_sectors.iter().any(|kw| sector.contains(kw.as_str())))
        .then_some(SpeLabel::ConfirmedInScope)
}

fn rule_siret_prefix(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    let siret = ctx.siret?;
    rules
        .siret_prefixes
        .iter()
        .any(|prefix| siret.starts_with(prefix.as_str()))
        .then_some(SpeLabel::ConfirmedInScope)
}

fn rule_admin_sector(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    ctx.sectors
        .iter()
        .any(|sector| rules.admin_sectors.iter().any(|kw| sector.contains(kw.as_str())))
        .then_some(SpeLabel::ConfirmedInScope)
}

fn rule_legal_category(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    let category = ctx.legal_category?;
    let hit = rules
        .legal_prefixes
        .iter()
        .any(|prefix| category.starts_with(prefix.as_str()))
        || rules.legal_exact.iter().any(|code| code == category);
    hit.then_some(SpeLabel::ConfirmedInScope)
}

fn rule_negative_legal(rules: &SpeRules, ctx: &RuleCtx) -> Option<SpeLabel> {
    let category = ctx.legal_category?;
    let hit = rules
        .negative_prefixes
        .iter()
        .any(|prefix| category.starts_with(prefix.as_str()))
        || rules.negative_exact.iter().any(|code| code == category);
    hit.then_some(SpeLabel::ConfirmedOutOfScope)
}

const RULES: &[Rule] = &[
    rule_collectivity,
    rule_operator_name,
    rule_justice,
    rule_operator_sector,
    rule_ria_sector,
    rule_siret_prefix,
    rule_admin_sector,
    rule_legal_category,
    rule_negative_legal,
];

pub struct SpeClassifier {
    rules: SpeRules,
}

impl SpeClassifier {
    pub fn new(rules: SpeRules) -> Self {
        Self { rules }
    }

    /// Classify one establishment. `legal_category` comes from the registry
    /// lookup when the SIRET resolved, `None` otherwise.
    pub fn classify(
        &self,
        establishment: &Establishment,
        legal_category: Option<&str>,
    ) -> SpeLabel {
        let ctx = RuleCtx {
            name: normalize(establishment.name.as_deref().unwrap_or("")),
            sectors: establishment
                .sectors()
                .into_iter()
                .map(normalize)
                .collect(),
            ministry: normalize(establishment.line_ministry.as_deref().unwrap_or("")),
            siret: establishment.well_formed_siret(),
            legal_category,
        };
        for rule in RULES {
            if let Some(label) = rule(&self.rules, &ctx) {
                return label;
            }
        }
        SpeLabel::NeedsReview
    }
}

impl Default for SpeClassifier {
    fn default() -> Self {
        Self::new(SpeRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn establishment(fields: Value) -> Establishment {
        let row: Map<String, Value> = fields.as_object().cloned().unwrap();
        Establishment::from_row(&row, 0)
    }

    #[test]
    fn test_normalize_strips_accents_and_apostrophes() {
        assert_eq!(
            normalize("Administration de l'État"),
            "administration de l etat"
        );
        assert_eq!(normalize("Maison  d’Arrêt"), "maison d arret");
    }

    #[test]
    fn test_state_siret_prefix_confirms() {
        let classifier = SpeClassifier::default();
        let est = establishment(json!({
            "siret": "11000000000001",
            "name": "Restaurant inter-administratif",
            "sector_list": "RIA"
        }));
        assert_eq!(classifier.classify(&est, None), SpeLabel::ConfirmedInScope);
    }

    #[test]
    fn test_collectivity_override_beats_everything() {
        let classifier = SpeClassifier::default();
        // Operator-looking name, but the legal category says collectivity.
        let est = establishment(json!({
            "siret": "21000000000001",
            "name": "Cantine DGFIP de la ville"
        }));
        assert_eq!(
            classifier.classify(&est, Some("7210")),
            SpeLabel::NeedsReview
        );
    }

    #[test]
    fn test_operator_name_confirms() {
        let classifier = SpeClassifier::default();
        let est = establishment(json!({"name": "Caserne de Gendarmerie de Tulle"}));
        assert_eq!(classifier.classify(&est, None), SpeLabel::ConfirmedInScope);
    }

    #[test]
    fn test_justice_acronym_whole_word_only() {
        let classifier = SpeClassifier::default();
        let ma = establishment(json!({
            "name": "MA de Fleury-Mérogis",
            "line_ministry": "Justice"
        }));
        assert_eq!(classifier.classify(&ma, None), SpeLabel::ConfirmedInScope);

        // "ma" embedded inside a word must not trigger.
        let marseille = establishment(json!({
            "name": "Cantine de Marseille",
            "line_ministry": "Justice"
        }));
        assert_eq!(classifier.classify(&marseille, None), SpeLabel::NeedsReview);
    }

    #[test]
    fn test_justice_rule_requires_exact_ministry() {
        let classifier = SpeClassifier::default();
        // A ministry merely containing the word must not enable the rule.
        let est = establishment(json!({
            "name": "CP de Borgo",
            "line_ministry": "Mission justice sociale"
        }));
        assert_eq!(classifier.classify(&est, None), SpeLabel::NeedsReview);
    }

    #[test]
    fn test_justice_phrase_requires_justice_ministry() {
        let classifier = SpeClassifier::default();
        let est = establishment(json!({
            "name": "Maison d'arrêt de Nanterre",
            "line_ministry": "Intérieur et Outre-mer"
        }));
        assert_eq!(classifier.classify(&est, None), SpeLabel::NeedsReview);
    }

    #[test]
    fn test_legal_category_prefix_confirms() {
        let classifier = SpeClassifier::default();
        let est = establishment(json!({"name": "Cantine du lycée agricole"}));
        assert_eq!(
            classifier.classify(&est, Some("7383")),
            SpeLabel::ConfirmedInScope
        );
    }

    #[test]
    fn test_unknown_stays_needs_review() {
        let classifier = SpeClassifier::default();
        let est = establishment(json!({"name": "Cantine scolaire", "siret": "83000000000001"}));
        assert_eq!(classifier.classify(&est, None), SpeLabel::NeedsReview);
    }

    #[test]
    fn test_negative_list_enables_out_of_scope() {
        let mut rules = SpeRules::default();
        rules.negative_prefixes.push("65".to_string());
        let classifier = SpeClassifier::new(rules);
        let est = establishment(json!({"name": "Clinique privée"}));
        assert_eq!(
            classifier.classify(&est, Some("6540")),
            SpeLabel::ConfirmedOutOfScope
        );
        // Default rule set never produces the label.
        let default = SpeClassifier::default();
        assert_eq!(
            default.classify(&est, Some("6540")),
            SpeLabel::NeedsReview
        );
    }
}
