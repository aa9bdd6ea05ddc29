use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::models::{AlternativeIntent, ClassificationResult, Intent};

pub const MAX_CONFIDENCE: f64 = 0.99;
pub const ALTERNATIVE_MIN_SHARE_OF_TOP: f64 = 0.1;
pub const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternRule {
    pub intent: Intent,
    pub pattern: &'static str,
    pub weight: u64,
    pub label: &'static str,
}

const fn rule(intent: Intent, pattern: &'static str, weight: u64, label: &'static str) -> PatternRule {
    PatternRule {
        intent,
        pattern,
        weight,
        label,
    }
}

/// Weighted rule catalogue. `General` is deliberately absent: it only wins
/// when nothing else scores.
pub const RULES: &[PatternRule] = &[
    rule(Intent::Summarization, r"\b(summarize|summary|tldr|brief)\b", 3, "summarize"),
    rule(Intent::Summarization, r"\b(key points|main ideas|gist)\b", 2, "key points"),
    rule(Intent::Summarization, r"\b(condense|shorten)\b", 2, "condense"),
    rule(Intent::Translation, r"\b(translate|translation)\b", 3, "translate"),
    rule(Intent::Translation, r"from \w+ to \w+", 3, "language pair"),
    rule(
        Intent::Translation,
        r"\b(spanish|french|german|chinese|japanese|italian)\b",
        1,
        "language",
    ),
    rule(Intent::CreativeWriting, r"\b(write|create|compose)\b", 2, "write"),
    rule(
        Intent::CreativeWriting,
        r"\b(story|poem|essay|article|blog)\b",
        3,
        "creative content",
    ),
    rule(Intent::CreativeWriting, r"\b(creative|imaginative|original)\b", 2, "creative"),
    rule(Intent::CodeGeneration, r"\b(code|function|program|script)\b", 3, "code"),
    rule(Intent::CodeGeneration, r"\b(implement|develop|build)\b", 1, "implement"),
    rule(
        Intent::CodeGeneration,
        r"\b(python|javascript|java|react|algorithm)\b|\bc\+\+",
        2,
        "programming language",
    ),
    rule(Intent::Analysis, r"\b(analyze|analysis|evaluate)\b", 3, "analyze"),
    rule(Intent::Analysis, r"\b(compare|contrast|assess)\b", 2, "compare"),
    rule(
        Intent::Analysis,
        r"\b(pros and cons|advantages|disadvantages)\b",
        2,
        "pros/cons",
    ),
    rule(Intent::QuestionAnswer, r"\?", 2, "question mark"),
    rule(
        Intent::QuestionAnswer,
        r"\b(what|how|why|when|where|who|which)\b",
        1,
        "question word",
    ),
    rule(Intent::QuestionAnswer, r"\b(explain|tell me|can you)\b", 1, "inquiry"),
];

static SHARED: Lazy<IntentClassifier> = Lazy::new(|| {
    IntentClassifier::from_rules(RULES).expect("built-in intent rules are valid regexes")
});

/// Raw evidence for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentScore {
    pub intent: Intent,
    pub score: u64,
    pub keywords: Vec<&'static str>,
}

#[derive(Debug)]
struct CompiledRule {
    rule: PatternRule,
    regex: Regex,
}

#[derive(Debug)]
pub struct IntentClassifier {
    rules: Vec<CompiledRule>,
}

impl IntentClassifier {
    pub fn shared() -> &'static Self {
        &SHARED
    }

    fn from_rules(rules: &[PatternRule]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| CompiledRule { rule: *rule, regex })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Scores every category and returns all seven ranked by descending raw
    /// score. The sort is stable over `Intent::ALL`, so ties keep declaration
    /// order.
    pub fn score(&self, text: &str) -> Vec<IntentScore> {
        let lower = text.to_lowercase();
        let mut scores = Intent::ALL
            .iter()
            .map(|intent| IntentScore {
                intent: *intent,
                score: 0,
                keywords: Vec::new(),
            })
            .collect::<Vec<_>>();

        for compiled in &self.rules {
            let occurrences = compiled.regex.find_iter(&lower).count() as u64;
            if occurrences == 0 {
                continue;
            }

            let entry = &mut scores[compiled.rule.intent.position()];
            entry.score += compiled.rule.weight * occurrences;
            if !entry.keywords.contains(&compiled.rule.label) {
                entry.keywords.push(compiled.rule.label);
            }
        }

        scores.sort_by(|a, b| b.score.cmp(&a.score));
        scores
    }

    pub fn classify(&self, text: &str) -> ClassificationResult {
        let ranked = self.score(text);

        let Some(top) = ranked.first().filter(|top| top.score > 0) else {
            return ClassificationResult::fallback();
        };

        let total = ranked.iter().map(|entry| entry.score).sum::<u64>().max(1) as f64;
        let threshold = top.score as f64 * ALTERNATIVE_MIN_SHARE_OF_TOP;

        let alternative_intents = ranked
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .filter(|entry| entry.score as f64 > threshold)
            .map(|entry| AlternativeIntent {
                intent: entry.intent,
                confidence: share(entry.score, total),
            })
            .collect();

        ClassificationResult {
            intent: top.intent,
            confidence: share(top.score, total),
            matched_keywords: top.keywords.iter().map(|k| k.to_string()).collect(),
            alternative_intents,
        }
    }
}

/// Classifies free text with the built-in rule catalogue.
pub fn classify(text: &str) -> ClassificationResult {
    IntentClassifier::shared().classify(text)
}

fn share(score: u64, total: f64) -> f64 {
    (score as f64 / total).min(MAX_CONFIDENCE)
}
