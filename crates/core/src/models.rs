use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::CoreError;

const TITLE_MAX_GRAPHEMES: usize = 50;
const TITLE_KEEP_GRAPHEMES: usize = 47;

/// Closed set of prompt categories. Declaration order is the ranking tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Summarization,
    QuestionAnswer,
    Translation,
    CreativeWriting,
    CodeGeneration,
    Analysis,
    General,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::Summarization,
        Intent::QuestionAnswer,
        Intent::Translation,
        Intent::CreativeWriting,
        Intent::CodeGeneration,
        Intent::Analysis,
        Intent::General,
    ];

    /// Strict parse of a category code. Anything outside the closed set is a
    /// contract error and is never coerced to `General`.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "summarization" => Ok(Self::Summarization),
            "question_answer" => Ok(Self::QuestionAnswer),
            "translation" => Ok(Self::Translation),
            "creative_writing" => Ok(Self::CreativeWriting),
            "code_generation" => Ok(Self::CodeGeneration),
            "analysis" => Ok(Self::Analysis),
            "general" => Ok(Self::General),
            other => Err(CoreError::UnknownIntent(other.to_string())),
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Summarization => "summarization",
            Self::QuestionAnswer => "question_answer",
            Self::Translation => "translation",
            Self::CreativeWriting => "creative_writing",
            Self::CodeGeneration => "code_generation",
            Self::Analysis => "analysis",
            Self::General => "general",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Summarization => "Summarization",
            Self::QuestionAnswer => "Question & Answer",
            Self::Translation => "Translation",
            Self::CreativeWriting => "Creative Writing",
            Self::CodeGeneration => "Code Generation",
            Self::Analysis => "Analysis",
            Self::General => "General Task",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Summarization => "📝",
            Self::QuestionAnswer => "❓",
            Self::Translation => "🌐",
            Self::CreativeWriting => "✨",
            Self::CodeGeneration => "💻",
            Self::Analysis => "📊",
            Self::General => "🎯",
        }
    }

    /// Gradient token used by front-ends to tint the category badge.
    pub fn accent(self) -> &'static str {
        match self {
            Self::Summarization => "from-blue-500 to-cyan-500",
            Self::QuestionAnswer => "from-purple-500 to-pink-500",
            Self::Translation => "from-green-500 to-emerald-500",
            Self::CreativeWriting => "from-yellow-500 to-orange-500",
            Self::CodeGeneration => "from-indigo-500 to-blue-500",
            Self::Analysis => "from-red-500 to-rose-500",
            Self::General => "from-gray-500 to-slate-500",
        }
    }

    pub(crate) fn position(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for Intent {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.7 {
            Self::High
        } else if confidence >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeIntent {
    pub intent: Intent,
    pub confidence: f64,
}

impl AlternativeIntent {
    pub fn confidence_percent(&self) -> u8 {
        to_percent(self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub alternative_intents: Vec<AlternativeIntent>,
}

impl ClassificationResult {
    /// Result for text that no rule matched.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::General,
            confidence: 0.5,
            matched_keywords: Vec::new(),
            alternative_intents: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.intent == Intent::General && self.matched_keywords.is_empty()
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_confidence(self.confidence)
    }

    pub fn confidence_percent(&self) -> u8 {
        to_percent(self.confidence)
    }

    /// Same evidence, different headline intent. Used when a caller overrides
    /// the detected category.
    pub fn with_intent(&self, intent: Intent) -> Self {
        Self {
            intent,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub intent: Intent,
    pub markup: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub plain_text: String,
    pub markup: String,
    pub explanation: String,
    pub intent: Intent,
    pub created_at: DateTime<Utc>,
    pub ai_response: Option<String>,
}

impl PromptRecord {
    pub fn new(id: String, owner_id: String, plain_text: &str, template: RenderedTemplate) -> Self {
        Self {
            id,
            owner_id,
            title: prompt_title(plain_text),
            plain_text: plain_text.to_string(),
            markup: template.markup,
            explanation: template.explanation,
            intent: template.intent,
            created_at: Utc::now(),
            ai_response: None,
        }
    }

    /// Swaps in a re-rendered template. A stored completion belonged to the old
    /// markup, so it is dropped.
    pub fn apply_template(&mut self, template: RenderedTemplate) {
        self.intent = template.intent;
        self.markup = template.markup;
        self.explanation = template.explanation;
        self.ai_response = None;
    }
}

/// Short history label for a prompt: texts over 50 grapheme clusters are cut
/// to 47 and suffixed with `...`.
pub fn prompt_title(text: &str) -> String {
    if text.graphemes(true).count() > TITLE_MAX_GRAPHEMES {
        let mut title = text
            .graphemes(true)
            .take(TITLE_KEEP_GRAPHEMES)
            .collect::<String>();
        title.push_str("...");
        title
    } else {
        text.to_string()
    }
}

fn to_percent(confidence: f64) -> u8 {
    (confidence * 100.0).round().clamp(0.0, 100.0) as u8
}
