use crate::error::CoreError;
use crate::models::{Intent, RenderedTemplate};

/// Fills the fixed markup skeleton for `intent` with the escaped text.
pub fn render(text: &str, intent: Intent) -> RenderedTemplate {
    let escaped = escape_xml(text);

    let markup = match intent {
        Intent::Summarization => [
            "<task>",
            "  <instruction>Summarize the following text</instruction>",
            "  <context>",
            format!("    <text>{escaped}</text>").as_str(),
            "  </context>",
            "  <requirements>",
            "    <length>concise</length>",
            "    <focus>key_points</focus>",
            "  </requirements>",
            "</task>",
        ]
        .join("\n"),
        Intent::QuestionAnswer => [
            "<query>",
            format!("  <question>{escaped}</question>").as_str(),
            "  <response_format>",
            "    <type>detailed</type>",
            "    <include_examples>true</include_examples>",
            "  </response_format>",
            "</query>",
        ]
        .join("\n"),
        Intent::Translation => [
            "<translation>",
            format!("  <source_text>{escaped}</source_text>").as_str(),
            "  <parameters>",
            "    <preserve_tone>true</preserve_tone>",
            "    <formality>neutral</formality>",
            "  </parameters>",
            "</translation>",
        ]
        .join("\n"),
        Intent::CreativeWriting => [
            "<creative_task>",
            format!("  <instruction>{escaped}</instruction>").as_str(),
            "  <style>",
            "    <tone>engaging</tone>",
            "    <creativity_level>high</creativity_level>",
            "  </style>",
            "  <constraints>",
            "    <originality>required</originality>",
            "  </constraints>",
            "</creative_task>",
        ]
        .join("\n"),
        Intent::CodeGeneration => [
            "<coding_task>",
            format!("  <instruction>{escaped}</instruction>").as_str(),
            "  <requirements>",
            "    <include_comments>true</include_comments>",
            "    <best_practices>true</best_practices>",
            "  </requirements>",
            "  <output>",
            "    <format>complete_code</format>",
            "  </output>",
            "</coding_task>",
        ]
        .join("\n"),
        Intent::Analysis => [
            "<analysis_task>",
            format!("  <subject>{escaped}</subject>").as_str(),
            "  <approach>",
            "    <depth>comprehensive</depth>",
            "    <include_pros_cons>true</include_pros_cons>",
            "  </approach>",
            "  <output>",
            "    <structure>organized</structure>",
            "    <evidence_based>true</evidence_based>",
            "  </output>",
            "</analysis_task>",
        ]
        .join("\n"),
        Intent::General => [
            "<task>",
            format!("  <instruction>{escaped}</instruction>").as_str(),
            "  <parameters>",
            "    <clarity>high</clarity>",
            "    <detail_level>appropriate</detail_level>",
            "  </parameters>",
            "</task>",
        ]
        .join("\n"),
    };

    RenderedTemplate {
        intent,
        markup,
        explanation: explanation(intent).to_string(),
    }
}

/// String-typed entry point. An unknown category yields `UnknownIntent` and
/// no markup.
pub fn render_named(text: &str, intent: &str) -> Result<RenderedTemplate, CoreError> {
    let intent = Intent::parse(intent)?;
    Ok(render(text, intent))
}

pub fn explanation(intent: Intent) -> &'static str {
    match intent {
        Intent::Summarization => "This XML structure organizes a summarization task with clear instruction, context containing the text to summarize, and specific requirements for the output format.",
        Intent::QuestionAnswer => "This XML formats a question-answer task, specifying the question and desired response characteristics like detail level and example inclusion.",
        Intent::Translation => "This XML structures a translation request with the source text and parameters to control tone preservation and formality level.",
        Intent::CreativeWriting => "This XML organizes a creative writing task with instructions, style preferences, and constraints to guide the AI's creative output.",
        Intent::CodeGeneration => "This XML structures a code generation request with clear instructions, coding requirements like comments and best practices, and output format specifications.",
        Intent::Analysis => "This XML formats an analysis task with the subject to analyze, approach parameters like depth and balance, and output requirements for organization and evidence.",
        Intent::General => "This general XML template structures any task with clear instructions and basic parameters for clarity and detail level.",
    }
}

/// Escapes the five XML special characters in one pass, so an `&` produced by
/// an earlier substitution is never escaped twice.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
