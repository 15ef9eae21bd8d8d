//! Turns free-text model replies into validated payloads.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{
    BloomTaxonomy, LevelQuestion, ScoredSubQuestion, ScoredTaxonomy, SoloLevel, TaxonomyLevel,
    TopicQuestion,
};
use crate::error::ParseError;

pub const TOPIC_QUESTIONS_KEY: &str = "Topic Questions";

pub const MAX_SCORE: u8 = 5;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*([\{\[].*?[\}\]])\s*```").expect("fence pattern is valid")
});

/// Returns the JSON text inside a reply.
///
/// A reply that is entirely one fenced block is unwrapped; otherwise the first
/// fenced block holding an object or array is used; otherwise the whole reply.
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() >= 6 && trimmed.starts_with("```") && trimmed.ends_with("```") {
        return strip_language_tag(&trimmed[3..trimmed.len() - 3]).trim();
    }
    if let Some(captures) = FENCED_BLOCK.captures(trimmed) {
        if let Some(block) = captures.get(1) {
            return block.as_str();
        }
    }
    trimmed
}

/// Drops a language tag (`json`, `JSON5`, ...) that directly follows the
/// opening fence and is separated from the payload by whitespace.
fn strip_language_tag(inner: &str) -> &str {
    let tag_len = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    match inner[tag_len..].chars().next() {
        Some(next) if tag_len > 0 && next.is_whitespace() => &inner[tag_len..],
        _ => inner,
    }
}

pub fn parse_json(text: &str) -> Result<Value, ParseError> {
    serde_json::from_str(extract_json_block(text)).map_err(|source| ParseError::Decode {
        raw: text.to_string(),
        source,
    })
}

/// The list of transformed questions: either the "Topic Questions" entry of an
/// object or a bare list.
pub fn topic_question_list(value: Value) -> Result<Vec<Value>, ParseError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => match object.remove(TOPIC_QUESTIONS_KEY) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(ParseError::UnexpectedStructure(format!(
                "\"{}\" should be a list, found {}",
                TOPIC_QUESTIONS_KEY,
                kind_of(&other)
            ))),
            None => Err(ParseError::UnexpectedStructure(format!(
                "missing \"{}\" key",
                TOPIC_QUESTIONS_KEY
            ))),
        },
        other => Err(ParseError::UnexpectedStructure(format!(
            "expected an object or a list, found {}",
            kind_of(&other)
        ))),
    }
}

pub fn parse_topic_questions(text: &str) -> Result<Vec<TopicQuestion>, ParseError> {
    let items = topic_question_list(parse_json(text)?)?;
    if items.is_empty() {
        return Err(ParseError::UnexpectedStructure(
            "no questions in the response".to_string(),
        ));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item).map_err(|e| {
                ParseError::UnexpectedStructure(format!("question #{}: {}", i + 1, e))
            })
        })
        .collect()
}

/// Reads an object keyed by level names, as produced by the generation prompt.
pub fn parse_generated_taxonomy(text: &str) -> Result<BloomTaxonomy, ParseError> {
    let object = level_object(parse_json(text)?)?;
    let mut taxonomy = BloomTaxonomy::default();
    for (level, value) in object {
        let questions: Vec<LevelQuestion> = serde_json::from_value(value)
            .map_err(|e| ParseError::UnexpectedStructure(format!("{}: {}", level, e)))?;
        let questions: Vec<LevelQuestion> = questions
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .collect();
        if !questions.is_empty() {
            taxonomy.levels.insert(level, questions);
        }
    }
    if taxonomy.is_empty() {
        return Err(ParseError::UnexpectedStructure(
            "no questions in the response".to_string(),
        ));
    }
    Ok(taxonomy)
}

/// Reads the scoring reply. Scores outside 0..=5 are clamped.
pub fn parse_scores(text: &str) -> Result<ScoredTaxonomy, ParseError> {
    let object = level_object(parse_json(text)?)?;
    let mut scored = ScoredTaxonomy::default();
    for (level, value) in object {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(ParseError::UnexpectedStructure(format!(
                    "{} should be a list, found {}",
                    level,
                    kind_of(&other)
                )))
            }
        };
        let entries = items
            .iter()
            .enumerate()
            .map(|(i, item)| scored_entry(level, i, item))
            .collect::<Result<Vec<_>, _>>()?;
        scored.levels.insert(level, entries);
    }
    Ok(scored)
}

fn scored_entry(
    level: TaxonomyLevel,
    position: usize,
    item: &Value,
) -> Result<ScoredSubQuestion, ParseError> {
    let field = |name: &str| item.get(name).and_then(Value::as_str).map(str::to_string);
    let raw_score = item.get("score").ok_or_else(|| {
        ParseError::UnexpectedStructure(format!("{} #{} has no score", level, position + 1))
    })?;
    let score = match raw_score {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| {
        ParseError::UnexpectedStructure(format!(
            "{} #{} has a non-numeric score {}",
            level,
            position + 1,
            raw_score
        ))
    })?;

    let rounded = score.round();
    if rounded < 0.0 || rounded > MAX_SCORE as f64 {
        log::warn!(
            "Clamping out-of-range score {} for {} #{}",
            score,
            level,
            position + 1
        );
    }

    Ok(ScoredSubQuestion {
        question: field("question").unwrap_or_default(),
        answer: field("answer").unwrap_or_default(),
        score: rounded.clamp(0.0, MAX_SCORE as f64) as u8,
        feedback: field("feedback"),
    })
}

const SOLO_MARKER: &str = "solo taxonomy:";

/// Finds the SOLO level named in a plain-text reply. The answer after the last
/// `SOLO taxonomy:` marker wins; otherwise the earliest level mentioned.
pub fn parse_solo_level(text: &str) -> Result<SoloLevel, ParseError> {
    let lowered = text.to_lowercase();
    lowered
        .rfind(SOLO_MARKER)
        .and_then(|at| earliest_solo_level(&lowered[at + SOLO_MARKER.len()..]))
        .or_else(|| earliest_solo_level(&lowered))
        .ok_or_else(|| {
            ParseError::UnexpectedStructure("reply names no SOLO taxonomy level".to_string())
        })
}

fn earliest_solo_level(text: &str) -> Option<SoloLevel> {
    let normalized: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
    SoloLevel::ALL
        .into_iter()
        .filter_map(|level| {
            let name: String = level
                .name()
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            normalized.find(&name).map(|position| (position, level))
        })
        .min_by_key(|(position, _)| *position)
        .map(|(_, level)| level)
}

/// Validates that `value` is an object and returns its entries keyed by level.
/// Keys that are not level names are ignored.
fn level_object(value: Value) -> Result<Vec<(TaxonomyLevel, Value)>, ParseError> {
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(ParseError::UnexpectedStructure(format!(
                "expected an object keyed by taxonomy level, found {}",
                kind_of(&other)
            )))
        }
    };
    let mut entries: Vec<(TaxonomyLevel, Value)> = Vec::new();
    for (key, value) in object {
        match TaxonomyLevel::from_name(&key) {
            Some(level) => entries.push((level, value)),
            None => log::debug!("Ignoring non-level key {:?} in model reply", key),
        }
    }
    if entries.is_empty() {
        return Err(ParseError::UnexpectedStructure(
            "no taxonomy level keys in the response".to_string(),
        ));
    }
    entries.sort_by_key(|(level, _)| *level);
    Ok(entries)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
