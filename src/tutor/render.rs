//! Telegram HTML for pipeline results. Everything that came from a user or the
//! model is escaped before it is wrapped in markup.

use teloxide::utils::html::escape;

use super::aggregate::{Evaluation, TaxonomyWeights, WeightAdjustment};
use super::parser::MAX_SCORE;
use super::{AnswerKey, Answers, BloomTaxonomy, LevelQuestion, ScoredTaxonomy, SoloLevel};

/// Telegram rejects longer messages.
pub const MESSAGE_LIMIT: usize = 4096;

const RAW_REPLY_PREVIEW: usize = 1000;

pub fn taxonomy(taxonomy: &BloomTaxonomy, answers: &Answers) -> String {
    let mut text = format!("<b>{} questions</b>\n", taxonomy.len());
    for (level, questions) in &taxonomy.levels {
        text.push_str(&format!("\n<b>{}</b> ({})\n", level, level.code()));
        for (index, question) in questions.iter().enumerate() {
            let answered = answers.get(AnswerKey { level: *level, index }).is_some();
            text.push_str(&format!(
                "{}{}. {}\n",
                if answered { "✅ " } else { "" },
                index + 1,
                escape(&question.question)
            ));
        }
    }
    text
}

/// One question as asked while answering: `position` is 0-based.
pub fn question(key: AnswerKey, question: &LevelQuestion, position: usize, total: usize) -> String {
    let mut text = format!(
        "<b>Question {}/{}</b> · {}\n\n{}",
        position + 1,
        total,
        key.level,
        escape(&question.question)
    );
    if !question.options.is_empty() {
        text.push('\n');
        for (i, option) in question.options.iter().enumerate() {
            text.push_str(&format!("\n{}) {}", option_label(i), escape(option)));
        }
    }
    text
}

fn option_label(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

pub fn evaluation(evaluation: &Evaluation, scored: Option<&ScoredTaxonomy>) -> String {
    let mut text = String::from("<b>Evaluation</b>\n");
    for (level, result) in &evaluation.levels {
        if result.scored_questions == 0 && result.weight == 0.0 {
            continue;
        }
        text.push_str(&format!(
            "\n<b>{}</b>: {:.2}/{} × {:.2} = {:.2} ({} scored)",
            level,
            result.average_score,
            MAX_SCORE,
            result.weight,
            result.weighted_average,
            result.scored_questions
        ));
        let Some(entries) = scored.and_then(|s| s.levels.get(level)) else {
            continue;
        };
        for entry in entries {
            text.push_str(&format!("\n  {}/{} {}", entry.score, MAX_SCORE, escape(&entry.question)));
            if let Some(feedback) = &entry.feedback {
                text.push_str(&format!("\n  <i>{}</i>", escape(feedback)));
            }
        }
    }
    text.push_str(&format!(
        "\n\n<b>Total weighted score: {:.2}/{}</b>",
        evaluation.total_weighted_score, MAX_SCORE
    ));
    text
}

pub fn weights(weights: &TaxonomyWeights) -> String {
    let mut text = String::from("<b>Level weights</b>\n");
    for (level, weight) in weights.iter() {
        text.push_str(&format!("{}: {:.3}\n", level, weight));
    }
    text.push_str(&format!("Total: {:.3}", weights.total()));
    text
}

pub fn weight_adjustment(adjustment: WeightAdjustment) -> Option<String> {
    match adjustment {
        WeightAdjustment::Unchanged => None,
        WeightAdjustment::Rescaled { total } => Some(format!(
            "The weights added up to {:.3}, so each one was divided by that total.",
            total
        )),
        WeightAdjustment::ResetToEqual => Some(
            "The weights added up to zero, so every level is weighted equally again.".to_string(),
        ),
    }
}

pub fn solo(level: SoloLevel) -> String {
    format!("SOLO level: <b>{}</b>\n{}", level.name(), level.description())
}

/// The model's reply, shown when it could not be decoded.
pub fn raw_reply(raw: &str) -> String {
    let mut preview: String = raw.chars().take(RAW_REPLY_PREVIEW).collect();
    if preview.len() < raw.len() {
        preview.push('…');
    }
    format!("<pre>{}</pre>", escape(&preview))
}

const PRE_OPEN: &str = "<pre>";
const PRE_CLOSE: &str = "</pre>";
const MAX_ENTITY_LEN: usize = 10;
const MAX_TAG_LEN: usize = 32;

/// Splits a reply into messages of at most `limit` characters, breaking
/// between lines. A single line longer than the limit is cut, but never
/// inside an HTML entity or tag. A `<pre>` block that spans a break is
/// closed at the end of one message and reopened in the next.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut splitter = Splitter {
        limit: limit.max(1),
        messages: Vec::new(),
        current: String::new(),
        current_len: 0,
        in_pre: false,
    };
    for line in text.split('\n') {
        splitter.push_line(line);
    }
    splitter.flush();
    splitter.messages
}

struct Splitter {
    limit: usize,
    messages: Vec<String>,
    current: String,
    current_len: usize,
    /// `<pre>` is open at the end of `current`.
    in_pre: bool,
}

impl Splitter {
    fn push_line(&mut self, line: &str) {
        let line_len = line.chars().count();
        let separator = usize::from(!self.is_blank());
        let pre_after = pre_open_after(self.in_pre, line);
        if self.current_len + separator + line_len + closing_len(pre_after) <= self.limit {
            if separator == 1 {
                self.current.push('\n');
            }
            self.current.push_str(line);
            self.current_len += separator + line_len;
            self.in_pre = pre_after;
            return;
        }

        self.flush();
        for atom in atoms(line) {
            let atom_len = atom.chars().count();
            let pre_after = match atom {
                PRE_OPEN => true,
                PRE_CLOSE => false,
                _ => self.in_pre,
            };
            if self.current_len + atom_len + closing_len(pre_after) > self.limit && !self.is_blank() {
                self.flush();
            }
            self.current.push_str(atom);
            self.current_len += atom_len;
            self.in_pre = pre_after;
        }
    }

    fn flush(&mut self) {
        if self.in_pre {
            self.current.push_str(PRE_CLOSE);
        }
        let part = std::mem::take(&mut self.current);
        if has_content(&part) {
            self.messages.push(part);
        }
        self.current_len = 0;
        if self.in_pre {
            self.current.push_str(PRE_OPEN);
            self.current_len = PRE_OPEN.len();
        }
    }

    fn is_blank(&self) -> bool {
        self.current
            .strip_prefix(PRE_OPEN)
            .unwrap_or(self.current.as_str())
            .trim()
            .is_empty()
    }
}

fn closing_len(in_pre: bool) -> usize {
    if in_pre {
        PRE_CLOSE.len()
    } else {
        0
    }
}

fn has_content(part: &str) -> bool {
    let inner = part.strip_prefix(PRE_OPEN).unwrap_or(part);
    let inner = inner.strip_suffix(PRE_CLOSE).unwrap_or(inner);
    !inner.trim().is_empty()
}

fn pre_open_after(open: bool, line: &str) -> bool {
    match (line.rfind(PRE_OPEN), line.rfind(PRE_CLOSE)) {
        (Some(opened), Some(closed)) => opened > closed,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => open,
    }
}

/// Single characters, except that entities and tags come out whole.
fn atoms(line: &str) -> impl Iterator<Item = &str> {
    let mut rest = line;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let end = match first {
            '&' => rest.find(';').filter(|&at| at < MAX_ENTITY_LEN),
            '<' => rest.find('>').filter(|&at| at < MAX_TAG_LEN),
            _ => None,
        }
        .map_or(first.len_utf8(), |at| at + 1);
        let (atom, tail) = rest.split_at(end);
        rest = tail;
        Some(atom)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::aggregate::TaxonomyWeights;
    use crate::tutor::{ScoredSubQuestion, TaxonomyLevel};

    fn level_question(text: &str) -> LevelQuestion {
        LevelQuestion {
            question: text.to_string(),
            ..LevelQuestion::default()
        }
    }

    #[test]
    fn taxonomy_is_escaped_and_marks_answers() {
        let mut bloom = BloomTaxonomy::default();
        bloom.levels.insert(
            TaxonomyLevel::Apply,
            vec![level_question("Is 3 < 5?"), level_question("Use F = m·a")],
        );
        let mut answers = Answers::default();
        answers.insert(AnswerKey { level: TaxonomyLevel::Apply, index: 1 }, "yes");

        let text = taxonomy(&bloom, &answers);

        assert!(text.contains("<b>Apply</b> (A)"));
        assert!(text.contains("1. Is 3 &lt; 5?"));
        assert!(text.contains("✅ 2. Use F = m·a"));
    }

    #[test]
    fn question_lists_its_options() {
        let asked = LevelQuestion {
            question: "Which carries sound?".to_string(),
            options: vec!["Air".to_string(), "Vacuum".to_string()],
            ..LevelQuestion::default()
        };
        let key = AnswerKey { level: TaxonomyLevel::Remember, index: 0 };

        let text = question(key, &asked, 2, 12);

        assert!(text.starts_with("<b>Question 3/12</b> · Remember"));
        assert!(text.ends_with("A) Air\nB) Vacuum"));
    }

    #[test]
    fn evaluation_shows_scores_out_of_five() {
        let mut scored = ScoredTaxonomy::default();
        scored.levels.insert(
            TaxonomyLevel::Remember,
            vec![ScoredSubQuestion {
                question: "Define a wave.".to_string(),
                answer: "A disturbance.".to_string(),
                score: 4,
                feedback: Some("Mention energy <transfer>.".to_string()),
            }],
        );
        let result = Evaluation::compute(&scored, &TaxonomyWeights::default());

        let text = evaluation(&result, Some(&scored));

        assert!(text.contains("<b>Remember</b>: 4.00/5 × 0.17 = 0.67 (1 scored)"));
        assert!(text.contains("4/5 Define a wave."));
        assert!(text.contains("<i>Mention energy &lt;transfer&gt;.</i>"));
        assert!(text.ends_with("<b>Total weighted score: 0.67/5</b>"));
    }

    #[test]
    fn adjustments_are_explained() {
        assert_eq!(weight_adjustment(WeightAdjustment::Unchanged), None);
        assert!(weight_adjustment(WeightAdjustment::Rescaled { total: 2.0 })
            .unwrap()
            .contains("2.000"));
        assert!(weight_adjustment(WeightAdjustment::ResetToEqual)
            .unwrap()
            .contains("equally"));
    }

    #[test]
    fn raw_reply_is_escaped_and_truncated() {
        let short = raw_reply("<not json>");
        assert_eq!(short, "<pre>&lt;not json&gt;</pre>");

        let long = raw_reply(&"x".repeat(RAW_REPLY_PREVIEW + 10));
        assert!(long.contains('…'));
        assert_eq!(long.matches('x').count(), RAW_REPLY_PREVIEW);
    }

    #[test]
    fn short_text_is_one_message() {
        assert_eq!(split_message("one\ntwo", MESSAGE_LIMIT), vec!["one\ntwo"]);
    }

    #[test]
    fn split_happens_between_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 9), vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn overlong_line_is_cut() {
        let text = format!("intro\n{}\noutro", "z".repeat(25));

        let messages = split_message(&text, 10);

        assert_eq!(
            messages,
            vec!["intro", "zzzzzzzzzz", "zzzzzzzzzz", "zzzzz", "outro"]
        );
        assert!(messages.iter().all(|m| m.chars().count() <= 10));
    }

    #[test]
    fn long_raw_reply_keeps_pre_balanced_in_every_part() {
        let reply = raw_reply(&"&&&&&&\n".repeat(200));

        let messages = split_message(&reply, MESSAGE_LIMIT);

        assert!(messages.len() > 1);
        for message in &messages {
            assert!(message.chars().count() <= MESSAGE_LIMIT);
            assert!(message.starts_with("<pre>"));
            assert!(message.ends_with("</pre>"));
            assert_eq!(message.matches("<pre>").count(), 1);
            assert_eq!(message.matches("</pre>").count(), 1);
            assert!(!message.replace("&amp;", "").contains('&'));
        }
        assert!(messages.last().unwrap().ends_with("…</pre>"));
    }

    #[test]
    fn cut_never_lands_inside_an_entity() {
        let line = escape(&"<>".repeat(50));

        let messages = split_message(&line, 25);

        assert!(messages.len() > 1);
        for message in &messages {
            assert!(message.chars().count() <= 25);
            let rest = message.replace("&lt;", "").replace("&gt;", "");
            assert!(rest.is_empty(), "broken entity in {message:?}");
        }
        assert_eq!(messages.concat(), line);
    }
}
