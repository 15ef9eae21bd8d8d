use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::aggregate::{Evaluation, TaxonomyWeights};
use super::parser;
use super::{AnswerKey, Answers, BloomTaxonomy, GenerationMode, ScoredTaxonomy, TopicQuestion};
use crate::error::ParseError;

/// How many exchanges with the tutor are replayed in the next prompt.
pub const CHAT_MEMORY_TURNS: usize = 2;

/// One question to the tutor and its reply.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// Everything one chat has built up so far. Owned by the chat's dialogue
/// state and dropped when the chat starts over.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub mode: GenerationMode,
    pub document_name: Option<String>,
    pub file_content: Option<String>,
    pub chunks: Vec<String>,
    pub topic_questions: Option<Vec<TopicQuestion>>,
    pub taxonomy: Option<BloomTaxonomy>,
    pub answers: Answers,
    pub scored: Option<ScoredTaxonomy>,
    pub weights: TaxonomyWeights,
    pub evaluation: Option<Evaluation>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl Session {
    /// Stores a new document and forgets everything derived from the previous one.
    /// Mode and weights are user settings and are kept.
    pub fn load_document(&mut self, name: Option<String>, text: String, chunks: Vec<String>) {
        self.document_name = name;
        self.file_content = Some(text);
        self.chunks = chunks;
        self.topic_questions = None;
        self.history.clear();
        self.clear_derived();
    }

    /// Parses a structured transformation reply. On failure nothing changes.
    pub fn apply_transformation(&mut self, raw: &str) -> Result<&BloomTaxonomy, ParseError> {
        let questions = parser::parse_topic_questions(raw)?;
        let taxonomy = BloomTaxonomy::from_topic_questions(&questions);
        if taxonomy.is_empty() {
            return Err(ParseError::UnexpectedStructure(
                "no taxonomy level questions in the response".to_string(),
            ));
        }
        self.clear_derived();
        self.topic_questions = Some(questions);
        Ok(self.taxonomy.insert(taxonomy))
    }

    /// Parses a generated taxonomy reply. On failure nothing changes.
    pub fn apply_generated(&mut self, raw: &str) -> Result<&BloomTaxonomy, ParseError> {
        let taxonomy = parser::parse_generated_taxonomy(raw)?;
        self.clear_derived();
        self.topic_questions = None;
        Ok(self.taxonomy.insert(taxonomy))
    }

    fn clear_derived(&mut self) {
        self.taxonomy = None;
        self.answers = Answers::default();
        self.scored = None;
        self.evaluation = None;
    }

    pub fn answer_slots(&self) -> Vec<AnswerKey> {
        self.taxonomy
            .as_ref()
            .map(BloomTaxonomy::slots)
            .unwrap_or_default()
    }

    /// Returns false when the key does not name a question of the current taxonomy.
    pub fn record_answer(&mut self, key: AnswerKey, text: &str) -> bool {
        let exists = self
            .taxonomy
            .as_ref()
            .and_then(|taxonomy| taxonomy.question(key))
            .is_some();
        if exists {
            self.answers.insert(key, text.trim());
        }
        exists
    }

    /// Position (in answering order) of the first question without an answer.
    pub fn first_unanswered(&self) -> Option<usize> {
        self.answer_slots()
            .iter()
            .position(|key| self.answers.get(*key).is_none())
    }

    /// The questions with the learner's answers, keyed by level, as sent for scoring.
    /// Unanswered questions go out with an empty answer.
    pub fn scoring_submission(&self) -> Option<Value> {
        let taxonomy = self.taxonomy.as_ref()?;
        let mut submission = BTreeMap::new();
        for (level, questions) in &taxonomy.levels {
            let entries: Vec<Value> = questions
                .iter()
                .enumerate()
                .map(|(index, question)| {
                    let key = AnswerKey {
                        level: *level,
                        index,
                    };
                    json!({
                        "question": question.question,
                        "answer": self.answers.get(key).unwrap_or(""),
                    })
                })
                .collect();
            submission.insert(level.name(), Value::Array(entries));
        }
        Some(json!(submission))
    }

    /// Parses a scoring reply and evaluates it with the current weights.
    pub fn apply_scores(&mut self, raw: &str) -> Result<&Evaluation, ParseError> {
        let scored = parser::parse_scores(raw)?;
        let evaluation = Evaluation::compute(&scored, &self.weights);
        self.scored = Some(scored);
        Ok(self.evaluation.insert(evaluation))
    }

    /// Keeps the latest exchanges only, oldest dropped first.
    pub fn remember_turn(&mut self, question: &str, answer: &str) {
        self.history.push(ChatTurn {
            question: question.to_string(),
            answer: answer.trim().to_string(),
        });
        if self.history.len() > CHAT_MEMORY_TURNS {
            let excess = self.history.len() - CHAT_MEMORY_TURNS;
            self.history.drain(..excess);
        }
    }

    pub fn set_weights(&mut self, weights: TaxonomyWeights) {
        self.weights = weights;
        if let Some(scored) = &self.scored {
            self.evaluation = Some(Evaluation::compute(scored, &self.weights));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::aggregate::TaxonomyWeights;
    use crate::tutor::TaxonomyLevel;

    const TRANSFORMED: &str = r#"```json
    {"Topic Questions": [
        {"Original Question": "What is a mechanical wave?",
         "Remember": "Define a mechanical wave.",
         "Understand": "Explain how a wave carries energy.",
         "Create": "Design a demo of a transverse wave."}
    ]}
    ```"#;

    fn session_with_questions() -> Session {
        let mut session = Session::default();
        session.load_document(Some("waves.txt".into()), "What is a mechanical wave?".into(), vec![]);
        session.apply_transformation(TRANSFORMED).unwrap();
        session
    }

    #[test]
    fn malformed_reply_leaves_questions_unset() {
        let mut session = Session::default();
        session.load_document(None, "text".into(), vec!["text".into()]);

        let err = session
            .apply_transformation("Sure! Here's your answer: not json")
            .unwrap_err();

        assert!(matches!(err, ParseError::Decode { .. }));
        assert!(session.topic_questions.is_none());
        assert!(session.taxonomy.is_none());
    }

    #[test]
    fn failed_reparse_keeps_previous_questions() {
        let mut session = session_with_questions();
        let before = session.clone();

        assert!(session.apply_transformation(r#"{"Questions": []}"#).is_err());

        assert_eq!(session, before);
    }

    #[test]
    fn transformation_builds_the_taxonomy() {
        let session = session_with_questions();
        let taxonomy = session.taxonomy.as_ref().unwrap();

        assert_eq!(taxonomy.len(), 3);
        assert_eq!(session.answer_slots().len(), 3);
        assert_eq!(session.first_unanswered(), Some(0));
    }

    #[test]
    fn answers_are_recorded_per_slot() {
        let mut session = session_with_questions();
        let slots = session.answer_slots();

        assert!(session.record_answer(slots[0], "  A disturbance in a medium. "));
        assert!(!session.record_answer(
            AnswerKey { level: TaxonomyLevel::Apply, index: 0 },
            "no such question"
        ));

        assert_eq!(session.answers.get(slots[0]), Some("A disturbance in a medium."));
        assert_eq!(session.first_unanswered(), Some(1));
    }

    #[test]
    fn submission_includes_unanswered_questions() {
        let mut session = session_with_questions();
        let slots = session.answer_slots();
        session.record_answer(slots[0], "A disturbance.");

        let submission = session.scoring_submission().unwrap();

        assert_eq!(submission["Remember"][0]["question"], "Define a mechanical wave.");
        assert_eq!(submission["Remember"][0]["answer"], "A disturbance.");
        assert_eq!(submission["Create"][0]["answer"], "");
        assert!(submission.get("Apply").is_none());
    }

    #[test]
    fn scores_produce_an_evaluation_and_weights_recompute_it() {
        let mut session = session_with_questions();

        let total = session
            .apply_scores(r#"{"Remember": [{"score": 4}], "Understand": [{"score": 2}], "Create": [{"score": 0}]}"#)
            .unwrap()
            .total_weighted_score;
        assert!((total - 1.0).abs() < 1e-9);

        let (weights, _) = TaxonomyWeights::normalize([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        session.set_weights(weights);

        let evaluation = session.evaluation.as_ref().unwrap();
        assert!((evaluation.total_weighted_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn new_document_clears_derived_state_but_keeps_settings() {
        let mut session = session_with_questions();
        session.mode = GenerationMode::Generate;
        let (weights, _) = TaxonomyWeights::normalize([1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        session.set_weights(weights.clone());

        session.load_document(Some("topic.pdf".into()), "Optics".into(), vec!["Optics".into()]);

        assert!(session.taxonomy.is_none());
        assert!(session.answers.is_empty());
        assert_eq!(session.mode, GenerationMode::Generate);
        assert_eq!(session.weights, weights);
    }

    #[test]
    fn chat_memory_keeps_the_latest_turns_until_a_new_document() {
        let mut session = Session::default();
        for n in 1..=3 {
            session.remember_turn(&format!("q{n}"), &format!(" a{n} "));
        }

        let questions: Vec<&str> = session.history.iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3"]);
        assert_eq!(session.history[1].answer, "a3");

        session.load_document(None, "new".into(), vec!["new".into()]);
        assert!(session.history.is_empty());
    }
}
