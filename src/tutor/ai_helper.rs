use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use super::aggregate::{Evaluation, TaxonomyWeights};
use super::archive::{Archive, Purpose};
use super::ingest::{self, DocumentKind, IngestOptions};
use super::llm::LanguageModel;
use super::parser;
use super::prompts::{PromptCatalog, Technique};
use super::session::Session;
use super::{GenerationMode, ScoredTaxonomy, SoloLevel};
use crate::error::{ArchiveError, TutorError};

/// Runs the steps of the tutoring pipeline. Each step makes one model call.
pub struct TutorHelper {
    model: Arc<dyn LanguageModel>,
    prompts: PromptCatalog,
    archive: Archive,
    ingest: IngestOptions,
}

#[derive(serde::Serialize)]
struct ScoreReport<'a> {
    scores: &'a ScoredTaxonomy,
    weights: &'a TaxonomyWeights,
    evaluation: &'a Evaluation,
}

impl TutorHelper {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: PromptCatalog,
        archive: Archive,
        ingest: IngestOptions,
    ) -> Self {
        Self {
            model,
            prompts,
            archive,
            ingest,
        }
    }

    pub fn ingest_options(&self) -> &IngestOptions {
        &self.ingest
    }

    /// Extracts and chunks an uploaded document into the session.
    /// Returns the number of chunks.
    pub async fn ingest_document(
        &self,
        session: &mut Session,
        name: Option<String>,
        kind: DocumentKind,
        bytes: Vec<u8>,
    ) -> Result<usize, TutorError> {
        self.ingest.check_size(bytes.len() as u64)?;
        let text = ingest::load_text(kind, bytes).await?;
        let chunks =
            ingest::split_into_chunks(&text, self.ingest.chunk_size, self.ingest.chunk_overlap);
        log::info!(
            "Loaded {:?}: {} chars, {} chunks",
            name,
            text.chars().count(),
            chunks.len()
        );
        if chunks.len() > self.ingest.top_chunks {
            log::warn!(
                "Only the first {} of {} chunks are sent to the model",
                self.ingest.top_chunks,
                chunks.len()
            );
        }
        let count = chunks.len();
        session.load_document(name, text, chunks);
        Ok(count)
    }

    /// Asks the model for taxonomy questions about the loaded document,
    /// according to the session's mode.
    pub async fn build_taxonomy(&self, session: &mut Session) -> Result<(), TutorError> {
        if session.file_content.is_none() {
            return Err(TutorError::MissingStep("Upload a document first."));
        }
        let context = ingest::leading_context(&session.chunks, self.ingest.top_chunks);

        match session.mode {
            GenerationMode::Transform => {
                let prompt = self.prompts.bloom_transform_structured.render(&context);
                let reply = self.model.complete(&prompt).await?;
                let taxonomy = session.apply_transformation(&reply)?.clone();
                log::info!("Transformed document into {} sub-questions", taxonomy.len());

                if let Some(questions) = &session.topic_questions {
                    let saved = self.archive.save_json(
                        Purpose::TransformedQuestions,
                        &BTreeMap::from([(parser::TOPIC_QUESTIONS_KEY, questions)]),
                    );
                    report_saved(saved);
                }
                report_saved(
                    self.archive
                        .save_json(Purpose::TaxonomyBloomStructured, &taxonomy),
                );
            }
            GenerationMode::Generate => {
                let topic = json!({ "The topic questions": context }).to_string();
                let prompt = self.prompts.bloom_generate.render(&topic);
                let reply = self.model.complete(&prompt).await?;
                let taxonomy = session.apply_generated(&reply)?;
                log::info!("Generated {} taxonomy questions", taxonomy.len());

                report_saved(self.archive.save_json(Purpose::GeneratedTaxonomy, taxonomy));
            }
        }
        Ok(())
    }

    /// Has the model score the collected answers, then evaluates them.
    pub async fn score_answers(&self, session: &mut Session) -> Result<(), TutorError> {
        let submission = session
            .scoring_submission()
            .ok_or(TutorError::MissingStep("There are no questions to score yet."))?;
        if session.answers.is_empty() {
            return Err(TutorError::MissingStep("Answer at least one question first."));
        }

        let blob =
            serde_json::to_string_pretty(&submission).unwrap_or_else(|_| submission.to_string());
        let prompt = self.prompts.scoring.render(&blob);
        let reply = self.model.complete(&prompt).await?;
        let evaluation = session.apply_scores(&reply)?;
        log::info!(
            "Scored answers, total weighted score {:.2}",
            evaluation.total_weighted_score
        );

        if let (Some(scores), Some(evaluation)) = (&session.scored, &session.evaluation) {
            let report = ScoreReport {
                scores,
                weights: &session.weights,
                evaluation,
            };
            report_saved(self.archive.save_json(Purpose::StudentScore, &report));
        }
        Ok(())
    }

    /// Asks the model for study recommendations based on the evaluation.
    pub async fn recommend(&self, session: &Session) -> Result<String, TutorError> {
        let evaluation = session
            .evaluation
            .as_ref()
            .ok_or(TutorError::MissingStep("Score your answers first."))?;

        let summary = serde_json::to_string_pretty(evaluation).unwrap_or_default();
        let prompt = self.prompts.metacognition.render(&summary);
        let recommendations = self.model.complete(&prompt).await?;

        report_saved(
            self.archive
                .save_text(Purpose::MetacognitiveRecommendations, &recommendations),
        );
        Ok(recommendations)
    }

    /// Rewrites one question for every level, as plain text.
    pub async fn transform_question(&self, question: &str) -> Result<String, TutorError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TutorError::MissingStep("Write the question after the command."));
        }
        let prompt = self.prompts.bloom_transform.render(question);
        Ok(self.model.complete(&prompt).await?)
    }

    pub async fn classify_solo(&self, response: &str) -> Result<SoloLevel, TutorError> {
        let response = response.trim();
        if response.is_empty() {
            return Err(TutorError::MissingStep("Write the response after the command."));
        }
        let prompt = self.prompts.solo_classification.render(response);
        let reply = self.model.complete(&prompt).await?;
        Ok(parser::parse_solo_level(&reply)?)
    }

    /// Free-form question to the tutor. The loaded document and the latest
    /// exchanges go along with it, and the new exchange is remembered.
    pub async fn ask_tutor(
        &self,
        session: &mut Session,
        question: &str,
    ) -> Result<String, TutorError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TutorError::MissingStep("Write your question after the command."));
        }
        let context = ingest::leading_context(&session.chunks, self.ingest.top_chunks);
        let prompt = self
            .prompts
            .meta_tutor
            .render(&conversation(&context, session, question));
        let reply = self.model.complete(&prompt).await?;
        session.remember_turn(question, &reply);
        Ok(reply)
    }

    pub async fn coach(&self, technique: Technique, input: &str) -> Result<String, TutorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TutorError::MissingStep("Write your text after the command."));
        }
        let prompt = self.prompts.technique(technique).render(input);
        Ok(self.model.complete(&prompt).await?)
    }
}

fn conversation(context: &str, session: &Session, question: &str) -> String {
    let mut text = String::from("Study material:\n");
    if context.trim().is_empty() {
        text.push_str("(none uploaded)\n");
    } else {
        text.push_str(context.trim());
        text.push('\n');
    }
    if !session.history.is_empty() {
        text.push_str("\nEarlier conversation:\n");
        for turn in &session.history {
            text.push_str(&format!("Student: {}\nTutor: {}\n", turn.question, turn.answer));
        }
    }
    text.push_str(&format!("\nStudent: {}", question));
    text
}

/// Saving is a side effect of a step; a failed write is logged and the step still succeeds.
fn report_saved(result: Result<std::path::PathBuf, ArchiveError>) {
    if let Err(e) = result {
        log::error!("Failed to archive result: {}", e);
    }
}
