pub mod aggregate;
pub mod ai_helper;
pub mod archive;
pub mod ingest;
pub mod llm;
pub mod parser;
pub mod prompts;
pub mod render;
pub mod session;

use std::collections::BTreeMap;
use std::fmt;

/// The six levels of Bloom's Taxonomy, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum TaxonomyLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl TaxonomyLevel {
    pub const ALL: [TaxonomyLevel; 6] = [
        TaxonomyLevel::Remember,
        TaxonomyLevel::Understand,
        TaxonomyLevel::Apply,
        TaxonomyLevel::Analyze,
        TaxonomyLevel::Evaluate,
        TaxonomyLevel::Create,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TaxonomyLevel::Remember => "Remember",
            TaxonomyLevel::Understand => "Understand",
            TaxonomyLevel::Apply => "Apply",
            TaxonomyLevel::Analyze => "Analyze",
            TaxonomyLevel::Evaluate => "Evaluate",
            TaxonomyLevel::Create => "Create",
        }
    }

    /// Prefix of generated question ids ("R1", "AN2", ...).
    pub fn code(&self) -> &'static str {
        match self {
            TaxonomyLevel::Remember => "R",
            TaxonomyLevel::Understand => "U",
            TaxonomyLevel::Apply => "A",
            TaxonomyLevel::Analyze => "AN",
            TaxonomyLevel::Evaluate => "E",
            TaxonomyLevel::Create => "C",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TaxonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An input question together with its rewrite for every taxonomy level.
/// A level the model left out stays `None` and is treated as not applicable.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TopicQuestion {
    #[serde(rename = "Original Question", alias = "original_question")]
    pub original: String,
    #[serde(rename = "Remember", default, skip_serializing_if = "Option::is_none")]
    pub remember: Option<String>,
    #[serde(rename = "Understand", default, skip_serializing_if = "Option::is_none")]
    pub understand: Option<String>,
    #[serde(rename = "Apply", default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<String>,
    #[serde(rename = "Analyze", default, skip_serializing_if = "Option::is_none")]
    pub analyze: Option<String>,
    #[serde(rename = "Evaluate", default, skip_serializing_if = "Option::is_none")]
    pub evaluate: Option<String>,
    #[serde(rename = "Create", default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
}

impl TopicQuestion {
    pub fn at_level(&self, level: TaxonomyLevel) -> Option<&str> {
        let text = match level {
            TaxonomyLevel::Remember => &self.remember,
            TaxonomyLevel::Understand => &self.understand,
            TaxonomyLevel::Apply => &self.apply,
            TaxonomyLevel::Analyze => &self.analyze,
            TaxonomyLevel::Evaluate => &self.evaluate,
            TaxonomyLevel::Create => &self.create,
        };
        text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelQuestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Index of the topic question this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<usize>,
}

/// Sub-questions grouped by level. Only levels that have questions are present.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BloomTaxonomy {
    pub levels: BTreeMap<TaxonomyLevel, Vec<LevelQuestion>>,
}

impl BloomTaxonomy {
    pub fn from_topic_questions(questions: &[TopicQuestion]) -> Self {
        let mut levels: BTreeMap<TaxonomyLevel, Vec<LevelQuestion>> = BTreeMap::new();
        for (origin, topic) in questions.iter().enumerate() {
            for level in TaxonomyLevel::ALL {
                let Some(text) = topic.at_level(level) else {
                    continue;
                };
                let entry = levels.entry(level).or_default();
                entry.push(LevelQuestion {
                    id: Some(format!("{}{}", level.code(), entry.len() + 1)),
                    question: text.to_string(),
                    origin: Some(origin),
                    ..Default::default()
                });
            }
        }
        Self { levels }
    }

    pub fn questions(&self, level: TaxonomyLevel) -> &[LevelQuestion] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn question(&self, key: AnswerKey) -> Option<&LevelQuestion> {
        self.questions(key.level).get(key.index)
    }

    pub fn len(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every (level, index) pair in answering order.
    pub fn slots(&self) -> Vec<AnswerKey> {
        self.levels
            .iter()
            .flat_map(|(level, questions)| {
                (0..questions.len()).map(move |index| AnswerKey {
                    level: *level,
                    index,
                })
            })
            .collect()
    }
}

/// Identifies one sub-question: its level and its position within that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AnswerKey {
    pub level: TaxonomyLevel,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Answers {
    by_level: BTreeMap<TaxonomyLevel, BTreeMap<usize, String>>,
}

impl Answers {
    pub fn insert(&mut self, key: AnswerKey, text: impl Into<String>) {
        self.by_level
            .entry(key.level)
            .or_default()
            .insert(key.index, text.into());
    }

    pub fn get(&self, key: AnswerKey) -> Option<&str> {
        self.by_level
            .get(&key.level)
            .and_then(|answers| answers.get(&key.index))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_level.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoredSubQuestion {
    pub question: String,
    #[serde(default)]
    pub answer: String,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// LLM-assigned scores grouped by level.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ScoredTaxonomy {
    pub levels: BTreeMap<TaxonomyLevel, Vec<ScoredSubQuestion>>,
}

impl ScoredTaxonomy {
    pub fn scores(&self, level: TaxonomyLevel) -> Option<impl Iterator<Item = u8> + '_> {
        self.levels.get(&level).map(|q| q.iter().map(|s| s.score))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GenerationMode {
    /// Rewrite each question of the document for every taxonomy level.
    #[default]
    Transform,
    /// Treat the document as a topic and generate fresh questions per level.
    Generate,
}

impl GenerationMode {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationMode::Transform => "transform",
            GenerationMode::Generate => "generate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "transform" => Some(GenerationMode::Transform),
            "generate" => Some(GenerationMode::Generate),
            _ => None,
        }
    }
}

/// SOLO taxonomy levels of response quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SoloLevel {
    Prestructural,
    Unistructural,
    Multistructural,
    Relational,
    ExtendedAbstract,
}

impl SoloLevel {
    pub const ALL: [SoloLevel; 5] = [
        SoloLevel::Prestructural,
        SoloLevel::Unistructural,
        SoloLevel::Multistructural,
        SoloLevel::Relational,
        SoloLevel::ExtendedAbstract,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SoloLevel::Prestructural => "Prestructural",
            SoloLevel::Unistructural => "Unistructural",
            SoloLevel::Multistructural => "Multistructural",
            SoloLevel::Relational => "Relational",
            SoloLevel::ExtendedAbstract => "Extended Abstract",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SoloLevel::Prestructural => "lack of understanding or an incorrect response",
            SoloLevel::Unistructural => "understands a single aspect in isolation",
            SoloLevel::Multistructural => "understands several aspects but does not connect them",
            SoloLevel::Relational => "connects the aspects into a coherent whole",
            SoloLevel::ExtendedAbstract => "generalises and applies the ideas to new situations",
        }
    }
}
