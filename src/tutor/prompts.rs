/// A prompt with a single named placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub placeholder: &'static str,
    pub text: String,
}

impl PromptTemplate {
    pub fn new(name: &'static str, placeholder: &'static str, text: impl Into<String>) -> Self {
        Self {
            name,
            placeholder,
            text: text.into(),
        }
    }

    /// Substitutes the placeholder. A template without it (e.g. a prompt
    /// supplied through the environment) gets the value in front instead.
    pub fn render(&self, value: &str) -> String {
        if self.text.contains(self.placeholder) {
            self.text.replace(self.placeholder, value)
        } else {
            format!("{}\n\n{}", value, self.text)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptCatalog {
    pub bloom_transform: PromptTemplate,
    pub bloom_transform_structured: PromptTemplate,
    pub bloom_generate: PromptTemplate,
    pub scoring: PromptTemplate,
    pub metacognition: PromptTemplate,
    pub solo_classification: PromptTemplate,
    pub meta_tutor: PromptTemplate,
    pub theory_of_mind: PromptTemplate,
    pub role_play: PromptTemplate,
    pub bloom_turing: PromptTemplate,
}

/// Coaching prompts run on a learner's own text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    /// Lists the thought processes behind a learner's message, each tagged with a level.
    TheoryOfMind,
    /// The model plays the learner and works through the taxonomy on their task.
    RolePlay,
    /// Per-level questions that another level's skills cannot answer.
    BloomTuring,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self {
            bloom_transform: PromptTemplate::new("bloom_transform", "{question}", BLOOM_TRANSFORM),
            bloom_transform_structured: PromptTemplate::new(
                "bloom_transform_structured",
                "{context}",
                BLOOM_TRANSFORM_STRUCTURED,
            ),
            bloom_generate: PromptTemplate::new("bloom_generate", "{topic}", BLOOM_GENERATE),
            scoring: PromptTemplate::new("scoring", "{submission}", SCORING),
            metacognition: PromptTemplate::new("metacognition", "{evaluation}", METACOGNITION),
            solo_classification: PromptTemplate::new(
                "solo_classification",
                "{response}",
                SOLO_CLASSIFICATION,
            ),
            meta_tutor: PromptTemplate::new("meta_tutor", "{conversation}", META_TUTOR),
            theory_of_mind: PromptTemplate::new(
                "theory_of_mind",
                "{student_input}",
                THEORY_OF_MIND,
            ),
            role_play: PromptTemplate::new("role_play", "{student_input}", ROLE_PLAY),
            bloom_turing: PromptTemplate::new("bloom_turing", "{topic}", BLOOM_TURING),
        }
    }
}

impl PromptCatalog {
    /// The built-in catalog, with the generation prompt replaced when an override is given.
    pub fn with_generation_override(generation_prompt: Option<String>) -> Self {
        let mut catalog = Self::default();
        if let Some(text) = generation_prompt {
            catalog.bloom_generate.text = text;
        }
        catalog
    }

    pub fn technique(&self, technique: Technique) -> &PromptTemplate {
        match technique {
            Technique::TheoryOfMind => &self.theory_of_mind,
            Technique::RolePlay => &self.role_play,
            Technique::BloomTuring => &self.bloom_turing,
        }
    }
}

const BLOOM_TRANSFORM: &str = r#"You are an educational design assistant specialising in Bloom's Taxonomy.
Rewrite the input question into one question for each level of the taxonomy
(Remember, Understand, Apply, Analyze, Evaluate, Create). Every new question must stay on the
topic of the original one.

Answer in exactly this layout:
Original Question: <the input question>
Remember: <a question about recalling facts>
Understand: <a question that checks comprehension>
Apply: <a question that puts the idea to practical use>
Analyze: <a question that breaks the idea into parts>
Evaluate: <a question that asks for a judgement or critique>
Create: <a question that asks for something new to be produced>

Example for "What are the causes of climate change?":
Remember: What is climate change, and what are its main causes?
Understand: How do greenhouse gases contribute to climate change?
Apply: Which of your daily activities emit greenhouse gases?
Analyze: How do natural and human-induced causes of climate change differ?
Evaluate: How effective are current policies at slowing climate change?
Create: Propose a strategy that reduces the effects of climate change on a city.

Input question: {question}"#;

const BLOOM_TRANSFORM_STRUCTURED: &str = r#"You are an educational design assistant specialising in Bloom's Taxonomy.
The document below contains practice questions. For every question in it, write one new question
for each taxonomy level: Remember, Understand, Apply, Analyze, Evaluate and Create. Each new
question must stay on the topic of its original question. Leave a level out only if it truly
cannot apply to that question.

Reply with JSON only, no prose, following this schema:
{
  "Topic Questions": [
    {
      "Original Question": "string",
      "Remember": "string",
      "Understand": "string",
      "Apply": "string",
      "Analyze": "string",
      "Evaluate": "string",
      "Create": "string"
    }
  ]
}

Document:
{context}"#;

const BLOOM_GENERATE: &str = r#"Based on the topic in the JSON field "The topic questions" below, generate a set of
questions aligned with Bloom's Taxonomy. Write 5 questions for each level (Remember, Understand,
Apply, Analyze, Evaluate, Create) and mix multiple-choice, short-answer and essay questions to fit
the complexity of each level.

Every question has a unique id made of the level prefix and a number (R1, U1, A1, AN1, E1, C1).
Multiple-choice questions list 4-5 options and give the correct answer.

Reply with JSON only, structured like this example:
{
  "Remember": [
    {"id": "R1", "type": "multiple-choice", "question": "What is the powerhouse of the cell?",
     "options": ["Nucleus", "Mitochondria", "Ribosome", "Endoplasmic Reticulum"],
     "answer": "Mitochondria"},
    {"id": "R2", "type": "short-answer", "question": "List the main functions of red blood cells."}
  ],
  "Understand": [{"id": "U1", "type": "short-answer", "question": "Explain photosynthesis."}],
  "Apply": [{"id": "A1", "type": "essay", "question": "Use Newton's second law to explain how a car accelerates."}],
  "Analyze": [{"id": "AN1", "type": "short-answer", "question": "Analyse how deforestation affects the carbon cycle."}],
  "Evaluate": [{"id": "E1", "type": "essay", "question": "Evaluate renewable energy as a way to reduce global warming."}],
  "Create": [{"id": "C1", "type": "essay", "question": "Design an experiment on how sunlight affects plant growth."}]
}

{topic}"#;

const SCORING: &str = r#"You are an experienced teacher grading a student's answers. The JSON below maps each
Bloom's Taxonomy level to the questions asked at that level and the student's answer to each.

Score every answer with an integer from 0 to 5:
0 = blank or completely wrong, 1 = very weak, 2 = partial, 3 = adequate, 4 = good, 5 = excellent.
Judge each answer against the cognitive demand of its level. Keep the feedback to one sentence.

Reply with JSON only, keeping the same levels and the same order of questions:
{
  "Remember": [
    {"question": "string", "answer": "string", "score": 0, "feedback": "string"}
  ]
}

Student submission:
{submission}"#;

const METACOGNITION: &str = r#"You are an AI tutor specialising in metacognition and Bloom's Taxonomy.
The JSON below summarises a student's results: for each level it gives the average score
(0 to 5), the weight the student gave that level, the weighted average and how many answers were
scored, followed by the total weighted score.

Write recommendations addressed to the student:
- name the levels where they are strong and where they struggle, citing the numbers;
- explain how weaknesses at lower levels hold back the higher ones;
- suggest two or three concrete study strategies for each weak level;
- end with one question the student can ask themselves to monitor their own learning.

Results:
{evaluation}"#;

const SOLO_CLASSIFICATION: &str = r#"You are an experienced evaluator. Classify the student response below with the SOLO
taxonomy:
- Prestructural: lack of understanding or an incorrect response.
- Unistructural: understanding of a single, isolated aspect.
- Multistructural: understanding of several aspects without integrating them.
- Relational: understanding of how the aspects relate, with connections made.
- Extended Abstract: deep understanding applied to new situations.

Examples:
Student response: "The capital of France is Paris."
SOLO taxonomy: Unistructural
Student response: "The French Revolution had a large impact on European politics and led to the rise of nationalism."
SOLO taxonomy: Relational

Print only the level name, without comment.
Student response: {response}
SOLO taxonomy:"#;

const META_TUTOR: &str = r#"You are a tutor who helps students learn with Bloom's Taxonomy (Remember, Understand,
Apply, Analyze, Evaluate, Create). Answer the student's latest message. When they share a
question, show how it can be asked at each level, keeping every version on the same topic.
When they ask about their learning, point out which level the difficulty belongs to and
suggest a next step. Use the study material and the earlier conversation when they are
relevant, and say so when the material does not cover the question.

{conversation}
Tutor:"#;

const THEORY_OF_MIND: &str = r#"You are a tutor specialising in metacognition. Read the student's message below and
infer the thought processes and mental states behind it, the way a teacher reading between
the lines would. List each one on its own line and tag it with the cognitive level it touches
(Knowledge, Comprehension, Application, Analysis, Evaluation, Synthesis). Think it through
step by step. If the message gives you nothing to interpret, answer "I don't know".

Example:
Student message: I keep forgetting the chemical reactions for my exam.
Thought processes:
- Has trouble memorising the reactions: Knowledge
- Wants a strategy that makes them stick: Application
- Some reactions are harder than others: Analysis

Student message: {student_input}
Thought processes:"#;

const ROLE_PLAY: &str = r#"You are a tutor specialising in metacognition and Bloom's Taxonomy. Take the role of the
student who wrote the message below and think aloud as that student would while tackling
their task:
1. Work out which learning objective the task calls for (Knowledge, Comprehension,
   Application, Analysis, Evaluation or Synthesis).
2. Explain why that objective matters most for this task.
3. Show the steps and strategies you would use to reach it.
4. Close by explaining how reaching it supports the rest of the learning.

Keep the simulation concrete and tied to the student's own words.

Student message: {student_input}"#;

const BLOOM_TURING: &str = r#"You are preparing a Bloom-Turing test. For each learning stage (Knowledge,
Comprehension, Application, Analysis, Synthesis, Evaluation) write three questions on the topic
below, getting harder within the stage. Each question must depend on the thinking skills of its
own stage: answering it with the skills of another stage should be close to impossible. The
learner answers in writing.

Lay the answer out as:
---Knowledge:
<three questions>
---Comprehension:
<three questions>
and so on for every stage.

Example for the topic Physics, stage Analysis:
Examine the historical context of a landmark physics experiment and assess its influence on
later work.

Topic: {topic}
Questions:"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_template_has_its_placeholder() {
        let catalog = PromptCatalog::default();
        for template in [
            &catalog.bloom_transform,
            &catalog.bloom_transform_structured,
            &catalog.bloom_generate,
            &catalog.scoring,
            &catalog.metacognition,
            &catalog.solo_classification,
            &catalog.meta_tutor,
            &catalog.theory_of_mind,
            &catalog.role_play,
            &catalog.bloom_turing,
        ] {
            assert!(
                template.text.contains(template.placeholder),
                "{} lacks {}",
                template.name,
                template.placeholder
            );
        }
    }

    #[test]
    fn render_substitutes_the_placeholder_only() {
        let template = PromptTemplate::new("t", "{context}", "Schema {\"a\": 1}\n{context}");
        assert_eq!(template.render("text"), "Schema {\"a\": 1}\ntext");
    }

    #[test]
    fn render_prepends_when_placeholder_missing() {
        let template = PromptTemplate::new("t", "{topic}", "Make questions.");
        assert_eq!(template.render("{\"topic\": 1}"), "{\"topic\": 1}\n\nMake questions.");
    }

    #[test]
    fn generation_prompt_can_be_overridden() {
        let catalog = PromptCatalog::with_generation_override(Some("Custom {topic}".to_string()));
        assert_eq!(catalog.bloom_generate.render("waves"), "Custom waves");
        assert_eq!(catalog.scoring, PromptCatalog::default().scoring);
    }

    #[test]
    fn techniques_pick_their_templates() {
        let catalog = PromptCatalog::default();

        let reflection = catalog
            .technique(Technique::TheoryOfMind)
            .render("I can't follow the proof.");
        let turing = catalog.technique(Technique::BloomTuring).render("Optics");

        assert!(reflection.ends_with("Student message: I can't follow the proof.\nThought processes:"));
        assert!(turing.contains("Topic: Optics\nQuestions:"));
        assert_eq!(catalog.technique(Technique::RolePlay).placeholder, "{student_input}");
    }
}
