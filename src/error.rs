use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("unsupported document type (expected a .txt or .pdf file)")]
    UnsupportedType,

    #[error("document is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("document is not valid UTF-8 text")]
    InvalidUtf8,

    #[error("failed to extract text from PDF: {0}")]
    Pdf(String),

    #[error("document contains no text")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(#[from] chatgpt::err::Error),

    #[error("LLM returned an empty completion")]
    EmptyCompletion,
}

#[derive(Error, Debug)]
pub enum ParseError {
    /// The reply could not be decoded as JSON. `raw` keeps the reply as received.
    #[error("response is not valid JSON: {source}")]
    Decode {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response structure: {0}")]
    UnexpectedStructure(String),
}

impl ParseError {
    pub fn raw(&self) -> Option<&str> {
        match self {
            ParseError::Decode { raw, .. } => Some(raw),
            ParseError::UnexpectedStructure(_) => None,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum WeightsError {
    #[error("expected six weights or level=value pairs")]
    Empty,

    #[error("{0:?} is not a number")]
    NotANumber(String),

    #[error("weight for {0} must not be negative")]
    Negative(String),

    #[error("unknown taxonomy level {0:?}")]
    UnknownLevel(String),

    #[error("expected six weights, got {0}")]
    WrongCount(usize),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TutorError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A step was requested before the step it depends on.
    #[error("{0}")]
    MissingStep(&'static str),
}
