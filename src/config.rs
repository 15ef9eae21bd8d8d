use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

const DEFAULT_MODEL_NAME: &str = "gpt-3.5-turbo";

/// Runtime settings, read once at startup.
///
/// The Telegram token is not part of it: `Bot::from_env` reads `TELOXIDE_TOKEN` itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model_name: String,
    /// OpenAI-compatible chat completions endpoint; the client's default when unset.
    pub api_url: Option<Url>,
    /// Replaces the built-in taxonomy generation prompt when set.
    pub generation_prompt: Option<String>,
    pub output_dir: PathBuf,
    /// Sqlite file for dialogue storage. Sessions live in memory when unset.
    pub session_db: Option<String>,
    pub llm_timeout: Duration,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_chunks: usize,
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("CHATGPT_API_KEY")
            .or_else(|| non_empty("OPENAI_API_KEY"))
            .ok_or(ConfigError::Missing("CHATGPT_API_KEY"))?;

        let max_upload_mb: u64 = parse_or(&non_empty, "MAX_UPLOAD_MB", 20)?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                name: "MAX_UPLOAD_MB",
                value: max_upload_mb.to_string(),
            })?;

        let api_url = match non_empty("LLM_API_URL") {
            Some(value) => Some(Url::parse(value.trim()).map_err(|_| ConfigError::Invalid {
                name: "LLM_API_URL",
                value,
            })?),
            None => None,
        };

        Ok(Self {
            api_key,
            api_url,
            model_name: non_empty("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            generation_prompt: non_empty("PROMPTS"),
            output_dir: non_empty("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            session_db: non_empty("SESSION_DB"),
            llm_timeout: Duration::from_secs(parse_or(&non_empty, "LLM_TIMEOUT_SECS", 60)?),
            chunk_size: positive(parse_or(&non_empty, "CHUNK_SIZE", 1000)?, "CHUNK_SIZE")?,
            chunk_overlap: parse_or(&non_empty, "CHUNK_OVERLAP", 100)?,
            top_chunks: positive(parse_or(&non_empty, "TOP_CHUNKS", 3)?, "TOP_CHUNKS")?,
            max_upload_bytes,
        })
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn positive(value: usize, name: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}
