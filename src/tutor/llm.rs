use async_trait::async_trait;
use chatgpt::{
    client::ChatGPT,
    config::{ChatGPTEngine, ModelConfiguration},
    types::CompletionResponse,
};

use crate::config::Config;
use crate::error::LlmError;

/// A hosted model: prompt in, completion text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct ChatGptModel {
    chat_gpt: ChatGPT,
}

impl ChatGptModel {
    pub fn new(config: &Config) -> Result<Self, LlmError> {
        let chat_gpt =
            ChatGPT::new_with_config(config.api_key.clone(), model_configuration(config))?;

        Ok(Self { chat_gpt })
    }
}

/// The HTTP client takes its timeout from this configuration when it is built,
/// so everything has to be set before `ChatGPT::new_with_config`.
fn model_configuration(config: &Config) -> ModelConfiguration {
    let mut model = ModelConfiguration {
        engine: engine_for(&config.model_name),
        temperature: 0.0,
        timeout: config.llm_timeout,
        ..ModelConfiguration::default()
    };
    if let Some(api_url) = &config.api_url {
        model.api_url = api_url.clone();
    }
    model
}

fn engine_for(model_name: &str) -> ChatGPTEngine {
    match model_name {
        "gpt-3.5-turbo" => ChatGPTEngine::Gpt35Turbo,
        "gpt-4" => ChatGPTEngine::Gpt4,
        // the engine keeps a &'static str; this runs once at startup
        other => ChatGPTEngine::Custom(Box::leak(other.to_string().into_boxed_str())),
    }
}

#[async_trait]
impl LanguageModel for ChatGptModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        log::debug!("Sending prompt ({} chars)", prompt.chars().count());

        let response: CompletionResponse = self.chat_gpt.send_message(prompt).await?;
        let content = response.message().content.clone();

        log::debug!("Completion ({} chars)", content.chars().count());

        if content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(content)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned completions and records every prompt it receives.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(LlmError::EmptyCompletion)])),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyCompletion))
        }
    }
}
