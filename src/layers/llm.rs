use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::layers::error::{endpoint, Error, Result};

pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a helpful assistant that answer questions and provide guidance.";
pub const DEFAULT_MAX_TOKENS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Text in, text out. Every pipeline talks to the model through this.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// One-shot prompt under the default system message, no history.
    async fn respond(&self, prompt: &str) -> Result<String> {
        let messages = [ChatMessage::system(DEFAULT_SYSTEM_MESSAGE), ChatMessage::user(prompt)];
        self.complete(&messages).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct LlmClient {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: Option<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::MissingCredential("OPENAI_API_KEY"))?;
        Ok(Self {
            client: Client::new(),
            url: endpoint(base_url, "chat/completions")?,
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        tracing::debug!("Querying {} with {} messages", self.model, messages.len());
        let resp = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { service: "LLM", status, body });
        }

        let body: ChatResponse = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(Error::EmptyResponse)
    }
}

/// A chat that keeps its history, so follow-up prompts see earlier turns.
pub struct Conversation<'m> {
    model: &'m dyn ChatModel,
    messages: Vec<ChatMessage>,
}

impl<'m> Conversation<'m> {
    pub fn new(model: &'m dyn ChatModel, system: Option<&str>) -> Self {
        Self {
            model,
            messages: vec![ChatMessage::system(system.unwrap_or(DEFAULT_SYSTEM_MESSAGE))],
        }
    }

    pub async fn ask(&mut self, prompt: &str) -> Result<String> {
        self.messages.push(ChatMessage::user(prompt));
        match self.model.complete(&self.messages).await {
            Ok(answer) => {
                self.messages.push(ChatMessage::assistant(answer.clone()));
                Ok(answer)
            }
            Err(e) => {
                // a failed turn leaves no trace in the history
                self.messages.pop();
                Err(e)
            }
        }
    }

    /// Drops the last `n` messages, or everything but the system message.
    pub fn clear_history(&mut self, n: Option<usize>) {
        let keep = match n {
            Some(n) => self.messages.len().saturating_sub(n).max(1),
            None => 1,
        };
        self.messages.truncate(keep);
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }
}
