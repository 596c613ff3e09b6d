//! In-memory doubles for the model and search seams.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::layers::discovery::PaperSearch;
use crate::layers::error::{Error, Result};
use crate::layers::llm::{ChatMessage, ChatModel};
use crate::layers::Paper;

/// Answers with canned replies in order; errors once they run out.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// The last user message of every call.
    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|messages| messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(Error::EmptyResponse))
    }
}

pub fn api_failure() -> Error {
    Error::Api {
        service: "test",
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "boom".to_string(),
    }
}

/// Search results keyed by query; unknown queries return nothing.
#[derive(Default)]
pub struct ScriptedSearch {
    results: HashMap<String, Vec<Paper>>,
    failing: Vec<String>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn returning(mut self, query: &str, papers: Vec<Paper>) -> Self {
        self.results.insert(query.to_string(), papers);
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.push(query.to_string());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaperSearch for ScriptedSearch {
    async fn search(&self, query: &str, _rows: usize) -> Result<Vec<Paper>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.failing.iter().any(|q| q == query) {
            return Err(api_failure());
        }
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}
