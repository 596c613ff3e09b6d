use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::layers::{Paper, StorylineEntry};

/// What happened when a query went through the search loop.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_results: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_new_papers: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_relevant_title: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_relevant_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irrelevant_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_highly_relevant_rate: Option<f64>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Papers,
    Empty,
    Failed,
}

impl QueryStats {
    pub fn failed(reason: &str) -> Self {
        Self {
            error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn outcome(&self) -> QueryOutcome {
        if self.error.is_some() {
            QueryOutcome::Failed
        } else if self.no_results || self.no_new_papers || self.no_relevant_title || self.no_relevant_abstract {
            QueryOutcome::Empty
        } else {
            QueryOutcome::Papers
        }
    }
}

/// Everything the literature pipelines persist in one JSON file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LiteratureState {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub papers: BTreeMap<String, Paper>,
    #[serde(default)]
    pub query_stats: BTreeMap<String, QueryStats>,
    #[serde(default)]
    pub queries: VecDeque<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storylines: BTreeMap<String, BTreeMap<String, StorylineEntry>>,
}

/// Owner of the literature state and the file it lives in.
pub struct Repository {
    path: PathBuf,
    state: LiteratureState,
}

impl Repository {
    pub fn create(path: impl Into<PathBuf>, question: impl Into<String>, queries: Vec<String>) -> Self {
        Self {
            path: path.into(),
            state: LiteratureState {
                question: question.into(),
                queries: queries.into(),
                ..LiteratureState::default()
            },
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = read_json(&path).await?;
        Ok(Self { path, state })
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub async fn save(&self) -> Result<()> {
        tracing::debug!("Saving {} papers to {:?}", self.state.papers.len(), self.path);
        write_json(&self.path, &self.state).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn question(&self) -> &str {
        &self.state.question
    }

    pub fn contains(&self, bibcode: &str) -> bool {
        self.state.papers.contains_key(bibcode)
    }

    pub fn get(&self, bibcode: &str) -> Option<&Paper> {
        self.state.papers.get(bibcode)
    }

    pub fn get_mut(&mut self, bibcode: &str) -> Option<&mut Paper> {
        self.state.papers.get_mut(bibcode)
    }

    pub fn put(&mut self, paper: Paper) {
        self.state.papers.insert(paper.bibcode.clone(), paper);
    }

    pub fn papers(&self) -> impl Iterator<Item = &Paper> {
        self.state.papers.values()
    }

    pub fn len(&self) -> usize {
        self.state.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.papers.is_empty()
    }

    pub fn is_processed(&self, query: &str) -> bool {
        self.state.query_stats.contains_key(query)
    }

    pub fn query_stats(&self, query: &str) -> Option<&QueryStats> {
        self.state.query_stats.get(query)
    }

    /// First outcome wins; a query is never re-recorded.
    pub fn record_query(&mut self, query: impl Into<String>, stats: QueryStats) {
        self.state.query_stats.entry(query.into()).or_insert(stats);
    }

    pub fn pop_query(&mut self) -> Option<String> {
        self.state.queries.pop_front()
    }

    pub fn push_queries(&mut self, queries: impl IntoIterator<Item = String>) {
        self.state.queries.extend(queries);
    }

    pub fn replace_queries(&mut self, queries: Vec<String>) {
        self.state.queries = queries.into();
    }

    pub fn pending_queries(&self) -> &VecDeque<String> {
        &self.state.queries
    }

    pub fn storyline(&self, topic: &str) -> Option<&BTreeMap<String, StorylineEntry>> {
        self.state.storylines.get(topic)
    }

    pub fn storyline_mut(&mut self, topic: &str) -> &mut BTreeMap<String, StorylineEntry> {
        self.state.storylines.entry(topic.to_string()).or_default()
    }
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Rewrites `path` wholesale; goes through a sibling temp file so a crash
/// mid-write leaves the previous version intact.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
