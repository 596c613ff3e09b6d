use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One bibliographic record, keyed by its ADS bibcode.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paper {
    pub bibcode: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tldr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PathBuf>,
}

impl Paper {
    pub fn new(bibcode: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            bibcode: bibcode.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            tldr: None,
            relevance: None,
            pdf: None,
        }
    }
}

/// Why a paper belongs to a storyline, with the TLDR it was judged on.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StorylineEntry {
    pub reason: String,
    #[serde(default)]
    pub tldr: String,
}

/// `notes.json` + `_slim` -> `notes_slim.json`
pub fn derived_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

pub mod error;
pub mod tags;
pub mod llm;
pub mod pacing;
pub mod repository;
pub mod discovery;
pub mod relevance;
pub mod expansion;
pub mod frontier;
pub mod tldr;
pub mod storyline;
pub mod summarize;
pub mod outline;
pub mod download;
pub mod calendar;

#[cfg(test)]
pub mod testing;
