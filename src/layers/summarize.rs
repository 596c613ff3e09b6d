//! Paragraph summaries of long text, produced batch by batch.
//!
//! A book does not fit in one context window, so the text is cut into
//! line batches and the model picks out and summarizes the paragraphs that
//! matter to a directive.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::layers::error;
use crate::layers::llm::ChatModel;
use crate::layers::pacing::Pacer;
use crate::layers::repository::{read_json, write_json};
use crate::layers::tags::{element, elements};
use crate::layers::derived_path;

pub const LINES_PER_BATCH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub summary: String,
    pub fulltext: String,
    pub directive: String,
    #[serde(default)]
    pub batch: usize,
    /// Batch size the text was cut with; 0 in files written before it was recorded.
    #[serde(default)]
    pub lines_per_batch: usize,
}

/// Splits `text` into batches of `lines` lines, line endings kept.
pub fn split_lines(text: &str, lines: usize) -> Vec<String> {
    let all: Vec<&str> = text.split_inclusive('\n').collect();
    all.chunks(lines.max(1)).map(|chunk| chunk.concat()).collect()
}

/// Summaries of the paragraphs in `text` that are relevant to `directive`.
///
/// The batch index and size are left at zero for the caller to fill in.
pub async fn summarize_chunk(model: &dyn ChatModel, text: &str, directive: &str) -> error::Result<Vec<SummaryRecord>> {
    let prompt = format!(
        "You are a helpful assistant that goes through batches of text to summarize it according to \
         a directive given within <directive>...</directive> tags. The text is given within \
         <text>...</text> tags and may contain garbage that is not relevant to the directive. \
         Identify only the paragraphs relevant to the directive and summarize each relevant, \
         non-garbage paragraph in this format:\n\n\
         <p><summary>summary of relevant paragraph 1</summary><fulltext>full text (clean) of relevant paragraph 1</fulltext></p>\n\
         <p><summary>summary of relevant paragraph 2</summary><fulltext>full text (clean) of relevant paragraph 2</fulltext></p>\n\
         ...\n\n\
         Here is the directive:\n<directive>{directive}</directive>\n\n\
         Here is the text to summarize:\n<text>{text}</text>\n\nYour summaries:\n"
    );
    let response = model.respond(&prompt).await?;

    let mut records = Vec::new();
    for paragraph in elements(&response, "p") {
        match (element(paragraph, "summary"), element(paragraph, "fulltext")) {
            (Some(summary), Some(fulltext)) => records.push(SummaryRecord {
                summary: summary.to_string(),
                fulltext: fulltext.to_string(),
                directive: directive.to_string(),
                batch: 0,
                lines_per_batch: 0,
            }),
            _ => tracing::error!("\tError parsing paragraph: {}", paragraph),
        }
    }
    if records.is_empty() {
        tracing::debug!("No paragraph summaries in response: {}", response);
    }
    Ok(records)
}

/// The summaries file plus its `_slim` sibling with summary text only.
pub struct SummaryStore {
    path: PathBuf,
    records: Vec<SummaryRecord>,
}

impl SummaryStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() { read_json(&path).await? } else { Vec::new() };
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &[SummaryRecord] {
        &self.records
    }

    pub fn slim_path(&self) -> PathBuf {
        derived_path(&self.path, "_slim")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Batches already summarized under `directive` with the same cut.
    fn completed_batches(&self, directive: &str, lines_per_batch: usize) -> BTreeSet<usize> {
        self.records
            .iter()
            .filter(|r| r.directive == directive)
            .filter(|r| r.lines_per_batch == 0 || r.lines_per_batch == lines_per_batch)
            .map(|r| r.batch)
            .collect()
    }

    pub async fn extend(&mut self, records: Vec<SummaryRecord>) -> Result<()> {
        self.records.extend(records);
        let slim: Vec<&str> = self.records.iter().map(|r| r.summary.as_str()).collect();
        write_json(&self.slim_path(), &slim).await?;
        write_json(&self.path, &self.records).await
    }
}

#[derive(Debug, Clone)]
pub struct SummarizeSettings {
    pub lines_per_batch: usize,
    pub skip_batches: usize,
}

impl Default for SummarizeSettings {
    fn default() -> Self {
        Self { lines_per_batch: LINES_PER_BATCH, skip_batches: 0 }
    }
}

/// Summarizes every batch of `text` not already in `store`.
/// Returns how many paragraph summaries were added.
pub async fn run(
    model: &dyn ChatModel,
    pacer: &Pacer,
    text: &str,
    directive: &str,
    store: &mut SummaryStore,
    settings: &SummarizeSettings,
) -> Result<usize> {
    let batches = split_lines(text, settings.lines_per_batch);
    let done = store.completed_batches(directive, settings.lines_per_batch);
    let recut = store
        .records()
        .iter()
        .filter(|r| r.directive == directive && r.lines_per_batch != 0 && r.lines_per_batch != settings.lines_per_batch)
        .count();
    if recut > 0 {
        tracing::warn!(
            "{} summaries in {:?} were made with a different batch size; their text is summarized again",
            recut,
            store.path()
        );
    }
    let mut added = 0;

    for (i, batch) in batches.iter().enumerate().skip(settings.skip_batches) {
        if done.contains(&i) {
            tracing::debug!("Batch {} already summarized", i + 1);
            continue;
        }
        pacer.ready().await;
        let records = match summarize_chunk(model, batch, directive).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Batch {}/{} failed: {}", i + 1, batches.len(), e);
                continue;
            }
        };
        tracing::info!(
            "Processing batch {}/{}: {} characters, {} summaries",
            i + 1,
            batches.len(),
            batch.len(),
            records.len()
        );
        if records.is_empty() {
            tracing::debug!("Skipping batch {}/{}: no summaries found", i + 1, batches.len());
            continue;
        }
        added += records.len();
        let records = records
            .into_iter()
            .map(|r| SummaryRecord { batch: i, lines_per_batch: settings.lines_per_batch, ..r })
            .collect();
        store.extend(records).await?;
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::testing::ScriptedModel;

    #[test]
    fn test_split_lines_keeps_line_endings() {
        let batches = split_lines("a\nb\nc\nd\ne", 2);
        assert_eq!(batches, vec!["a\nb\n", "c\nd\n", "e"]);
        assert!(split_lines("", 10).is_empty());
    }

    #[tokio::test]
    async fn test_summarize_chunk_tags_directive() {
        let model = ScriptedModel::new([
            "<p><summary>FDR was stubborn.</summary><fulltext>He would not yield.</fulltext></p>\n\
             <p><summary>orphan</summary></p>",
        ]);
        let records = summarize_chunk(&model, "He would not yield.", "FDR's character").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].summary, "FDR was stubborn.");
        assert_eq!(records[0].fulltext, "He would not yield.");
        assert_eq!(records[0].directive, "FDR's character");
        assert!(model.prompts()[0].contains("<directive>FDR's character</directive>"));
    }

    #[tokio::test]
    async fn test_run_skips_done_batches_and_writes_slim_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FDR_tldrs.json");
        let text = "l1\nl2\nl3\nl4\nl5\nl6\n";
        let settings = SummarizeSettings { lines_per_batch: 2, skip_batches: 0 };

        let model = ScriptedModel::with_results([
            Ok("<p><summary>s1</summary><fulltext>l1</fulltext></p>".to_string()),
            Ok("nothing relevant here".to_string()),
            Err(crate::layers::testing::api_failure()),
        ]);
        let mut store = SummaryStore::open(&path).await.unwrap();
        let added = run(&model, &Pacer::unlimited(), text, "d", &mut store, &settings).await.unwrap();
        assert_eq!(added, 1);

        let slim: Vec<String> = read_json(&store.slim_path()).await.unwrap();
        assert_eq!(slim, vec!["s1"]);

        // batch 0 is on disk; batches 1 and 2 produced nothing and are retried
        let model = ScriptedModel::new([
            "<p><summary>s2</summary><fulltext>l3</fulltext></p>",
            "<p><summary>s3</summary><fulltext>l5</fulltext></p>",
        ]);
        let mut store = SummaryStore::open(&path).await.unwrap();
        run(&model, &Pacer::unlimited(), text, "d", &mut store, &settings).await.unwrap();
        assert_eq!(model.calls().len(), 2);
        let batches: Vec<usize> = store.records().iter().map(|r| r.batch).collect();
        assert_eq!(batches, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_run_honours_skip_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SummaryStore::open(dir.path().join("s.json")).await.unwrap();
        let model = ScriptedModel::new(["<p><summary>s</summary><fulltext>l3</fulltext></p>"]);
        let settings = SummarizeSettings { lines_per_batch: 1, skip_batches: 2 };

        run(&model, &Pacer::unlimited(), "l1\nl2\nl3\n", "d", &mut store, &settings).await.unwrap();

        assert_eq!(model.calls().len(), 1);
        assert!(model.prompts()[0].contains("<text>l3\n</text>"));
        assert_eq!(store.records()[0].batch, 2);
    }

    #[tokio::test]
    async fn test_resume_only_counts_batches_of_the_same_directive_and_cut() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let text = "l1\nl2\nl3\nl4\n";
        let answer = "<p><summary>s</summary><fulltext>l</fulltext></p>";

        let mut store = SummaryStore::open(&path).await.unwrap();
        let settings = SummarizeSettings { lines_per_batch: 2, skip_batches: 0 };
        run(&ScriptedModel::new([answer, answer]), &Pacer::unlimited(), text, "character", &mut store, &settings)
            .await
            .unwrap();
        assert!(store.records().iter().all(|r| r.lines_per_batch == 2));

        // another directive over the same file starts from the first batch
        let model = ScriptedModel::new([answer, answer]);
        run(&model, &Pacer::unlimited(), text, "economy", &mut store, &settings).await.unwrap();
        assert_eq!(model.calls().len(), 2);

        // same directive, new cut: batch indexes no longer line up, so everything is redone
        let model = ScriptedModel::new([answer, answer, answer, answer]);
        let recut = SummarizeSettings { lines_per_batch: 1, skip_batches: 0 };
        run(&model, &Pacer::unlimited(), text, "character", &mut store, &recut).await.unwrap();
        assert_eq!(model.calls().len(), 4);

        // and the original cut still resumes cleanly
        let model = ScriptedModel::new(Vec::<&str>::new());
        run(&model, &Pacer::unlimited(), text, "character", &mut store, &settings).await.unwrap();
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_client_answer_is_a_batch_without_summaries() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({"choices": [{"message": {"role": "assistant", "content": ""}}]}).to_string())
            .create_async()
            .await;
        let client = crate::layers::llm::LlmClient::new(&server.url(), Some("k".into()), "m").unwrap();

        let records = summarize_chunk(&client, "Chapter 1\n", "FDR's character").await.unwrap();
        assert!(records.is_empty());
    }
}
