//! The search loop: a queue of ADS queries that grows as highly relevant
//! papers are found.
//!
//! Each query goes through search, deduplication, title scoring and abstract
//! scoring. Papers that survive both thresholds are stored, and the highly
//! relevant ones add their citation and reference searches to the queue. The
//! state file is rewritten after every query, so an interrupted run resumes
//! where it stopped.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::layers::discovery::PaperSearch;
use crate::layers::expansion::{expand_question, suggest_queries};
use crate::layers::llm::ChatModel;
use crate::layers::pacing::Pacer;
use crate::layers::relevance::{
    rate, score_abstracts, score_titles, ABSTRACT_BATCH_SIZE, HIGHLY_RELEVANT, IRRELEVANT, RELEVANT,
    TITLE_BATCH_SIZE,
};
use crate::layers::repository::{QueryOutcome, QueryStats, Repository};
use crate::layers::Paper;

#[derive(Debug, Clone)]
pub struct FrontierSettings {
    pub rows: usize,
    pub title_threshold: u8,
    pub abstract_threshold: u8,
    pub title_batch_size: usize,
    pub abstract_batch_size: usize,
}

impl Default for FrontierSettings {
    fn default() -> Self {
        Self {
            rows: 100,
            title_threshold: HIGHLY_RELEVANT,
            abstract_threshold: HIGHLY_RELEVANT,
            title_batch_size: TITLE_BATCH_SIZE,
            abstract_batch_size: ABSTRACT_BATCH_SIZE,
        }
    }
}

/// Loads the state at `path`, or starts a new one from `question`.
///
/// A new state gets initial queries from `fast` and the expanded question
/// from `strong`.
pub async fn open_or_bootstrap(
    path: &Path,
    question: Option<&str>,
    fast: &dyn ChatModel,
    strong: &dyn ChatModel,
) -> Result<Repository> {
    if Repository::exists(path) {
        let repo = Repository::load(path).await?;
        tracing::info!(
            "Resuming from {:?}: {} papers, {} queries pending",
            path,
            repo.len(),
            repo.pending_queries().len()
        );
        return Ok(repo);
    }

    let Some(question) = question else {
        bail!("{} does not exist yet; a research question is required to start", path.display());
    };
    let queries = suggest_queries(fast, question).await?;
    let expanded = expand_question(strong, question).await?;
    tracing::info!("Starting with {} suggested queries", queries.len());
    let repo = Repository::create(path, expanded, queries);
    repo.save().await?;
    Ok(repo)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueryTally {
    pub papers: usize,
    pub empty: usize,
    pub failed: usize,
}

pub struct Frontier<'a> {
    model: &'a dyn ChatModel,
    search: &'a dyn PaperSearch,
    pacer: &'a Pacer,
    settings: FrontierSettings,
}

impl<'a> Frontier<'a> {
    pub fn new(model: &'a dyn ChatModel, search: &'a dyn PaperSearch, pacer: &'a Pacer, settings: FrontierSettings) -> Self {
        Self { model, search, pacer, settings }
    }

    /// Works the queue until it is empty, counting the outcome of each
    /// query processed in this run.
    pub async fn run(&self, repo: &mut Repository) -> Result<QueryTally> {
        let mut tally = QueryTally::default();
        while let Some(query) = repo.pop_query() {
            tracing::info!("Processing query: {}", query);

            if repo.is_processed(&query) {
                tracing::warn!("Query {} already processed. Skipping...", query);
                repo.save().await?;
                continue;
            }

            self.pacer.ready().await;
            let stats = self.process(&query, repo).await;
            match stats.outcome() {
                QueryOutcome::Papers => tally.papers += 1,
                QueryOutcome::Empty => tally.empty += 1,
                QueryOutcome::Failed => {
                    tracing::warn!("Query {} failed: {}", query, stats.error.as_deref().unwrap_or_default());
                    tally.failed += 1;
                }
            }
            repo.record_query(query, stats);

            tracing::info!("\tSaving intermediate data...");
            repo.save().await?;
        }

        tracing::info!("All queries processed.");
        tracing::info!(
            "Total papers found: {} ({} queries added papers, {} empty, {} failed)",
            repo.len(),
            tally.papers,
            tally.empty,
            tally.failed
        );
        Ok(tally)
    }

    async fn process(&self, query: &str, repo: &mut Repository) -> QueryStats {
        let mut stats = QueryStats::default();
        let question = repo.question().to_string();

        let candidates = match self.search.search(query, self.settings.rows).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!("Error processing query {}: {}", query, e);
                return QueryStats::failed("bad ads response");
            }
        };
        tracing::info!("\tRetrieved {} papers for query: {}", candidates.len(), query);
        if candidates.is_empty() {
            tracing::warn!("No papers found for query: {}", query);
            stats.no_results = true;
            return stats;
        }

        let mut seen = HashSet::new();
        let candidates: Vec<Paper> = candidates
            .into_iter()
            .filter(|p| !repo.contains(&p.bibcode) && seen.insert(p.bibcode.clone()))
            .collect();
        tracing::info!("\tRemoving duplicates, left with {} new papers", candidates.len());
        if candidates.is_empty() {
            tracing::warn!("No new papers found for query: {}", query);
            stats.no_new_papers = true;
            return stats;
        }

        tracing::info!("\tAssessing title relevance...");
        let title_scores =
            match score_titles(self.model, &question, &candidates, self.settings.title_batch_size).await {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::error!("Error assessing title relevance: {}", e);
                    return QueryStats::failed("bad title relevance assessment");
                }
            };
        if title_scores.is_empty() {
            tracing::warn!("No title relevance feedback received.");
            return QueryStats::failed("empty title relevance feedback");
        }
        stats.relevant_rate = Some(rate(&title_scores, |s| s >= RELEVANT));
        stats.irrelevant_rate = Some(rate(&title_scores, |s| s == IRRELEVANT));

        let candidates = keep_scoring(candidates, &title_scores, self.settings.title_threshold);
        tracing::info!("\tKeeping only relevant titles, left with {} papers", candidates.len());
        if candidates.is_empty() {
            tracing::warn!("No relevant titles found for query: {}", query);
            stats.no_relevant_title = true;
            return stats;
        }

        tracing::info!("\tAssessing abstract relevance...");
        let abstract_scores =
            match score_abstracts(self.model, &question, &candidates, self.settings.abstract_batch_size).await {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::error!("Error assessing abstract relevance: {}", e);
                    return QueryStats {
                        error: Some("bad abstract relevance assessment".to_string()),
                        ..stats
                    };
                }
            };
        if abstract_scores.is_empty() {
            tracing::warn!("No abstract relevance feedback received.");
            return QueryStats {
                error: Some("empty abstract relevance feedback".to_string()),
                ..stats
            };
        }
        tracing::info!(
            "\tFound {} relevant and {} irrelevant papers.",
            abstract_scores.values().filter(|s| **s >= RELEVANT).count(),
            abstract_scores.values().filter(|s| **s == IRRELEVANT).count()
        );

        let candidates = keep_scoring(candidates, &abstract_scores, self.settings.abstract_threshold);
        tracing::info!("\tKeeping only relevant papers, left with {} papers", candidates.len());
        if candidates.is_empty() {
            tracing::warn!("No relevant papers found for query: {}", query);
            stats.no_relevant_abstract = true;
            return stats;
        }
        stats.abstract_highly_relevant_rate = Some(rate(&abstract_scores, |s| s == HIGHLY_RELEVANT));

        let highly_relevant: Vec<&str> = candidates
            .iter()
            .filter(|p| abstract_scores.get(&p.bibcode) == Some(&HIGHLY_RELEVANT))
            .map(|p| p.bibcode.as_str())
            .collect();
        let new_queries = follow_up_queries(&highly_relevant);
        tracing::info!(
            "\tFound {} highly relevant papers. Adding {} new queries.",
            highly_relevant.len(),
            new_queries.len()
        );
        repo.push_queries(new_queries);

        let added = candidates.len();
        for mut paper in candidates {
            paper.relevance = abstract_scores.get(&paper.bibcode).copied();
            repo.put(paper);
        }
        tracing::info!("\tAdded {} new papers to the list. Total papers: {}", added, repo.len());

        stats
    }
}

fn keep_scoring(candidates: Vec<Paper>, scores: &HashMap<String, u8>, threshold: u8) -> Vec<Paper> {
    candidates
        .into_iter()
        .filter(|p| scores.get(&p.bibcode).is_some_and(|s| *s >= threshold))
        .collect()
}

/// ADS queries for the papers citing and cited by each bibcode.
pub fn follow_up_queries(bibcodes: &[&str]) -> Vec<String> {
    bibcodes
        .iter()
        .flat_map(|b| [format!("citations(bibcode:{})", b), format!("references(bibcode:{})", b)])
        .collect()
}
