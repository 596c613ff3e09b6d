use std::collections::HashMap;

use crate::layers::error::{Error, Result};
use crate::layers::llm::ChatModel;
use crate::layers::tags::{collapse_whitespace, element, elements};
use crate::layers::Paper;

pub const HIGHLY_RELEVANT: u8 = 3;
pub const RELEVANT: u8 = 2;
pub const IRRELEVANT: u8 = 0;
/// Score for labels outside the fixed set.
pub const DEFAULT_SCORE: u8 = 1;

pub const TITLE_BATCH_SIZE: usize = 20;
pub const ABSTRACT_BATCH_SIZE: usize = 5;

/// Maps a feedback label to its ordinal score. Never fails.
pub fn score_label(label: &str) -> u8 {
    match collapse_whitespace(label).to_lowercase().as_str() {
        "highly relevant" => HIGHLY_RELEVANT,
        "relevant" => RELEVANT,
        "somewhat relevant" | "unsure" => 1,
        "irrelevant" => IRRELEVANT,
        _ => {
            tracing::warn!("Invalid feedback label: {}", label);
            DEFAULT_SCORE
        }
    }
}

/// What the model judges a paper on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Title,
    Abstract,
}

const FEEDBACK_FORMAT: &str = "
<paper><bibcode>bibcode</bibcode><feedback>feedback</feedback></paper>

where feedback is one of the following:
- Highly relevant
- Relevant
- Somewhat relevant
- Irrelevant
- Unsure
";

const FEEDBACK_EXAMPLE: &str = "
Example response:
<paper><bibcode>2021A&A...647A..10P</bibcode><feedback>Relevant</feedback></paper>
<paper><bibcode>2021A&A...647A..11P</bibcode><feedback>Irrelevant</feedback></paper>

Your response:
";

fn relevance_prompt(question: &str, papers: &[Paper], evidence: Evidence) -> String {
    let (intro, listing) = match evidence {
        Evidence::Title => (
            "Here are the titles of the papers found in the search results. Please rate the relevance \
             of each title to the research question given within <question></question> tags.",
            papers
                .iter()
                .map(|p| format!("<paper><bibcode>{}</bibcode><title>{}</title></paper>", p.bibcode, p.title))
                .collect::<Vec<_>>(),
        ),
        Evidence::Abstract => (
            "Here are the papers found in the search results, each given as \
             <paper><bibcode>bibcode</bibcode><title>title</title><abstract>abstract</abstract></paper>. \
             Please rate the relevance of each paper to the research question given within \
             <question></question> tags.",
            papers
                .iter()
                .map(|p| {
                    format!(
                        "<paper><bibcode>{}</bibcode><title>{}</title><abstract>{}</abstract></paper>",
                        p.bibcode, p.title, p.abstract_text
                    )
                })
                .collect::<Vec<_>>(),
        ),
    };

    format!(
        "{intro}\nAnswer with one entry per paper in this format:\n{FEEDBACK_FORMAT}\n\
         Research question:\n<question>{question}</question>\n\n\
         Here are the papers:\n{papers}\n\nProvide your feedback:\n{FEEDBACK_EXAMPLE}",
        papers = listing.join("\n"),
    )
}

/// Reads `<paper><bibcode/><feedback/></paper>` records out of a response.
///
/// Records missing either part are skipped; a response with no usable record
/// at all is an error.
pub fn parse_feedback(response: &str) -> Result<HashMap<String, u8>> {
    let mut scores = HashMap::new();
    for record in elements(response, "paper") {
        match (element(record, "bibcode"), element(record, "feedback")) {
            (Some(bibcode), Some(label)) => {
                scores.insert(bibcode.to_string(), score_label(label));
            }
            _ => tracing::warn!("Skipping malformed feedback record: {}", record),
        }
    }
    if scores.is_empty() {
        return Err(Error::missing_tags("feedback", response));
    }
    Ok(scores)
}

/// Scores `papers` in batches of `batch_size` and merges the answers.
///
/// Papers the model leaves out are missing from the result. Any failed batch
/// fails the whole call.
pub async fn score_papers(
    model: &dyn ChatModel,
    question: &str,
    papers: &[Paper],
    evidence: Evidence,
    batch_size: usize,
) -> Result<HashMap<String, u8>> {
    let mut scores = HashMap::new();
    for batch in papers.chunks(batch_size.max(1)) {
        tracing::info!("Processing batch of {} papers ({:?} relevance)...", batch.len(), evidence);
        let response = model.respond(&relevance_prompt(question, batch, evidence)).await?;
        for (bibcode, score) in parse_feedback(&response)? {
            tracing::info!("\t{}: {}", bibcode, score);
            scores.insert(bibcode, score);
        }
    }
    Ok(scores)
}

pub async fn score_titles(
    model: &dyn ChatModel,
    question: &str,
    papers: &[Paper],
    batch_size: usize,
) -> Result<HashMap<String, u8>> {
    score_papers(model, question, papers, Evidence::Title, batch_size).await
}

pub async fn score_abstracts(
    model: &dyn ChatModel,
    question: &str,
    papers: &[Paper],
    batch_size: usize,
) -> Result<HashMap<String, u8>> {
    score_papers(model, question, papers, Evidence::Abstract, batch_size).await
}

/// Fraction of scored papers whose score satisfies `pred`.
pub fn rate(scores: &HashMap<String, u8>, pred: impl Fn(u8) -> bool) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.values().filter(|s| pred(**s)).count() as f64 / scores.len() as f64
}
