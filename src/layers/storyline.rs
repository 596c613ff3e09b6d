use anyhow::Result;
use std::collections::BTreeMap;

use crate::layers::error;
use crate::layers::llm::ChatModel;
use crate::layers::pacing::Pacer;
use crate::layers::repository::Repository;
use crate::layers::tags::{element, elements};
use crate::layers::{Paper, StorylineEntry};

pub const BATCH_SIZE: usize = 20;

/// Asks which of `papers` contribute to `topic`, and why.
///
/// Papers without a TLDR are not offered. An empty map means nothing was
/// judged relevant.
pub async fn make_storyline(
    model: &dyn ChatModel,
    topic: &str,
    papers: &[Paper],
) -> error::Result<BTreeMap<String, String>> {
    let listing = papers
        .iter()
        .filter_map(|p| {
            p.tldr.as_ref().map(|tldr| {
                format!(
                    "<paper><bibcode>{}</bibcode><title>{}</title><tldr>{}</tldr></paper>",
                    p.bibcode, p.title, tldr
                )
            })
        })
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You are a helpful research assistant that goes through paper summaries to find the papers \
         relevant to a specific research topic. The papers are given in this format:\n\n\
         <paper><bibcode>bibcode</bibcode><title>title</title><tldr>tldr</tldr></paper>\n\n\
         Keep only the papers that directly contribute to our knowledge of the research topic, and \
         briefly explain why each one is an important contribution. Be very selective. Answer in \
         this format:\n\n\
         <paper><bibcode>bibcode</bibcode><reason>why this paper is kept</reason></paper>\n\n\
         If none of the papers are relevant, return an empty response.\n\n\
         Here is the research topic:\n{topic}\n\n\
         Here are the paper summaries:\n{listing}\n\nProvide your response below:\n"
    );
    let response = model.respond(&prompt).await?;

    let mut kept = BTreeMap::new();
    for record in elements(&response, "paper") {
        match (element(record, "bibcode"), element(record, "reason")) {
            (Some(bibcode), Some(reason)) => {
                kept.insert(bibcode.to_string(), reason.to_string());
            }
            _ => tracing::warn!("Skipping malformed storyline record: {}", record),
        }
    }
    Ok(kept)
}

/// Builds (or extends) the storyline of each topic from papers with a TLDR.
/// Returns how many entries were added.
pub async fn run(
    model: &dyn ChatModel,
    pacer: &Pacer,
    repo: &mut Repository,
    topics: &[String],
    batch_size: usize,
) -> Result<usize> {
    let candidates: Vec<Paper> = repo.papers().filter(|p| p.tldr.is_some()).cloned().collect();
    let mut added = 0;

    for topic in topics {
        tracing::info!("Building storyline around topic: {}", topic);
        let mut completed = 0;
        for batch in candidates.chunks(batch_size.max(1)) {
            let batch: Vec<Paper> = batch
                .iter()
                .filter(|p| repo.storyline(topic).map_or(true, |s| !s.contains_key(&p.bibcode)))
                .cloned()
                .collect();
            if batch.is_empty() {
                continue;
            }

            pacer.ready().await;
            tracing::info!("Processing batch of {} papers...", batch.len());
            let kept = match make_storyline(model, topic, &batch).await {
                Ok(kept) => kept,
                Err(e) => {
                    tracing::error!("\tBatch failed: {}", e);
                    continue;
                }
            };
            if kept.is_empty() {
                tracing::info!("\tNo relevant papers found.");
                continue;
            }

            for (bibcode, reason) in kept {
                let Some(tldr) = repo.get(&bibcode).map(|p| p.tldr.clone().unwrap_or_default()) else {
                    tracing::warn!("\tIgnoring unknown bibcode {}", bibcode);
                    continue;
                };
                tracing::info!("\t{}: {}", bibcode, reason);
                repo.storyline_mut(topic).insert(bibcode, StorylineEntry { reason, tldr });
                added += 1;
            }
            repo.save().await?;
            completed += batch.len();
            tracing::info!("\tProgress: {:3}/{}", completed, candidates.len());
        }
    }
    Ok(added)
}
