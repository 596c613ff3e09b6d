use anyhow::Result;
use std::collections::HashMap;

use crate::layers::error;
use crate::layers::llm::ChatModel;
use crate::layers::pacing::Pacer;
use crate::layers::repository::Repository;
use crate::layers::tags::{element, elements};
use crate::layers::Paper;

pub const BATCH_SIZE: usize = 5;

/// One TLDR per paper, keyed by bibcode. Records the model garbles are skipped.
pub async fn make_tldrs(model: &dyn ChatModel, papers: &[Paper]) -> error::Result<HashMap<String, String>> {
    let listing = papers
        .iter()
        .map(|p| {
            format!(
                "<paper><bibcode>{}</bibcode><title>{}</title><abstract>{}</abstract></paper>",
                p.bibcode, p.title, p.abstract_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You are a helpful research assistant that writes TLDR summaries of papers from their titles \
         and abstracts. The papers are given in this format:\n\n\
         <paper><bibcode>bibcode</bibcode><title>title</title><abstract>abstract</abstract></paper>\n\n\
         Write a TLDR summary for each paper in this format:\n\
         <paper><bibcode>bibcode</bibcode><tldr>tldr</tldr></paper>\n\n\
         Here are the papers:\n{listing}\n\nProvide your TLDR summaries:\n"
    );
    let response = model.respond(&prompt).await?;

    let mut tldrs = HashMap::new();
    for record in elements(&response, "paper") {
        match (element(record, "bibcode"), element(record, "tldr")) {
            (Some(bibcode), Some(tldr)) => {
                tldrs.insert(bibcode.to_string(), tldr.to_string());
            }
            _ => tracing::warn!("Skipping malformed TLDR record: {}", record),
        }
    }
    Ok(tldrs)
}

/// Gives every stored paper without a TLDR one, saving after each batch.
/// Returns how many papers were summarized.
pub async fn run(model: &dyn ChatModel, pacer: &Pacer, repo: &mut Repository, batch_size: usize) -> Result<usize> {
    let pending: Vec<Paper> = repo.papers().filter(|p| p.tldr.is_none()).cloned().collect();
    let total = pending.len();
    let mut completed = 0;
    let mut summarized = 0;

    for batch in pending.chunks(batch_size.max(1)) {
        pacer.ready().await;
        tracing::info!("Processing batch of {} papers...", batch.len());
        match make_tldrs(model, batch).await {
            Ok(tldrs) => {
                for (bibcode, tldr) in tldrs {
                    match repo.get_mut(&bibcode) {
                        Some(paper) => {
                            paper.tldr = Some(tldr);
                            summarized += 1;
                            tracing::info!("\t{}", bibcode);
                        }
                        None => tracing::warn!("\tModel returned a TLDR for unknown bibcode {}", bibcode),
                    }
                }
                repo.save().await?;
            }
            Err(e) => tracing::error!("\tBatch failed: {}", e),
        }
        completed += batch.len();
        tracing::info!("\tProgress: {:3}/{}", completed, total);
    }
    Ok(summarized)
}
