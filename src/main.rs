mod config;
mod layers;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Cli, Command, LlmArgs};
use crate::layers::derived_path;
use crate::layers::discovery::AdsClient;
use crate::layers::download::Downloader;
use crate::layers::expansion::suggest_queries;
use crate::layers::frontier::{open_or_bootstrap, Frontier, FrontierSettings};
use crate::layers::llm::{ChatModel, LlmClient};
use crate::layers::outline::{self, Outline};
use crate::layers::repository::{read_json, write_json, Repository};
use crate::layers::summarize::{SummarizeSettings, SummaryRecord, SummaryStore};
use crate::layers::{calendar, storyline, summarize, tldr};

fn chat_model(llm: &LlmArgs, model: &str) -> Result<LlmClient> {
    let client = LlmClient::new(&llm.llm_url, llm.llm_key.clone(), model)
        .context("LLM client configuration")?
        .with_max_tokens(llm.max_tokens);
    Ok(client)
}

async fn load_papers(path: &Path) -> Result<Repository> {
    let repo = Repository::load(path).await?;
    if repo.is_empty() {
        tracing::warn!("{:?} holds no papers", repo.path());
    }
    Ok(repo)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 0. Load Configuration
    // Auto-create .env if it doesn't exist (copy from .env.example)
    if !Path::new(".env").exists() && Path::new(".env.example").exists() {
        println!("Creating .env from .env.example...");
        std::fs::copy(".env.example", ".env")?;
    }
    dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let pacer = cli.pacer();
    let llm = &cli.llm;

    match cli.command {
        Command::Search {
            output,
            question,
            resuggest_queries,
            title_threshold,
            abstract_threshold,
            rows,
            title_batch_size,
            abstract_batch_size,
            ads,
        } => {
            let fast = chat_model(llm, &llm.model)?;
            let strong = chat_model(llm, &llm.strong_model)?;
            let search = AdsClient::new(&ads.ads_url, ads.ads_token).context("ADS client configuration")?;

            // 1. Question and initial queries
            println!("--- Step 1: Research question ---");
            let mut repo = open_or_bootstrap(&output, question.as_deref(), &fast, &strong).await?;
            println!("{}", repo.question());
            if resuggest_queries {
                let queries = suggest_queries(&fast, repo.question()).await?;
                tracing::info!("Replacing the queue with {} suggested queries", queries.len());
                repo.replace_queries(queries);
                repo.save().await?;
            }

            // 2. Search loop
            println!("\n--- Step 2: Search ---");
            let defaults = FrontierSettings::default();
            let settings = FrontierSettings {
                rows: rows.unwrap_or(defaults.rows),
                title_threshold: title_threshold.unwrap_or(defaults.title_threshold),
                abstract_threshold: abstract_threshold.unwrap_or(defaults.abstract_threshold),
                title_batch_size: title_batch_size.unwrap_or(defaults.title_batch_size),
                abstract_batch_size: abstract_batch_size.unwrap_or(defaults.abstract_batch_size),
            };
            tracing::info!("Scoring relevance with {}", fast.model_name());
            let tally = Frontier::new(&fast, &search, &pacer, settings).run(&mut repo).await?;
            println!("Queries: {} added papers, {} empty, {} failed", tally.papers, tally.empty, tally.failed);
            println!("Done: {} papers in {:?}", repo.len(), repo.path());
        }
        Command::Tldr { file, batch_size } => {
            let model = chat_model(llm, &llm.model)?;
            let mut repo = load_papers(&file).await?;
            let written = tldr::run(&model, &pacer, &mut repo, batch_size).await?;
            println!("Wrote {} TLDRs to {:?}", written, repo.path());
        }
        Command::Storyline { file, topics, batch_size } => {
            let model = chat_model(llm, &llm.model)?;
            let mut repo = load_papers(&file).await?;
            let added = storyline::run(&model, &pacer, &mut repo, &topics, batch_size).await?;
            println!("Added {} storyline entries to {:?}", added, repo.path());
        }
        Command::Download { file, pdf_dir, gateway_url } => {
            let mut repo = load_papers(&file).await?;
            let downloader = Downloader::new(pdf_dir).with_gateway(gateway_url);
            match downloader.run(&pacer, &mut repo).await {
                Ok(fetched) => println!("Success! {} PDFs recorded in {:?}", fetched, repo.path()),
                Err(e) => println!("Download failed: {}", e),
            }
        }
        Command::Summarize {
            input,
            directive,
            output,
            lines_per_batch,
            skip_batches,
        } => {
            let model = chat_model(llm, &llm.model)?;
            let text = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("read {}", input.display()))?;
            let mut store = SummaryStore::open(output).await?;
            let settings = SummarizeSettings {
                lines_per_batch: lines_per_batch.unwrap_or(SummarizeSettings::default().lines_per_batch),
                skip_batches,
            };
            let added = summarize::run(&model, &pacer, &text, &directive, &mut store, &settings).await?;
            println!(
                "Added {} summaries to {:?}, {} in total (slim copy in {:?})",
                added,
                store.path(),
                store.records().len(),
                store.slim_path()
            );
        }
        Command::Outline { summaries, topic, batch_size } => {
            let model = chat_model(llm, &llm.model)?;
            let records: Vec<SummaryRecord> = read_json(&summaries).await?;
            let path = derived_path(&summaries, "_outline");
            let outlines = outline::run(&model, &pacer, &records, &topic, batch_size, &path).await?;
            let parsed = outlines.iter().filter(|o| o.outline.is_some()).count();
            println!("{} outlines ({} parsed) in {:?}", outlines.len(), parsed, path);
        }
        Command::Merge { outlines, topic, markup } => {
            let model = chat_model(llm, &llm.strong_model)?;
            let drafts: Vec<Outline> = read_json(&outlines).await?;
            if drafts.is_empty() {
                bail!("{} holds no outlines to merge", outlines.display());
            }
            pacer.ready().await;
            let merged = outline::merge_outlines(&model, &drafts, &topic).await?;
            let path = derived_path(&outlines, "_merged");
            write_json(&path, &merged).await?;

            match &merged.outline {
                Some(sections) => {
                    let depth = sections.iter().map(|s| s.depth()).max().unwrap_or(0);
                    tracing::info!("Merged outline: {} top-level sections, {} levels", sections.len(), depth);
                    if markup {
                        println!("{}", outline::to_markup(sections)?);
                    } else {
                        println!("{}", outline::to_markdown(sections));
                    }
                }
                None => println!("{}", merged.text),
            }
            println!("Saved to {:?}", path);
        }
        Command::Event => {
            let model = chat_model(llm, &llm.strong_model)?;
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            calendar::run(&model, &mut input, &mut output).await?;
        }
    }

    Ok(())
}
