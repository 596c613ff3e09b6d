use clap::{Args, Parser, Subcommand};
use nonzero_ext::nonzero;
use std::path::PathBuf;

use crate::layers::discovery::ADS_API_URL;
use crate::layers::download::ADS_GATEWAY_URL;
use crate::layers::llm::DEFAULT_MAX_TOKENS;
use crate::layers::pacing::Pacer;
use crate::layers::{outline, storyline, tldr};

#[derive(Parser, Debug)]
#[command(name = "litreview", version, about = "LLM-assisted literature review over the ADS database")]
pub struct Cli {
    #[command(flatten)]
    pub llm: LlmArgs,

    /// Minimum milliseconds between model or search calls; 0 disables pacing.
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn pacer(&self) -> Pacer {
        match self.interval_ms {
            Some(ms) => Pacer::from_millis(ms),
            None => self.command.default_pacer(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LlmArgs {
    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = "https://openrouter.ai/api/v1")]
    pub llm_url: String,
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_key: Option<String>,
    #[arg(long, global = true, env = "LLM_MODEL", default_value = "openai/gpt-4o-mini")]
    pub model: String,
    /// Used for question expansion and outline merging.
    #[arg(long, global = true, env = "LLM_STRONG_MODEL", default_value = "openai/gpt-4o")]
    pub strong_model: String,
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,
}

#[derive(Args, Debug, Clone)]
pub struct AdsArgs {
    #[arg(long, env = "ADS_API_URL", default_value = ADS_API_URL)]
    pub ads_url: String,
    #[arg(long, env = "ADS_API_TOKEN", hide_env_values = true)]
    pub ads_token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Grow a relevance-filtered paper collection for a research question.
    Search {
        /// State file; resumed when it exists.
        #[arg(short, long, default_value = "papers.json")]
        output: PathBuf,
        /// Research question, required for a new state file.
        question: Option<String>,
        /// Replace the pending queue with fresh suggestions.
        #[arg(long)]
        resuggest_queries: bool,
        /// Lowest title score kept [default: 3]
        #[arg(long)]
        title_threshold: Option<u8>,
        /// Lowest abstract score kept [default: 3]
        #[arg(long)]
        abstract_threshold: Option<u8>,
        /// Search results requested per query [default: 100]
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        title_batch_size: Option<usize>,
        #[arg(long)]
        abstract_batch_size: Option<usize>,
        #[command(flatten)]
        ads: AdsArgs,
    },
    /// Write a one-sentence TLDR for every stored paper that lacks one.
    Tldr {
        file: PathBuf,
        #[arg(long, default_value_t = tldr::BATCH_SIZE)]
        batch_size: usize,
    },
    /// Pick the papers that contribute to each topic, with reasons.
    Storyline {
        file: PathBuf,
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,
        #[arg(long, default_value_t = storyline::BATCH_SIZE)]
        batch_size: usize,
    },
    /// Fetch e-print PDFs for stored papers.
    Download {
        file: PathBuf,
        #[arg(long, default_value = "pdfs")]
        pdf_dir: PathBuf,
        #[arg(long, default_value = ADS_GATEWAY_URL)]
        gateway_url: String,
    },
    /// Summarize the paragraphs of a long text that match a directive.
    Summarize {
        input: PathBuf,
        #[arg(short, long)]
        directive: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Lines of text per model call [default: 200]
        #[arg(long)]
        lines_per_batch: Option<usize>,
        #[arg(long, default_value_t = 0)]
        skip_batches: usize,
    },
    /// Draft outlines from batches of summaries.
    Outline {
        summaries: PathBuf,
        #[arg(short, long)]
        topic: String,
        #[arg(long, default_value_t = outline::SUMMARIES_PER_OUTLINE)]
        batch_size: usize,
    },
    /// Merge drafted outlines into one and print it.
    Merge {
        outlines: PathBuf,
        #[arg(short, long)]
        topic: String,
        /// Print section markup instead of a bullet list.
        #[arg(long)]
        markup: bool,
    },
    /// Add an event to the Work calendar from a free-text description.
    Event,
}

impl Command {
    pub fn default_pacer(&self) -> Pacer {
        match self {
            Command::Search { .. } | Command::Download { .. } => Pacer::default(),
            Command::Tldr { .. } | Command::Storyline { .. } => Pacer::per_minute(nonzero!(60u32)),
            Command::Summarize { .. } | Command::Outline { .. } | Command::Merge { .. } => {
                Pacer::per_minute(nonzero!(30u32))
            }
            Command::Event => Pacer::unlimited(),
        }
    }
}
