//! # paperrec
//!
//! Recommends papers from a library that resemble a set of starred papers.
//!
//! ```bash
//! # Five or more picks, 20% of them surprises
//! paperrec --references ~/papers/starred --candidates ~/papers
//!
//! # Exactly ten picks, reproducible, as JSON
//! paperrec -r ~/papers/starred -c ~/papers --top-k 10 --seed 42 --json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use paperrec_recommend::{
    DirectorySource, DuplicateRelocator, EmbeddingProviderType, RecommendConfig,
    RecommendationReport, RecommendationSink, Recommender,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Recommend papers similar to the ones you already liked.
#[derive(Parser)]
#[command(name = "paperrec", version)]
struct Args {
    /// Directory of reference (liked) documents
    #[arg(short, long)]
    references: PathBuf,

    /// Directory of candidate documents
    #[arg(short, long)]
    candidates: PathBuf,

    /// Recommend exactly this many documents
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Recommend this fraction of the candidates (0.0 to 1.0); --top-k wins
    /// when both are given
    #[arg(short, long)]
    percent: Option<f64>,

    /// Share of the batch drawn from just outside the top matches (0.0 to 1.0)
    #[arg(short, long)]
    surprise: Option<f64>,

    /// Only score a random sample of this many candidates
    #[arg(long)]
    subsample: Option<usize>,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Embedding cache file
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Embedding provider: hashing, openai or local
    #[arg(long)]
    provider: Option<EmbeddingProviderType>,

    /// File extensions to read (repeatable)
    #[arg(long = "extension", default_values = ["txt", "md"])]
    extensions: Vec<String>,

    /// Truncate each document to this many characters before embedding
    #[arg(long)]
    max_chars: Option<usize>,

    /// Only read the top level of each directory
    #[arg(long)]
    no_recursive: bool,

    /// Move recommended duplicate downloads ("paper (1).pdf") here
    #[arg(long)]
    move_duplicates_to: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Show debug logs
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Result<RecommendConfig> {
        let mut config = match &self.config {
            Some(path) => RecommendConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => RecommendConfig::default(),
        };

        if let Some(cache) = &self.cache {
            config.cache_path = cache.clone();
        }
        if let Some(provider) = self.provider {
            config.embedding.provider = provider;
        }
        if let Some(percent) = self.percent {
            config.sampling.top_k = None;
            config.sampling.top_k_percent = percent;
        }
        // An explicit count wins over any percentage.
        if let Some(top_k) = self.top_k {
            config.sampling.top_k = Some(top_k);
        }
        if let Some(surprise) = self.surprise {
            config.sampling.surprise = surprise;
        }
        if self.subsample.is_some() {
            config.sampling.subsample = self.subsample;
        }
        if self.seed.is_some() {
            config.sampling.seed = self.seed;
        }

        config.validate()?;
        Ok(config)
    }

    fn source(&self) -> DirectorySource {
        let source = DirectorySource::new(&self.references, &self.candidates)
            .with_extensions(&self.extensions)
            .with_recursive(!self.no_recursive);
        match self.max_chars {
            Some(max_chars) => source.with_max_chars(max_chars),
            None => source,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config()?;
    let recommender = Recommender::from_config(&config).await?;
    let source = args.source();

    let report = recommender
        .recommend_from_source(&source)
        .await
        .context("recommendation failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Some(target) = &args.move_duplicates_to {
        let relocator = DuplicateRelocator::new(target)?;
        let moved = relocator.apply(&report.recommendations).await?;
        info!("Duplicate relocation: {moved:?}");
        if !args.json {
            println!(
                "\nMoved {} duplicate(s) to {} ({} failed)",
                moved.applied,
                target.display(),
                moved.failed
            );
        }
    }

    Ok(())
}

fn print_report(report: &RecommendationReport) {
    println!(
        "{} recommendation(s) from {} candidates, based on {} reference(s):\n",
        report.recommendations.len(),
        report.candidate_count,
        report.reference_count
    );
    for (rank, candidate) in report.recommendations.iter().enumerate() {
        println!(
            "{:>3}. {} ({:.4})\n     {}",
            rank + 1,
            candidate.document.title(),
            candidate.score,
            candidate.identifier()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperrec_recommend::DocumentSource;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["paperrec", "-r", "refs", "-c", "library"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_top_k_wins_over_percent() {
        let config = parse(&["--percent", "0.5", "--top-k", "7"]).config().unwrap();
        assert_eq!(config.sampling.top_k, Some(7));

        let config = parse(&["--top-k", "7", "--percent", "0.5"]).config().unwrap();
        assert_eq!(config.sampling.top_k, Some(7));
    }

    #[test]
    fn test_percent_alone_clears_count() {
        let config = parse(&["--percent", "0.5"]).config().unwrap();
        assert_eq!(config.sampling.top_k, None);
        assert_eq!(config.sampling.top_k_percent, 0.5);
    }

    #[tokio::test]
    async fn test_max_chars_reaches_source() {
        let temp_dir = TempDir::new().unwrap();
        let refs = temp_dir.path().join("refs");
        let library = temp_dir.path().join("library");
        std::fs::create_dir_all(&refs).unwrap();
        std::fs::create_dir_all(&library).unwrap();
        std::fs::write(library.join("long.txt"), "abcdefghijklmnop").unwrap();

        let args = Args::try_parse_from([
            "paperrec",
            "-r",
            refs.to_str().unwrap(),
            "-c",
            library.to_str().unwrap(),
            "--max-chars",
            "6",
        ])
        .unwrap();

        let candidates = args.source().list_candidate_documents().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "abcdef");
    }
}
