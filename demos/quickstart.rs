//! Minimal end-to-end run of `verdict-harness`.
//!
//! Ranks three rewrites of a short chapter and prints the final order,
//! Elo ratings and the position-bias summary.
//!
//! To run:
//! - Set `OPENROUTER_API_KEY`
//! - `cargo run --example quickstart`

use std::sync::Arc;

use verdict_harness::gateway::NoopUsageSink;
use verdict_harness::tournament::{
    run_tournament, CandidateInput, RunOptions, TournamentConfig, TournamentRequest,
};
use verdict_harness::{GatewayOracle, ProviderGateway, ResponseCache, SqliteResponseCache};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Re-running reuses cached judge replies.
    let cache = SqliteResponseCache::new(SqliteResponseCache::default_path())?;
    let gateway = ProviderGateway::from_env(Arc::new(NoopUsageSink))?;

    let config = TournamentConfig::default();
    let oracle = GatewayOracle::new(Arc::new(gateway), config.judge_model.clone())
        .with_cache(Arc::new(cache) as Arc<dyn ResponseCache>);

    let drafts = [
        ("Hemingway", "The rain came. The old man watched the boats. He did not go out."),
        ("Austen", "It was a truth universally acknowledged that the rain, once begun, would keep the old man ashore."),
        ("Poe", "Once upon a midnight dreary, the rain fell on the harbour, and the old man stayed within."),
    ];
    let candidates = drafts
        .iter()
        .map(|(name, text)| CandidateInput {
            name: name.to_string(),
            text: text.to_string(),
            style_notes: None,
        })
        .collect();

    let req = TournamentRequest::new("quickstart", candidates)
        .with_source("It rained. The old fisherman decided not to sail that day.")
        .with_config(config);

    let options = RunOptions {
        rng_seed: Some(42),
        deadline: None,
    };

    let ranking = run_tournament(&oracle, &req, &options, None, None).await?;

    for entry in &ranking.entries {
        println!(
            "#{} {} elo={:?} screening={:.2}",
            entry.rank, entry.display_name, entry.elo_rating, entry.screening_mean_rank
        );
    }
    println!();
    println!("{}", ranking.analysis);
    println!("{}", ranking.bias.summary());

    Ok(())
}
