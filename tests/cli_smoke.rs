use std::collections::BTreeMap;
use std::process::Command;

use tempfile::tempdir;
use verdict_harness::cache::{CachedReply, ResponseCacheKey, SqliteResponseCache};
use verdict_harness::tournament::{
    detect_bias, ComparisonOutcome, FinalRanking, RunStats, TournamentRequest,
};
use verdict_harness::ResponseCache;

fn cmp(left: &str, right: &str, first: &str, winner: &str) -> ComparisonOutcome {
    ComparisonOutcome {
        left: left.to_string(),
        right: right.to_string(),
        presented_first: first.to_string(),
        winner: winner.to_string(),
    }
}

fn stored_ranking() -> FinalRanking {
    let comparisons = vec![
        cmp("Ana", "Ben", "Ana", "Ana"),
        cmp("Ana", "Ben", "Ben", "Ben"),
        cmp("Ana", "Cy", "Ana", "Ana"),
        cmp("Ana", "Cy", "Cy", "Ana"),
    ];
    FinalRanking {
        run_id: "run-1".to_string(),
        chapter_id: "ch-1".to_string(),
        entries: Vec::new(),
        analysis: String::new(),
        feedback: BTreeMap::new(),
        bias: detect_bias(&comparisons),
        screening: Vec::new(),
        screening_ties: Vec::new(),
        comparisons,
        discussion: Vec::new(),
        stats: RunStats::default(),
    }
}

#[test]
fn cli_bias_prints_contradicting_pairs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ranking.json");
    std::fs::write(&path, serde_json::to_string(&stored_ranking()).unwrap()).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .args(["bias", "--ranking"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 of 2 pairs contradicted"), "{stdout}");
    assert!(stdout.contains("contradiction: Ana vs Ben"), "{stdout}");
    assert!(!stdout.contains("Ana vs Cy"), "{stdout}");
}

#[test]
fn cli_cache_prune_requires_a_limit() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cache.sqlite");

    let status = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .args(["cache-prune", "--db"])
        .arg(&db)
        .status()
        .unwrap();
    assert!(!status.success());

    let status = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .args(["cache-prune", "--max-rows", "0", "--db"])
        .arg(&db)
        .status()
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn cli_cache_export_and_prune_round_trip() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cache.sqlite");
    {
        let cache = SqliteResponseCache::new(&db).unwrap();
        for user in ["first", "second", "third"] {
            let key =
                ResponseCacheKey::new("openai/gpt-4o-mini", "full_rubric", "sys", user, 0.8, 1800, false);
            let reply = CachedReply {
                text: format!("reply to {user}"),
                truncated: false,
                input_tokens: None,
                output_tokens: None,
                cost_nanodollars: None,
            };
            cache.put(&key, &reply).await.unwrap();
        }
    }

    let out = dir.path().join("export.jsonl");
    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .args(["cache-export", "--db"])
        .arg(&db)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("exported 3 rows"));
    assert_eq!(std::fs::read_to_string(&out).unwrap().lines().count(), 3);

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .args(["cache-prune", "--max-rows", "1", "--db"])
        .arg(&db)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("pruned 2 rows; 1 rows remain"));
}

#[test]
fn cli_rank_without_api_key_fails_cleanly() {
    let dir = tempdir().unwrap();
    let request = dir.path().join("request.json");
    let out = dir.path().join("ranking.json");

    let req: TournamentRequest = serde_json::from_value(serde_json::json!({
        "chapter_id": "ch-1",
        "candidates": [
            { "display_name": "Ana", "text": "First draft." },
            { "display_name": "Ben", "text": "Second draft." }
        ]
    }))
    .unwrap();
    std::fs::write(&request, serde_json::to_string(&req).unwrap()).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .env_remove("OPENROUTER_API_KEY")
        .args(["rank", "--request"])
        .arg(&request)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENROUTER_API_KEY"));
    assert!(!out.exists());
}

#[test]
fn cli_batch_rejects_chapters_with_different_judge_models() {
    let dir = tempdir().unwrap();
    let request = dir.path().join("batch.json");
    let out = dir.path().join("reports.json");

    let chapter = |id: &str, model: &str| {
        serde_json::json!({
            "chapter_id": id,
            "candidates": [
                { "name": "Ana", "text": "First draft." },
                { "name": "Ben", "text": "Second draft." }
            ],
            "config": { "judge_model": model }
        })
    };
    let batch = serde_json::json!({
        "chapters": [chapter("ch-1", "openai/gpt-4o-mini"), chapter("ch-2", "openai/gpt-4o")]
    });
    std::fs::write(&request, batch.to_string()).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_verdict"))
        .env_remove("OPENROUTER_API_KEY")
        .args(["batch", "--request"])
        .arg(&request)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("different judge models"), "{stderr}");
    assert!(!out.exists());
}
