use tempfile::tempdir;
use verdict_harness::cache::{CachedReply, ResponseCacheKey, SqliteResponseCache};
use verdict_harness::ResponseCache;

#[derive(Debug, serde::Deserialize)]
struct ExportRow {
    key_hash: String,
    model: String,
    stage: String,
    reply: String,
    truncated: bool,
    hit_count: i64,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cost_nanodollars: Option<i64>,
}

fn key(user: &str) -> ResponseCacheKey {
    ResponseCacheKey::new(
        "openai/gpt-4o-mini",
        "full_rubric",
        "You are a literary judge.",
        user,
        0.8,
        1800,
        false,
    )
}

fn reply(text: &str) -> CachedReply {
    CachedReply {
        text: text.to_string(),
        truncated: false,
        input_tokens: Some(1200),
        output_tokens: Some(340),
        cost_nanodollars: Some(384_000),
    }
}

fn read_export(path: &std::path::Path) -> Vec<ExportRow> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn sqlite_cache_put_get_and_export_increments_hit_count() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let cache = SqliteResponseCache::new(&db_path).unwrap();

    let key = key("Rank DRAFT_A and DRAFT_B.");
    cache.put(&key, &reply("```json\n{}\n```")).await.unwrap();

    let hit = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(hit, reply("```json\n{}\n```"));
    let _ = cache.get(&key).await.unwrap().unwrap();

    let export_path = dir.path().join("export.jsonl");
    let written = cache.export_jsonl(&export_path).await.unwrap();
    assert_eq!(written, 1);

    let row = read_export(&export_path)
        .into_iter()
        .find(|r| r.key_hash == key.key_hash)
        .unwrap();
    assert_eq!(row.hit_count, 2);
    assert_eq!(row.model, "openai/gpt-4o-mini");
    assert_eq!(row.stage, "full_rubric");
    assert_eq!(row.reply, "```json\n{}\n```");
    assert!(!row.truncated);
    assert_eq!(row.input_tokens, Some(1200));
    assert_eq!(row.output_tokens, Some(340));
    assert_eq!(row.cost_nanodollars, Some(384_000));
}

#[tokio::test]
async fn sqlite_cache_keeps_truncation_flag_and_overwrites() {
    let dir = tempdir().unwrap();
    let cache = SqliteResponseCache::new(dir.path().join("cache.sqlite")).unwrap();
    let key = key("Rank DRAFT_A and DRAFT_B.");

    assert!(cache.get(&key).await.unwrap().is_none());

    let cut = CachedReply {
        truncated: true,
        input_tokens: None,
        output_tokens: None,
        cost_nanodollars: None,
        ..reply("CRITIC A: The first")
    };
    cache.put(&key, &cut).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), Some(cut));

    cache.put(&key, &reply("full reply")).await.unwrap();
    let hit = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(hit.text, "full reply");
    assert!(!hit.truncated);
}

#[tokio::test]
async fn sqlite_cache_prune_max_rows_keeps_most_recent() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let cache = SqliteResponseCache::new(&db_path).unwrap();

    let old_key = key("Rank DRAFT_A and DRAFT_B.");
    let new_key = key("Rank DRAFT_C and DRAFT_D.");
    cache.put(&old_key, &reply("old")).await.unwrap();
    cache.put(&new_key, &reply("new")).await.unwrap();

    // Make the "old" row deterministically older so prune ordering is stable.
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE judge_replies SET updated_at = 0 WHERE key_hash = ?1",
        rusqlite::params![old_key.key_hash],
    )
    .unwrap();

    let stats = cache.prune(None, Some(1)).await.unwrap();
    assert_eq!(stats.remaining, 1);
    assert_eq!(stats.deleted, 1);

    let export_path = dir.path().join("export.jsonl");
    cache.export_jsonl(&export_path).await.unwrap();
    let rows = read_export(&export_path);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key_hash, new_key.key_hash);
}

#[tokio::test]
async fn sqlite_cache_prune_by_age_drops_stale_rows() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let cache = SqliteResponseCache::new(&db_path).unwrap();

    let stale = key("stale");
    let fresh = key("fresh");
    cache.put(&stale, &reply("stale")).await.unwrap();
    cache.put(&fresh, &reply("fresh")).await.unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE judge_replies SET updated_at = 0 WHERE key_hash = ?1",
        rusqlite::params![stale.key_hash],
    )
    .unwrap();

    let stats = cache.prune(Some(30), None).await.unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.remaining, 1);
    assert!(cache.get(&stale).await.unwrap().is_none());
    assert!(cache.get(&fresh).await.unwrap().is_some());
}

#[test]
fn sqlite_cache_lock_does_not_truncate_lockfile() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let cache = SqliteResponseCache::new(&db_path).unwrap();

    let mut lock_path = db_path.clone();
    lock_path.set_extension("lock");
    std::fs::write(&lock_path, "keep").unwrap();

    let lock = cache.lock_exclusive().unwrap();
    drop(lock);

    let contents = std::fs::read_to_string(&lock_path).unwrap();
    assert_eq!(contents, "keep");
}
