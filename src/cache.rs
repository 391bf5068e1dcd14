//! SQLite-backed cache for raw judge replies.
//!
//! Keys cover everything that determines a reply: model, prompt stage, both
//! prompt texts, sampling temperature, output budget and JSON mode, plus
//! the sampling slot so repeated samples of one prompt stay distinct. Cached
//! replies keep their truncation flag so a replayed run walks the same
//! parser ladder as the live one.

use async_trait::async_trait;
use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct ResponseCacheKey {
    pub model: String,
    pub stage: String,
    pub system_hash: String,
    pub user_hash: String,
    /// Sampling slot; empty unless set with [`ResponseCacheKey::with_sample`].
    pub sample: String,
    pub key_hash: String,
    request_hash: String,
}

impl ResponseCacheKey {
    pub fn new(
        model: &str,
        stage: &str,
        system: &str,
        user: &str,
        temperature: f32,
        max_output_tokens: u32,
        json_mode: bool,
    ) -> Self {
        let system_hash = hash_text(system);
        let user_hash = hash_text(user);
        let key_hash = hash_fields(&[
            model,
            stage,
            &system_hash,
            &user_hash,
            &format!("{temperature:.3}"),
            &max_output_tokens.to_string(),
            if json_mode { "json" } else { "text" },
        ]);

        Self {
            model: model.to_string(),
            stage: stage.to_string(),
            system_hash,
            user_hash,
            sample: String::new(),
            key_hash: key_hash.clone(),
            request_hash: key_hash,
        }
    }

    /// Keys the reply to one sampling slot. Identical requests in different
    /// slots get separate entries; an empty slot keeps the request key.
    pub fn with_sample(mut self, sample: &str) -> Self {
        self.key_hash = if sample.is_empty() {
            self.request_hash.clone()
        } else {
            hash_fields(&[&self.request_hash, sample])
        };
        self.sample = sample.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedReply {
    pub text: String,
    pub truncated: bool,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cost_nanodollars: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &ResponseCacheKey) -> Result<Option<CachedReply>, CacheError>;
    async fn put(&self, key: &ResponseCacheKey, value: &CachedReply) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct SqliteResponseCache {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteResponseCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             CREATE TABLE IF NOT EXISTS judge_replies ( \
               key_hash TEXT PRIMARY KEY, \
               model TEXT NOT NULL, \
               stage TEXT NOT NULL, \
               sample TEXT NOT NULL DEFAULT '', \
               system_hash TEXT NOT NULL, \
               user_hash TEXT NOT NULL, \
               reply TEXT NOT NULL, \
               truncated INTEGER NOT NULL, \
               input_tokens INTEGER, \
               output_tokens INTEGER, \
               cost_nanodollars INTEGER, \
               created_at INTEGER NOT NULL, \
               updated_at INTEGER NOT NULL, \
               hit_count INTEGER NOT NULL DEFAULT 0 \
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// `VERDICT_CACHE_PATH`, else `.verdict_judge_cache.sqlite` in the
    /// working directory.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("VERDICT_CACHE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".verdict_judge_cache.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until no other process holds the cache lock.
    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        CacheLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError>,
    {
        let guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError> + Send + 'static,
        R: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.with_conn(f))
            .await
            .map_err(|e| CacheError::Join(e.to_string()))?
    }
}

#[async_trait]
impl ResponseCache for SqliteResponseCache {
    async fn get(&self, key: &ResponseCacheKey) -> Result<Option<CachedReply>, CacheError> {
        let key_hash = key.key_hash.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT reply, truncated, input_tokens, output_tokens, cost_nanodollars \
                 FROM judge_replies WHERE key_hash = ?1",
            )?;
            let mut rows = stmt.query(params![key_hash])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let entry = CachedReply {
                text: row.get(0)?,
                truncated: row.get::<_, i64>(1)? != 0,
                input_tokens: row.get::<_, Option<i64>>(2)?.map(|v| v as u32),
                output_tokens: row.get::<_, Option<i64>>(3)?.map(|v| v as u32),
                cost_nanodollars: row.get(4)?,
            };
            conn.execute(
                "UPDATE judge_replies SET hit_count = hit_count + 1, updated_at = ?1 \
                 WHERE key_hash = ?2",
                params![now_epoch(), key_hash],
            )?;
            Ok(Some(entry))
        })
        .await
    }

    async fn put(&self, key: &ResponseCacheKey, value: &CachedReply) -> Result<(), CacheError> {
        let key = key.clone();
        let value = value.clone();
        self.blocking(move |conn| {
            let now = now_epoch();
            conn.execute(
                "INSERT INTO judge_replies ( \
                    key_hash, model, stage, sample, system_hash, user_hash, \
                    reply, truncated, input_tokens, output_tokens, cost_nanodollars, \
                    created_at, updated_at \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                 ON CONFLICT(key_hash) DO UPDATE SET \
                    reply = excluded.reply, \
                    truncated = excluded.truncated, \
                    input_tokens = excluded.input_tokens, \
                    output_tokens = excluded.output_tokens, \
                    cost_nanodollars = excluded.cost_nanodollars, \
                    updated_at = excluded.updated_at",
                params![
                    key.key_hash,
                    key.model,
                    key.stage,
                    key.sample,
                    key.system_hash,
                    key.user_hash,
                    value.text,
                    value.truncated as i64,
                    value.input_tokens.map(|v| v as i64),
                    value.output_tokens.map(|v| v as i64),
                    value.cost_nanodollars,
                    now,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

/// Advisory lock on `<cache>.lock`, held for the lifetime of the value.
#[derive(Debug)]
pub struct CacheLock {
    _file: std::fs::File,
}

impl CacheLock {
    fn new(db_path: &Path) -> Result<Self, CacheError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub model: String,
    pub stage: String,
    pub sample: String,
    pub reply: String,
    pub truncated: bool,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cost_nanodollars: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqliteResponseCache {
    /// Writes every cached reply as one JSON object per line, newest first.
    /// Returns the number of rows written.
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(move |conn| {
            use std::io::Write;

            let mut stmt = conn.prepare(
                "SELECT key_hash, model, stage, sample, reply, truncated, \
                        input_tokens, output_tokens, cost_nanodollars, \
                        created_at, updated_at, hit_count \
                 FROM judge_replies ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            let mut written = 0usize;
            while let Some(row) = rows.next()? {
                let record = CacheExportRow {
                    key_hash: row.get(0)?,
                    model: row.get(1)?,
                    stage: row.get(2)?,
                    sample: row.get(3)?,
                    reply: row.get(4)?,
                    truncated: row.get::<_, i64>(5)? != 0,
                    input_tokens: row.get::<_, Option<i64>>(6)?.map(|v| v as u32),
                    output_tokens: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
                    cost_nanodollars: row.get(8)?,
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                    hit_count: row.get(11)?,
                };
                let line =
                    serde_json::to_string(&record).map_err(|e| CacheError::Serde(e.to_string()))?;
                writeln!(file, "{line}")?;
                written += 1;
            }
            file.flush()?;
            Ok(written)
        })
        .await
    }

    /// Drops rows older than `max_age_days`, then keeps only the
    /// `max_rows` most recently used.
    pub async fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<CachePruneStats, CacheError> {
        self.blocking(move |conn| {
            let mut deleted: usize = 0;
            if let Some(days) = max_age_days {
                let cutoff = now_epoch().saturating_sub((days as i64).saturating_mul(86_400));
                deleted += conn.execute(
                    "DELETE FROM judge_replies WHERE updated_at < ?1",
                    params![cutoff],
                )?;
            }

            if let Some(max_rows) = max_rows {
                deleted += conn.execute(
                    "DELETE FROM judge_replies WHERE key_hash IN ( \
                        SELECT key_hash FROM judge_replies \
                        ORDER BY updated_at DESC LIMIT -1 OFFSET ?1 \
                     )",
                    params![max_rows as i64],
                )?;
            }

            let remaining: i64 =
                conn.query_row("SELECT COUNT(*) FROM judge_replies", [], |row| row.get(0))?;
            Ok(CachePruneStats {
                deleted,
                remaining: remaining.max(0) as usize,
            })
        })
        .await
    }
}

pub(crate) fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
