// src/store/sqlite.rs
//! SQLite-backed [`Store`]. Timestamps are unix seconds, themes are a JSON
//! array, embeddings are little-endian f32 BLOBs.

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{quote_text_hash, Store};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{NewPost, NewQuote, NewTrend, Post, Quote, StoreStats, Trend};

/// Ordered, append-only. Each entry runs once and is recorded in `schema_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial",
    r#"
    CREATE TABLE IF NOT EXISTS quotes (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        text            TEXT NOT NULL,
        text_hash       TEXT NOT NULL UNIQUE,
        source_book     TEXT NOT NULL,
        chapter         TEXT,
        character       TEXT,
        themes          TEXT NOT NULL DEFAULT '[]',
        embedding       BLOB,
        times_posted    INTEGER NOT NULL DEFAULT 0,
        last_posted_at  INTEGER,
        created_at      INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS trends (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        source       TEXT NOT NULL,
        external_id  TEXT,
        title        TEXT NOT NULL,
        url          TEXT,
        description  TEXT,
        score        INTEGER NOT NULL DEFAULT 0,
        matched      INTEGER NOT NULL DEFAULT 0,
        skipped      INTEGER NOT NULL DEFAULT 0,
        skip_reason  TEXT,
        detected_at  INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_trends_source_external
        ON trends (source, external_id);
    CREATE INDEX IF NOT EXISTS idx_trends_open
        ON trends (matched, skipped, detected_at);

    CREATE TABLE IF NOT EXISTS posts (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        quote_id             INTEGER NOT NULL REFERENCES quotes(id),
        trend_id             INTEGER REFERENCES trends(id),
        platform             TEXT NOT NULL,
        platform_post_id     TEXT,
        post_url             TEXT,
        trend_title          TEXT NOT NULL,
        trend_source         TEXT NOT NULL,
        trend_hash           TEXT NOT NULL,
        relevance_score      REAL NOT NULL,
        relevance_reasoning  TEXT,
        vector_similarity    REAL NOT NULL,
        likes                INTEGER NOT NULL DEFAULT 0,
        reposts              INTEGER NOT NULL DEFAULT 0,
        replies              INTEGER NOT NULL DEFAULT 0,
        posted_at            INTEGER NOT NULL,
        UNIQUE (trend_hash, platform)
    );
    CREATE INDEX IF NOT EXISTS idx_posts_platform_time ON posts (platform, posted_at);
    "#,
)];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file with WAL and runs migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database; a single connection so all queries see it.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("opening in-memory database")?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version    TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("creating schema_migrations")?;

        for (version, sql) in MIGRATIONS {
            let applied: Option<String> =
                sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
                    .bind(version)
                    .fetch_optional(&self.pool)
                    .await?;
            if applied.is_some() {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("applying migration {version}"))?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied migration");
        }
        Ok(())
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn quote_from_row(row: &SqliteRow) -> Result<Quote> {
    let themes_json: String = row.try_get("themes")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    let last_posted_at: Option<i64> = row.try_get("last_posted_at")?;
    Ok(Quote {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        text_hash: row.try_get("text_hash")?,
        source_book: row.try_get("source_book")?,
        chapter: row.try_get("chapter")?,
        character: row.try_get("character")?,
        themes: serde_json::from_str(&themes_json).unwrap_or_default(),
        embedding: embedding.map(|b| blob_to_vec(&b)),
        times_posted: row.try_get("times_posted")?,
        last_posted_at: last_posted_at.map(ts),
    })
}

fn trend_from_row(row: &SqliteRow) -> Result<Trend> {
    Ok(Trend {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        description: row.try_get("description")?,
        score: row.try_get("score")?,
        matched: row.try_get::<i64, _>("matched")? != 0,
        skipped: row.try_get::<i64, _>("skipped")? != 0,
        skip_reason: row.try_get("skip_reason")?,
        detected_at: ts(row.try_get("detected_at")?),
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        quote_id: row.try_get("quote_id")?,
        trend_id: row.try_get("trend_id")?,
        platform: row.try_get("platform")?,
        platform_post_id: row.try_get("platform_post_id")?,
        post_url: row.try_get("post_url")?,
        trend_title: row.try_get("trend_title")?,
        trend_source: row.try_get("trend_source")?,
        trend_hash: row.try_get("trend_hash")?,
        relevance_score: row.try_get("relevance_score")?,
        relevance_reasoning: row.try_get("relevance_reasoning")?,
        vector_similarity: row.try_get("vector_similarity")?,
        likes: row.try_get("likes")?,
        reposts: row.try_get("reposts")?,
        replies: row.try_get("replies")?,
        posted_at: ts(row.try_get("posted_at")?),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_quote(&self, quote: &NewQuote) -> Result<i64> {
        let hash = quote_text_hash(&quote.text);
        let themes = serde_json::to_string(&quote.themes)?;
        let embedding = quote.embedding.as_deref().map(vec_to_blob);

        sqlx::query(
            r#"
            INSERT INTO quotes (text, text_hash, source_book, chapter, character, themes, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(text_hash) DO NOTHING
            "#,
        )
        .bind(quote.text.trim())
        .bind(&hash)
        .bind(&quote.source_book)
        .bind(&quote.chapter)
        .bind(&quote.character)
        .bind(&themes)
        .bind(&embedding)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("inserting quote")?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM quotes WHERE text_hash = ?")
            .bind(&hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn get_quote(&self, id: i64) -> Result<Option<Quote>> {
        sqlx::query("SELECT * FROM quotes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading quote {id}"))?
            .as_ref()
            .map(quote_from_row)
            .transpose()
    }

    async fn list_quotes_with_embeddings(&self) -> Result<Vec<Quote>> {
        sqlx::query("SELECT * FROM quotes WHERE embedding IS NOT NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("listing embedded quotes")?
            .iter()
            .map(quote_from_row)
            .collect()
    }

    async fn set_quote_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let res = sqlx::query("UPDATE quotes SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(embedding))
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("storing embedding for quote {id}"))?;
        if res.rows_affected() == 0 {
            bail!("quote {id} not found");
        }
        Ok(())
    }

    async fn mark_quote_posted(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let res = sqlx::query(
            "UPDATE quotes SET times_posted = times_posted + 1, last_posted_at = ? WHERE id = ?",
        )
        .bind(at.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating posted count for quote {id}"))?;
        if res.rows_affected() == 0 {
            bail!("quote {id} not found");
        }
        Ok(())
    }

    async fn find_trend(&self, source: &str, external_id: &str) -> Result<Option<Trend>> {
        if external_id.is_empty() {
            return Ok(None);
        }
        sqlx::query("SELECT * FROM trends WHERE source = ? AND external_id = ?")
            .bind(source)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .context("looking up trend")?
            .as_ref()
            .map(trend_from_row)
            .transpose()
    }

    async fn insert_trend(&self, trend: &NewTrend) -> Result<Option<Trend>> {
        let now = Utc::now().timestamp();
        let res = sqlx::query(
            r#"
            INSERT INTO trends (source, external_id, title, url, description, score, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, external_id) DO NOTHING
            "#,
        )
        .bind(&trend.source)
        .bind(non_empty(&trend.external_id))
        .bind(&trend.title)
        .bind(non_empty(&trend.url))
        .bind(non_empty(&trend.description))
        .bind(trend.score)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("inserting trend")?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM trends WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        trend_from_row(&row).map(Some)
    }

    async fn list_unmatched_trends(&self, limit: usize) -> Result<Vec<Trend>> {
        sqlx::query(
            "SELECT * FROM trends WHERE matched = 0 AND skipped = 0
             ORDER BY detected_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("listing unmatched trends")?
        .iter()
        .map(trend_from_row)
        .collect()
    }

    async fn mark_trend_matched(&self, id: i64) -> Result<()> {
        let res = sqlx::query("UPDATE trends SET matched = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking trend {id} matched"))?;
        if res.rows_affected() == 0 {
            bail!("trend {id} not found");
        }
        Ok(())
    }

    async fn mark_trend_skipped(&self, id: i64, reason: &str) -> Result<()> {
        let res = sqlx::query("UPDATE trends SET skipped = 1, skip_reason = ? WHERE id = ?")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking trend {id} skipped"))?;
        if res.rows_affected() == 0 {
            bail!("trend {id} not found");
        }
        Ok(())
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let res = sqlx::query(
            r#"
            INSERT INTO posts (quote_id, trend_id, platform, platform_post_id, post_url,
                               trend_title, trend_source, trend_hash, relevance_score,
                               relevance_reasoning, vector_similarity, posted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.quote_id)
        .bind(post.trend_id)
        .bind(&post.platform)
        .bind(&post.platform_post_id)
        .bind(&post.post_url)
        .bind(&post.trend_title)
        .bind(&post.trend_source)
        .bind(&post.trend_hash)
        .bind(post.relevance_score)
        .bind(&post.relevance_reasoning)
        .bind(post.vector_similarity)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "recording post for trend {} on {}",
                post.trend_hash, post.platform
            )
        })?;

        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        post_from_row(&row)
    }

    async fn count_posts_since(&self, platform: &str, since: DateTime<Utc>) -> Result<i64> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE platform = ? AND posted_at >= ?")
                .bind(platform)
                .bind(since.timestamp())
                .fetch_one(&self.pool)
                .await
                .context("counting posts")?;
        Ok(n)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM quotes) AS quotes,
                (SELECT COUNT(*) FROM quotes WHERE embedding IS NOT NULL) AS quotes_with_embeddings,
                (SELECT COUNT(*) FROM trends) AS trends,
                (SELECT COUNT(*) FROM trends WHERE matched = 0 AND skipped = 0) AS unmatched_trends,
                (SELECT COUNT(*) FROM posts) AS posts
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("collecting store stats")?;

        Ok(StoreStats {
            quotes: row.try_get("quotes")?,
            quotes_with_embeddings: row.try_get("quotes_with_embeddings")?,
            trends: row.try_get("trends")?,
            unmatched_trends: row.try_get("unmatched_trends")?,
            posts: row.try_get("posts")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_trend(ext: &str) -> NewTrend {
        NewTrend {
            source: "reddit".into(),
            external_id: ext.into(),
            title: format!("trend {ext}"),
            url: "https://example.com".into(),
            description: String::new(),
            score: 42,
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(n, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn quote_roundtrip_with_embedding_and_themes() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let id = store
            .insert_quote(&NewQuote {
                text: "Man is a mystery.".into(),
                source_book: "Letters".into(),
                character: Some("Narrator".into()),
                themes: vec!["identity".into(), "mystery".into()],
                embedding: Some(vec![0.25, -1.0]),
                ..Default::default()
            })
            .await
            .unwrap();

        let dup = store
            .insert_quote(&NewQuote {
                text: " Man is a mystery. ".into(),
                source_book: "Other".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(dup, id);

        let q = store.get_quote(id).await.unwrap().unwrap();
        assert_eq!(q.themes, vec!["identity", "mystery"]);
        assert_eq!(q.embedding, Some(vec![0.25, -1.0]));
        assert_eq!(q.attribution_character(), None);
        assert!(store.get_quote(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trends_are_idempotent_and_empty_ids_are_null() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let first = store.insert_trend(&new_trend("abc")).await.unwrap();
        assert!(first.is_some());
        assert!(store.insert_trend(&new_trend("abc")).await.unwrap().is_none());

        let a = store.insert_trend(&new_trend("")).await.unwrap().unwrap();
        let b = store.insert_trend(&new_trend("")).await.unwrap().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.external_id, None);
        assert_eq!(a.description, None);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.trends, 3);
        assert_eq!(stats.unmatched_trends, 3);

        store.mark_trend_skipped(a.id, "no suitable quote match").await.unwrap();
        let open = store.list_unmatched_trends(10).await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, b.id); // newest first
    }

    #[tokio::test]
    async fn updating_unknown_rows_is_an_error() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        assert!(store.mark_trend_matched(99).await.is_err());
        assert!(store.mark_quote_posted(99, Utc::now()).await.is_err());
        assert!(store.set_quote_embedding(99, &[1.0]).await.is_err());
        let err = store.mark_trend_skipped(99, "no suitable quote match").await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        let t = store.insert_trend(&new_trend("x")).await.unwrap().unwrap();
        store.mark_trend_matched(t.id).await.unwrap();
        assert!(store.list_unmatched_trends(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_post_is_rejected() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let qid = store
            .insert_quote(&NewQuote {
                text: "q".into(),
                source_book: "b".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let post = NewPost {
            quote_id: qid,
            trend_id: None,
            platform: "bluesky".into(),
            platform_post_id: Some("at://did/app.bsky.feed.post/1".into()),
            post_url: Some("https://bsky.app/profile/x/post/1".into()),
            trend_title: "t".into(),
            trend_source: "hackernews".into(),
            trend_hash: "deadbeef".into(),
            relevance_score: 0.7,
            relevance_reasoning: Some("fits".into()),
            vector_similarity: 0.2,
        };
        let saved = store.create_post(&post).await.unwrap();
        assert_eq!(saved.likes, 0);
        assert!(store.create_post(&post).await.is_err());

        let since = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(store.count_posts_since("bluesky", since).await.unwrap(), 1);
    }
}
