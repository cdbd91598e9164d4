//! SQLite storage sink.
//!
//! Four tables mirror the pipeline stages: `raw_articles`, `cleaned_articles`,
//! `processed_articles` (one row per age-group variant) and `extraction_stats`.
//! Every insert is `INSERT OR IGNORE` against a URL-based unique key, so
//! storing the same batch twice adds nothing. Links between stages are
//! resolved by URL lookup at insert time.

use crate::models::{Article, CleanedArticle, ProcessedArticle, RunStats};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{info, instrument};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS raw_articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        url TEXT UNIQUE,
        published_date TEXT,
        category TEXT,
        extraction_method TEXT,
        raw_content TEXT,
        extracted_at TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cleaned_articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_article_id INTEGER,
        source TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        url TEXT UNIQUE,
        published_date TEXT,
        category TEXT,
        raw_content TEXT,
        word_count INTEGER,
        is_cleaned BOOLEAN,
        cleaned_at TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (raw_article_id) REFERENCES raw_articles(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cleaned_article_id INTEGER,
        source TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT,
        published_date TEXT,
        category TEXT,
        age_group_key TEXT NOT NULL,
        age_group_name TEXT,
        simplified_text TEXT,
        word_count INTEGER,
        sentence_count INTEGER,
        complexity_level TEXT,
        model_used TEXT,
        processed_at TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (url, age_group_key),
        FOREIGN KEY (cleaned_article_id) REFERENCES cleaned_articles(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS extraction_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        extraction_date TEXT,
        total_raw_articles INTEGER,
        total_cleaned_articles INTEGER,
        total_processed_articles INTEGER,
        sources_used TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

/// Row counts of every table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub raw: i64,
    pub cleaned: i64,
    pub processed: i64,
    pub stats: i64,
}

#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if needed) the database file at `path` and apply the schema.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        Self::connect(options).await
    }

    /// A private in-memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        use std::str::FromStr;
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        for migration in MIGRATIONS {
            sqlx::query(migration).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Insert raw articles inside one transaction.
    ///
    /// # Arguments
    ///
    /// * `articles` - Extracted articles; a URL already in the table is skipped
    ///
    /// # Returns
    ///
    /// The number of new rows.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn insert_raw(&self, articles: &[Article]) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for a in articles {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO raw_articles
                (source, title, description, url, published_date, category,
                 extraction_method, raw_content, extracted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&a.source)
            .bind(&a.title)
            .bind(&a.description)
            .bind(&a.url)
            .bind(&a.published_date)
            .bind(&a.category)
            .bind(a.extraction_method.as_str())
            .bind(&a.raw_content)
            .bind(a.extracted_at.to_rfc3339())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        info!(inserted, skipped = articles.len() as u64 - inserted, "Stored raw articles");
        Ok(inserted)
    }

    /// Insert cleaned articles, linking each to its raw row by URL.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn insert_cleaned(&self, articles: &[CleanedArticle]) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for c in articles {
            let a = &c.article;
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO cleaned_articles
                (raw_article_id, source, title, description, url, published_date,
                 category, raw_content, word_count, is_cleaned, cleaned_at)
                VALUES ((SELECT id FROM raw_articles WHERE url = ?), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&a.url)
            .bind(&a.source)
            .bind(&a.title)
            .bind(&a.description)
            .bind(&a.url)
            .bind(&a.published_date)
            .bind(&a.category)
            .bind(&a.raw_content)
            .bind(c.word_count as i64)
            .bind(c.is_cleaned)
            .bind(c.cleaned_at.to_rfc3339())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        info!(inserted, "Stored cleaned articles");
        Ok(inserted)
    }

    /// Insert one row per age-group variant, linking each to its cleaned row by URL.
    ///
    /// # Arguments
    ///
    /// * `articles` - Processed articles with their age-group variants
    ///
    /// # Returns
    ///
    /// The number of new variant rows. A (URL, age group) pair that is
    /// already stored is skipped.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn insert_processed(&self, articles: &[ProcessedArticle]) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for p in articles {
            for v in &p.age_groups {
                inserted += sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO processed_articles
                    (cleaned_article_id, source, title, url, published_date, category,
                     age_group_key, age_group_name, simplified_text, word_count,
                     sentence_count, complexity_level, model_used, processed_at)
                    VALUES ((SELECT id FROM cleaned_articles WHERE url = ?),
                            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&p.url)
                .bind(&p.source)
                .bind(&p.title)
                .bind(&p.url)
                .bind(&p.published_date)
                .bind(&p.category)
                .bind(&v.age_group_key)
                .bind(&v.age_group)
                .bind(&v.text)
                .bind(v.word_count as i64)
                .bind(v.sentence_count as i64)
                .bind(&v.complexity_level)
                .bind(&v.model_used)
                .bind(p.processed_at.to_rfc3339())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
        }
        tx.commit().await?;
        info!(inserted, "Stored processed variants");
        Ok(inserted)
    }

    /// Append one row to the run history.
    pub async fn insert_stats(&self, stats: &RunStats) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO extraction_stats
            (extraction_date, total_raw_articles, total_cleaned_articles,
             total_processed_articles, sources_used)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(stats.extraction_date.to_rfc3339())
        .bind(stats.total_raw_articles as i64)
        .bind(stats.total_cleaned_articles as i64)
        .bind(stats.total_processed_articles as i64)
        .bind(&stats.sources_used)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn counts(&self) -> Result<TableCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM raw_articles) AS raw,
                (SELECT COUNT(*) FROM cleaned_articles) AS cleaned,
                (SELECT COUNT(*) FROM processed_articles) AS processed,
                (SELECT COUNT(*) FROM extraction_stats) AS stats
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(TableCounts {
            raw: row.try_get("raw")?,
            cleaned: row.try_get("cleaned")?,
            processed: row.try_get("processed")?,
            stats: row.try_get("stats")?,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::article;
    use crate::models::{AgeGroupVariant, Simplification};
    use chrono::Utc;

    fn cleaned(a: &Article) -> CleanedArticle {
        CleanedArticle {
            article: a.clone(),
            word_count: 3,
            is_cleaned: true,
            cleaned_at: Utc::now(),
        }
    }

    fn processed(c: &CleanedArticle) -> ProcessedArticle {
        let variant = |key: &str| AgeGroupVariant {
            age_group_key: key.to_string(),
            age_group: format!("{key} years"),
            text: "Short text.".into(),
            word_count: 2,
            sentence_count: 1,
            complexity_level: "simple".into(),
            model_used: "m".into(),
        };
        ProcessedArticle {
            original: c.clone(),
            source: c.article.source.clone(),
            title: c.article.title.clone(),
            url: c.article.url.clone(),
            published_date: c.article.published_date.clone(),
            category: c.article.category.clone(),
            simplified_base: "Short text.".into(),
            simplification: Simplification::Rewritten,
            tokens_used: 10,
            age_groups: vec![variant("group_1"), variant("group_2")],
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_raw_reinsert_is_noop() {
        let storage = Storage::in_memory().await.unwrap();
        let batch = vec![article("Kites", "", "Body one."), article("Owls", "", "Body two.")];

        assert_eq!(storage.insert_raw(&batch).await.unwrap(), 2);
        assert_eq!(storage.insert_raw(&batch).await.unwrap(), 0);
        assert_eq!(storage.counts().await.unwrap().raw, 2);
    }

    #[tokio::test]
    async fn test_stages_link_by_url() {
        let storage = Storage::in_memory().await.unwrap();
        let raw = article("Kites", "", "Body one.");
        let clean = cleaned(&raw);
        let done = processed(&clean);

        storage.insert_raw(&[raw]).await.unwrap();
        assert_eq!(storage.insert_cleaned(&[clean.clone()]).await.unwrap(), 1);
        assert_eq!(storage.insert_processed(&[done.clone()]).await.unwrap(), 2);
        assert_eq!(storage.insert_cleaned(&[clean]).await.unwrap(), 0);
        assert_eq!(storage.insert_processed(&[done]).await.unwrap(), 0);

        let linked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processed_articles p
             JOIN cleaned_articles c ON p.cleaned_article_id = c.id
             JOIN raw_articles r ON c.raw_article_id = r.id",
        )
        .fetch_one(&storage.pool)
        .await
        .unwrap();
        assert_eq!(linked, 2);
    }

    #[tokio::test]
    async fn test_stats_and_counts() {
        let storage = Storage::in_memory().await.unwrap();
        let raw = vec![article("Kites", "", "Body.")];
        storage.insert_raw(&raw).await.unwrap();
        storage.insert_stats(&RunStats::new(&raw, &[], &[])).await.unwrap();

        let counts = storage.counts().await.unwrap();
        assert_eq!(
            counts,
            TableCounts {
                raw: 1,
                cleaned: 0,
                processed: 0,
                stats: 1
            }
        );
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/news.db");
        let storage = Storage::open(&path).await.unwrap();
        storage.insert_raw(&[article("Kites", "", "Body.")]).await.unwrap();
        storage.close().await;

        let reopened = Storage::open(&path).await.unwrap();
        assert_eq!(reopened.counts().await.unwrap().raw, 1);
    }
}
