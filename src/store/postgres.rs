//! Postgres store backend, built on sea-orm.
//!
//! The schema leans on array-typed columns (`real[]` vectors and
//! centroids), so every operation goes through raw parameterized
//! statements rather than entity models. Each mutating operation is one
//! transaction; `ON CONFLICT` clauses absorb natural-key collisions.

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, FromQueryResult, Statement,
    TransactionTrait,
};

use crate::adapters::DateRange;
use crate::config::DatabaseConfig;
use crate::errors::{StoreError, StoreResult};

use super::{
    ArticleRow, ArticleVectorRow, CitationProvider, ClusterRow, NewArticle, OpportunityScoreRow,
    Paging, RawScoreRow, ScoreUpdate, SearchRow, Store, UpsertOutcome,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id BIGSERIAL PRIMARY KEY,
    pmid TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    abstract TEXT,
    doi TEXT,
    journal TEXT,
    pub_date DATE
);

CREATE TABLE IF NOT EXISTS authors (
    id BIGSERIAL PRIMARY KEY,
    full_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS articles_authors (
    article_id BIGINT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    author_id BIGINT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
    PRIMARY KEY (article_id, author_id)
);

CREATE TABLE IF NOT EXISTS citations (
    id BIGSERIAL PRIMARY KEY,
    article_id BIGINT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    count BIGINT NOT NULL DEFAULT 0,
    last_update DATE,
    UNIQUE (article_id, source)
);

CREATE TABLE IF NOT EXISTS searches (
    search_id BIGSERIAL PRIMARY KEY,
    idea_text TEXT NOT NULL,
    keyword_text TEXT NOT NULL,
    max_results INT NOT NULL,
    start_date DATE,
    end_date DATE,
    "timestamp" TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS search_articles (
    search_id BIGINT NOT NULL REFERENCES searches(search_id) ON DELETE CASCADE,
    article_id BIGINT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    PRIMARY KEY (search_id, article_id)
);

CREATE TABLE IF NOT EXISTS opportunity_scores (
    search_id BIGINT PRIMARY KEY REFERENCES searches(search_id) ON DELETE CASCADE,
    novelty_score DOUBLE PRECISION NOT NULL,
    citation_velocity_score DOUBLE PRECISION NOT NULL,
    recency_score DOUBLE PRECISION NOT NULL,
    overall_score DOUBLE PRECISION NOT NULL,
    computed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS article_vectors (
    article_id BIGINT PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    vector REAL[] NOT NULL,
    cluster_label INT
);

CREATE TABLE IF NOT EXISTS citations_per_year (
    id BIGSERIAL PRIMARY KEY,
    article_id BIGINT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    year INT NOT NULL,
    citation_count BIGINT NOT NULL,
    UNIQUE (article_id, year)
);

CREATE TABLE IF NOT EXISTS clusters (
    cluster_label INT PRIMARY KEY,
    centroid REAL[] NOT NULL,
    size BIGINT NOT NULL,
    velocity DOUBLE PRECISION NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS search_history (
    id BIGSERIAL PRIMARY KEY,
    search_id BIGINT NOT NULL REFERENCES searches(search_id) ON DELETE CASCADE,
    novelty_raw DOUBLE PRECISION NOT NULL,
    citation_raw DOUBLE PRECISION NOT NULL,
    recency_raw DOUBLE PRECISION NOT NULL,
    "timestamp" TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_search_articles_article ON search_articles(article_id);
CREATE INDEX IF NOT EXISTS idx_citations_per_year_article ON citations_per_year(article_id);
"#;

/// Postgres implementation of [`Store`].
#[derive(Clone)]
pub struct PostgresStore {
    db: DatabaseConnection,
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<sea_orm::TryGetError> for StoreError {
    fn from(err: sea_orm::TryGetError) -> Self {
        StoreError::from(DbErr::from(err))
    }
}

impl PostgresStore {
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let mut opt = sea_orm::ConnectOptions::new(config.url.as_str());
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let db = sea_orm::Database::connect(opt).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create the schema. Idempotent; safe to call on every startup.
    pub async fn init_schema(&self) -> StoreResult<()> {
        self.db.execute_unprepared(SCHEMA).await?;
        Ok(())
    }

    fn stmt<V>(sql: &str, values: V) -> Statement
    where
        V: IntoIterator<Item = sea_orm::Value>,
    {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }
}

#[derive(Debug, FromQueryResult)]
struct ArticleQueryRow {
    id: i64,
    pmid: String,
    title: String,
    abstract_text: Option<String>,
    journal: Option<String>,
    pub_date: Option<NaiveDate>,
    doi: Option<String>,
}

impl From<ArticleQueryRow> for ArticleRow {
    fn from(row: ArticleQueryRow) -> Self {
        ArticleRow {
            id: row.id,
            pmid: row.pmid,
            title: row.title,
            abstract_text: row.abstract_text,
            journal: row.journal,
            pub_date: row.pub_date,
            doi: row.doi,
        }
    }
}

const ARTICLE_COLUMNS: &str = "id, pmid, title, abstract AS abstract_text, journal, pub_date, doi";

#[derive(Debug, FromQueryResult)]
struct SearchQueryRow {
    search_id: i64,
    idea_text: String,
    keyword_text: String,
    max_results: i32,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    created_at: chrono::DateTime<Utc>,
}

impl From<SearchQueryRow> for SearchRow {
    fn from(row: SearchQueryRow) -> Self {
        SearchRow {
            search_id: row.search_id,
            idea_text: row.idea_text,
            keyword_text: row.keyword_text,
            max_results: row.max_results,
            start_date: row.start_date,
            end_date: row.end_date,
            created_at: row.created_at,
        }
    }
}

const SEARCH_COLUMNS: &str = "search_id, idea_text, keyword_text, max_results, start_date, \
                              end_date, \"timestamp\" AS created_at";

#[derive(Debug, FromQueryResult)]
struct VectorQueryRow {
    article_id: i64,
    vector: Vec<f32>,
    cluster_label: Option<i32>,
}

#[derive(Debug, FromQueryResult)]
struct UpsertQueryRow {
    id: i64,
    was_created: bool,
}

#[derive(Debug, FromQueryResult)]
struct YearQueryRow {
    year: i32,
    citation_count: i64,
}

#[derive(Debug, FromQueryResult)]
struct RawScoreQueryRow {
    novelty_raw: f64,
    citation_raw: f64,
    recency_raw: f64,
}

#[derive(Debug, FromQueryResult)]
struct ScoreQueryRow {
    search_id: i64,
    novelty_score: f64,
    citation_velocity_score: f64,
    recency_score: f64,
    overall_score: f64,
    computed_at: chrono::DateTime<Utc>,
}

#[derive(Debug, FromQueryResult)]
struct ClusterQueryRow {
    cluster_label: i32,
    centroid: Vec<f32>,
    size: i64,
    velocity: f64,
    last_updated: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn upsert_article(&self, article: &NewArticle) -> StoreResult<UpsertOutcome> {
        // `xmax = 0` distinguishes a fresh insert from a conflict-update.
        let stmt = Self::stmt(
            r#"
            INSERT INTO articles (pmid, title, abstract, doi, journal, pub_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (pmid) DO UPDATE SET
                title    = CASE WHEN EXCLUDED.title <> '' THEN EXCLUDED.title
                                ELSE articles.title END,
                abstract = COALESCE(NULLIF(EXCLUDED.abstract, ''), articles.abstract),
                doi      = COALESCE(NULLIF(EXCLUDED.doi, ''), articles.doi),
                journal  = COALESCE(NULLIF(EXCLUDED.journal, ''), articles.journal),
                pub_date = COALESCE(EXCLUDED.pub_date, articles.pub_date)
            RETURNING id, (xmax = 0) AS was_created
            "#,
            [
                article.pmid.clone().into(),
                article.title.clone().into(),
                article.abstract_text.clone().into(),
                article.doi.clone().into(),
                article.journal.clone().into(),
                article.pub_date.into(),
            ],
        );

        let row = UpsertQueryRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::Backend("article upsert returned no row".into()))?;

        Ok(UpsertOutcome {
            article_id: row.id,
            was_created: row.was_created,
        })
    }

    async fn attach_authors(&self, article_id: i64, names: &[String]) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        for name in names {
            txn.execute(Self::stmt(
                "INSERT INTO authors (full_name) VALUES ($1) ON CONFLICT (full_name) DO NOTHING",
                [name.clone().into()],
            ))
            .await?;

            let row = txn
                .query_one(Self::stmt(
                    "SELECT id FROM authors WHERE full_name = $1",
                    [name.clone().into()],
                ))
                .await?
                .ok_or_else(|| StoreError::Backend("author row vanished mid-transaction".into()))?;
            let author_id: i64 = row.try_get("", "id")?;

            txn.execute(Self::stmt(
                "INSERT INTO articles_authors (article_id, author_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                [article_id.into(), author_id.into()],
            ))
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn record_citation_snapshot(
        &self,
        article_id: i64,
        source: CitationProvider,
        count: i64,
        observed_on: NaiveDate,
    ) -> StoreResult<()> {
        self.db
            .execute(Self::stmt(
                r#"
                INSERT INTO citations (article_id, source, count, last_update)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (article_id, source) DO UPDATE SET
                    count = EXCLUDED.count,
                    last_update = EXCLUDED.last_update
                "#,
                [
                    article_id.into(),
                    source.as_str().into(),
                    count.into(),
                    observed_on.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    async fn record_yearly_citations(
        &self,
        article_id: i64,
        series: &[(i32, i64)],
    ) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        txn.execute(Self::stmt(
            "DELETE FROM citations_per_year WHERE article_id = $1",
            [article_id.into()],
        ))
        .await?;
        for &(year, count) in series {
            txn.execute(Self::stmt(
                "INSERT INTO citations_per_year (article_id, year, citation_count) \
                 VALUES ($1, $2, $3) ON CONFLICT (article_id, year) DO NOTHING",
                [article_id.into(), year.into(), count.into()],
            ))
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn upsert_vector(
        &self,
        article_id: i64,
        vector: &[f32],
        cluster_label: Option<i32>,
    ) -> StoreResult<()> {
        self.db
            .execute(Self::stmt(
                r#"
                INSERT INTO article_vectors (article_id, vector, cluster_label)
                VALUES ($1, $2, $3)
                ON CONFLICT (article_id) DO UPDATE SET
                    vector = EXCLUDED.vector,
                    cluster_label = EXCLUDED.cluster_label
                "#,
                [
                    article_id.into(),
                    vector.to_vec().into(),
                    cluster_label.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    async fn create_search(
        &self,
        idea: &str,
        keywords: &str,
        max_results: i32,
        date_range: Option<&DateRange>,
    ) -> StoreResult<i64> {
        let stmt = Self::stmt(
            r#"
            INSERT INTO searches (idea_text, keyword_text, max_results, start_date, end_date, "timestamp")
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING search_id
            "#,
            [
                idea.to_string().into(),
                keywords.to_string().into(),
                max_results.into(),
                date_range.map(|r| r.start).into(),
                date_range.map(|r| r.end).into(),
                Utc::now().into(),
            ],
        );
        let row = self
            .db
            .query_one(stmt)
            .await?
            .ok_or_else(|| StoreError::Backend("search insert returned no row".into()))?;
        Ok(row.try_get("", "search_id")?)
    }

    async fn link_search_articles(&self, search_id: i64, article_ids: &[i64]) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        for &article_id in article_ids {
            txn.execute(Self::stmt(
                "INSERT INTO search_articles (search_id, article_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                [search_id.into(), article_id.into()],
            ))
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn put_score(&self, search_id: i64, update: &ScoreUpdate) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        txn.execute(Self::stmt(
            r#"
            INSERT INTO opportunity_scores
                (search_id, novelty_score, citation_velocity_score, recency_score,
                 overall_score, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (search_id) DO UPDATE SET
                novelty_score = EXCLUDED.novelty_score,
                citation_velocity_score = EXCLUDED.citation_velocity_score,
                recency_score = EXCLUDED.recency_score,
                overall_score = EXCLUDED.overall_score,
                computed_at = EXCLUDED.computed_at
            "#,
            [
                search_id.into(),
                update.novelty.into(),
                update.citation_velocity.into(),
                update.recency.into(),
                update.overall.into(),
                Utc::now().into(),
            ],
        ))
        .await?;
        txn.execute(Self::stmt(
            r#"
            INSERT INTO search_history (search_id, novelty_raw, citation_raw, recency_raw, "timestamp")
            VALUES ($1, $2, $3, $4, $5)
            "#,
            [
                search_id.into(),
                update.novelty_raw.into(),
                update.citation_raw.into(),
                update.recency_raw.into(),
                Utc::now().into(),
            ],
        ))
        .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn delete_search(&self, search_id: i64) -> StoreResult<()> {
        self.db
            .execute(Self::stmt(
                "DELETE FROM searches WHERE search_id = $1",
                [search_id.into()],
            ))
            .await?;
        Ok(())
    }

    async fn list_articles(&self, paging: Paging) -> StoreResult<Vec<ArticleRow>> {
        let stmt = Self::stmt(
            &format!("SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY id LIMIT $1 OFFSET $2"),
            [(paging.limit as i64).into(), (paging.offset as i64).into()],
        );
        let rows = ArticleQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_article(&self, pmid: &str) -> StoreResult<Option<ArticleRow>> {
        let stmt = Self::stmt(
            &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE pmid = $1"),
            [pmid.to_string().into()],
        );
        Ok(ArticleQueryRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn list_searches(&self, paging: Paging) -> StoreResult<Vec<SearchRow>> {
        let stmt = Self::stmt(
            &format!("SELECT {SEARCH_COLUMNS} FROM searches ORDER BY search_id LIMIT $1 OFFSET $2"),
            [(paging.limit as i64).into(), (paging.offset as i64).into()],
        );
        let rows = SearchQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_search(&self, search_id: i64) -> StoreResult<Option<SearchRow>> {
        let stmt = Self::stmt(
            &format!("SELECT {SEARCH_COLUMNS} FROM searches WHERE search_id = $1"),
            [search_id.into()],
        );
        Ok(SearchQueryRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn articles_of_search(&self, search_id: i64) -> StoreResult<Vec<ArticleRow>> {
        let stmt = Self::stmt(
            &format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles a \
                 JOIN search_articles sa ON a.id = sa.article_id \
                 WHERE sa.search_id = $1 ORDER BY a.id"
            ),
            [search_id.into()],
        );
        let rows = ArticleQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn vectors_of_search(&self, search_id: i64) -> StoreResult<Vec<ArticleVectorRow>> {
        let stmt = Self::stmt(
            "SELECT v.article_id, v.vector, v.cluster_label FROM article_vectors v \
             JOIN search_articles sa ON v.article_id = sa.article_id \
             WHERE sa.search_id = $1 ORDER BY v.article_id",
            [search_id.into()],
        );
        let rows = VectorQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|r| ArticleVectorRow {
                article_id: r.article_id,
                vector: r.vector,
                cluster_label: r.cluster_label,
            })
            .collect())
    }

    async fn all_vectors(&self) -> StoreResult<Vec<ArticleVectorRow>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT article_id, vector, cluster_label FROM article_vectors ORDER BY article_id",
        );
        let rows = VectorQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|r| ArticleVectorRow {
                article_id: r.article_id,
                vector: r.vector,
                cluster_label: r.cluster_label,
            })
            .collect())
    }

    async fn yearly_citations(&self, article_id: i64) -> StoreResult<Vec<(i32, i64)>> {
        let stmt = Self::stmt(
            "SELECT year, citation_count FROM citations_per_year \
             WHERE article_id = $1 ORDER BY year",
            [article_id.into()],
        );
        let rows = YearQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows.into_iter().map(|r| (r.year, r.citation_count)).collect())
    }

    async fn raw_score_history(&self) -> StoreResult<Vec<RawScoreRow>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT novelty_raw, citation_raw, recency_raw FROM search_history ORDER BY id",
        );
        let rows = RawScoreQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|r| RawScoreRow {
                novelty_raw: r.novelty_raw,
                citation_raw: r.citation_raw,
                recency_raw: r.recency_raw,
            })
            .collect())
    }

    async fn get_score(&self, search_id: i64) -> StoreResult<Option<OpportunityScoreRow>> {
        let stmt = Self::stmt(
            "SELECT search_id, novelty_score, citation_velocity_score, recency_score, \
             overall_score, computed_at FROM opportunity_scores WHERE search_id = $1",
            [search_id.into()],
        );
        Ok(ScoreQueryRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(|r| OpportunityScoreRow {
                search_id: r.search_id,
                novelty: r.novelty_score,
                citation_velocity: r.citation_velocity_score,
                recency: r.recency_score,
                overall: r.overall_score,
                computed_at: r.computed_at,
            }))
    }

    async fn set_cluster_labels(&self, assignments: &[(i64, i32)]) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        for &(article_id, label) in assignments {
            txn.execute(Self::stmt(
                "UPDATE article_vectors SET cluster_label = $2 WHERE article_id = $1",
                [article_id.into(), label.into()],
            ))
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn upsert_cluster(&self, cluster: &ClusterRow) -> StoreResult<()> {
        self.db
            .execute(Self::stmt(
                r#"
                INSERT INTO clusters (cluster_label, centroid, size, velocity, last_updated)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (cluster_label) DO UPDATE SET
                    centroid = EXCLUDED.centroid,
                    size = EXCLUDED.size,
                    velocity = EXCLUDED.velocity,
                    last_updated = EXCLUDED.last_updated
                "#,
                [
                    cluster.label.into(),
                    cluster.centroid.clone().into(),
                    cluster.size.into(),
                    cluster.velocity.into(),
                    cluster.last_updated.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    async fn delete_clusters_except(&self, labels: &[i32]) -> StoreResult<()> {
        if labels.is_empty() {
            self.db.execute_unprepared("DELETE FROM clusters").await?;
        } else {
            self.db
                .execute(Self::stmt(
                    "DELETE FROM clusters WHERE NOT (cluster_label = ANY($1))",
                    [labels.to_vec().into()],
                ))
                .await?;
        }
        Ok(())
    }

    async fn cluster_rows(&self) -> StoreResult<Vec<ClusterRow>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT cluster_label, centroid, size, velocity, last_updated FROM clusters \
             ORDER BY cluster_label",
        );
        let rows = ClusterQueryRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|r| ClusterRow {
                label: r.cluster_label,
                centroid: r.centroid,
                size: r.size,
                velocity: r.velocity,
                last_updated: r.last_updated,
            })
            .collect())
    }
}
