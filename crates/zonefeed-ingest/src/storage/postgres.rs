//! PostgreSQL store

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use zonefeed_common::types::{DownloadLog, ZoneRecord};

use super::{sanitize_field, Result, StoreFactory, ZoneStore};

/// Rows per INSERT statement; 6 binds per row stays under the 65,535 limit
const INSERT_CHUNK_SIZE: usize = 5_000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS zone_records (
    domain_name   TEXT NOT NULL,
    tld           TEXT NOT NULL,
    record_type   TEXT NOT NULL,
    record_data   TEXT NOT NULL,
    ttl           BIGINT NOT NULL,
    download_date DATE NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS zone_records_logical_key
    ON zone_records (tld, download_date, md5(domain_name || E'\x1f' || record_type || E'\x1f' || record_data));

CREATE INDEX IF NOT EXISTS zone_records_domain ON zone_records (domain_name);

CREATE TABLE IF NOT EXISTS download_logs (
    id                     BIGSERIAL PRIMARY KEY,
    tld                    TEXT NOT NULL,
    file_size              BIGINT NOT NULL,
    records_count          BIGINT NOT NULL,
    download_duration_secs BIGINT NOT NULL,
    parse_duration_secs    BIGINT NOT NULL,
    status                 TEXT NOT NULL,
    error_message          TEXT,
    started_at             TIMESTAMPTZ NOT NULL,
    completed_at           TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS download_logs_tld ON download_logs (tld, started_at DESC);

CREATE TABLE IF NOT EXISTS settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Storage handle backed by a connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Database schema is up to date");
        Ok(())
    }

    async fn insert_chunk(&self, records: &[ZoneRecord]) -> Result<u64> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO zone_records (domain_name, tld, record_type, record_data, ttl, download_date) ",
        );

        query_builder.push_values(records.iter(), |mut b, record| {
            b.push_bind(sanitize_field(&record.domain_name).into_owned())
                .push_bind(sanitize_field(&record.tld).into_owned())
                .push_bind(record.record_type.as_str())
                .push_bind(sanitize_field(&record.record_data).into_owned())
                .push_bind(i64::from(record.ttl))
                .push_bind(record.download_date);
        });
        query_builder.push(" ON CONFLICT DO NOTHING");

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ZoneStore for PgStore {
    async fn insert_zone_records(&self, records: &[ZoneRecord]) -> Result<u64> {
        let mut inserted = 0u64;
        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            inserted += self.insert_chunk(chunk).await?;
        }
        Ok(inserted)
    }

    async fn log_download(&self, log: &DownloadLog) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO download_logs (
                tld, file_size, records_count, download_duration_secs,
                parse_duration_secs, status, error_message, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&log.tld)
        .bind(to_i64(log.file_size))
        .bind(to_i64(log.records_count))
        .bind(to_i64(log.download_duration_secs))
        .bind(to_i64(log.parse_duration_secs))
        .bind(log.status.as_str())
        .bind(log.error_message.as_deref().map(|m| sanitize_field(m).into_owned()))
        .bind(log.started_at)
        .bind(log.completed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_records_for_tld(&self, tld: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM zone_records WHERE tld = $1")
            .bind(tld)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Hands out [`PgStore`] handles over one shared pool
#[derive(Clone)]
pub struct PgStoreFactory {
    pool: PgPool,
}

impl PgStoreFactory {
    pub fn new(store: &PgStore) -> Self {
        Self {
            pool: store.pool.clone(),
        }
    }
}

#[async_trait]
impl StoreFactory for PgStoreFactory {
    async fn connect(&self) -> Result<Box<dyn ZoneStore>> {
        // connect() fails while the database is unreachable
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(Box::new(PgStore::from_pool(self.pool.clone())))
    }
}
