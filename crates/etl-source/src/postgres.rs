//! PostgreSQL change source.
//!
//! Each open cursor owns one pooled connection inside a read-only
//! `REPEATABLE READ` transaction. The job query is declared as a
//! `NO SCROLL` server-side cursor and read with `FETCH FORWARD n`, so only
//! one batch is ever materialized on the client. Closing the cursor
//! commits the transaction and returns the connection to the pool.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use etl_types::{
    ChangeRow, DatabaseSettings, EntityKind, EntitySyncJob, GenreRef, GenreRow, MovieRow,
    PersonRef, PersonRow,
};

use crate::cursor::{BatchCursor, ChangeSource};
use crate::error::SourceError;
use crate::queries::extraction_query;

const CURSOR_NAME: &str = "etl_fetcher";

/// Change source backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgChangeSource {
    pool: PgPool,
}

impl PgChangeSource {
    /// Build a lazily connecting pool.
    ///
    /// No connection is attempted here: an unreachable database surfaces as
    /// a [`SourceError::Connection`] on the first `open`, and is retried on
    /// every later pass.
    pub fn connect_lazy(settings: &DatabaseSettings) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.dbname)
            .username(&settings.user);
        if let Some(password) = &settings.password {
            options = options.password(password.expose_secret());
        }

        info!(
            host = %settings.host,
            port = settings.port,
            dbname = %settings.dbname,
            "Configured relational source"
        );

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(settings.connect_timeout())
            .idle_timeout(Some(Duration::from_secs(300)))
            .connect_lazy_with(options);

        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), SourceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn open(
        &self,
        job: &EntitySyncJob,
        since: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchCursor>, SourceError> {
        let batch_size = batch_size.max(1);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            CURSOR_NAME,
            extraction_query(job.entity())
        );
        sqlx::query(&declare)
            .bind(since)
            .execute(&mut *tx)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        debug!(
            job = %job.entity(),
            since = %since,
            batch_size = batch_size,
            "Declared server-side cursor"
        );

        Ok(Box::new(PgBatchCursor {
            entity: job.entity(),
            tx: Some(tx),
            fetch_sql: fetch_statement(batch_size),
            batch_size,
            exhausted: false,
        }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

fn fetch_statement(batch_size: usize) -> String {
    format!("FETCH FORWARD {} FROM {}", batch_size, CURSOR_NAME)
}

struct PgBatchCursor {
    entity: EntityKind,
    tx: Option<Transaction<'static, Postgres>>,
    fetch_sql: String,
    batch_size: usize,
    exhausted: bool,
}

#[async_trait]
impl BatchCursor for PgBatchCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<ChangeRow>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        let tx = self.tx.as_mut().ok_or(SourceError::Closed)?;

        let rows = sqlx::query(&self.fetch_sql)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        // A short fetch means the server has nothing left
        if rows.len() < self.batch_size {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let batch = rows
            .iter()
            .map(|row| decode_row(self.entity, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.exhausted = true;
        if let Some(mut tx) = self.tx.take() {
            sqlx::query(&format!("CLOSE {}", CURSOR_NAME))
                .execute(&mut *tx)
                .await
                .map_err(|e| SourceError::Query(e.to_string()))?;
            tx.commit()
                .await
                .map_err(|e| SourceError::Query(e.to_string()))?;
            debug!(job = %self.entity, "Closed server-side cursor");
        }
        Ok(())
    }
}

fn decode_row(entity: EntityKind, row: &PgRow) -> Result<ChangeRow, SourceError> {
    match entity {
        EntityKind::Movie => Ok(ChangeRow::Movie(MovieRow {
            id: column(row, "id")?,
            title: column(row, "title")?,
            description: column(row, "description")?,
            imdb_rating: column(row, "imdb_rating")?,
            genres: json_column::<Vec<GenreRef>>(row, "genres")?,
            directors_names: column(row, "directors_names")?,
            actors_names: column(row, "actors_names")?,
            writers_names: column(row, "writers_names")?,
            directors: json_column::<Vec<PersonRef>>(row, "directors")?,
            actors: json_column::<Vec<PersonRef>>(row, "actors")?,
            writers: json_column::<Vec<PersonRef>>(row, "writers")?,
            last_change_date: column(row, "last_change_date")?,
        })),
        EntityKind::Genre => Ok(ChangeRow::Genre(GenreRow {
            id: column(row, "id")?,
            name: column(row, "name")?,
            description: column(row, "description")?,
            films: json_column(row, "films")?,
            last_change_date: column(row, "last_change_date")?,
        })),
        EntityKind::Person => Ok(ChangeRow::Person(PersonRow {
            id: column(row, "id")?,
            full_name: column(row, "full_name")?,
            films: json_column(row, "films")?,
            last_change_date: column(row, "last_change_date")?,
        })),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, SourceError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<T, _>(name)
        .map_err(|e| SourceError::decode(name, e))
}

fn json_column<T>(row: &PgRow, name: &str) -> Result<T, SourceError>
where
    T: DeserializeOwned,
{
    let Json(value) = column::<Json<T>>(row, name)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_statement() {
        assert_eq!(fetch_statement(100), "FETCH FORWARD 100 FROM etl_fetcher");
    }

    #[tokio::test]
    async fn test_open_fails_when_unreachable() {
        let settings = DatabaseSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let source = PgChangeSource::connect_lazy(&settings);
        let job = EntitySyncJob::new(EntityKind::Movie);

        let result = source.open(&job, Utc::now(), 10).await;
        assert!(matches!(result, Err(SourceError::Connection(_))));
        assert!(source.ping().await.is_err());
    }
}
