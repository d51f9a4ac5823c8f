//! PostgreSQL implementation of the index store.
//!
//! Uses runtime queries (`sqlx::query`) since table names are configurable.
//! Table names are validated as plain identifiers before being interpolated.
//!
//! Schema:
//!
//! ```sql
//! CREATE TABLE parquet_index (
//!     id BIGSERIAL PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     partition TEXT NOT NULL,
//!     path TEXT NOT NULL UNIQUE,
//!     row_count BIGINT NOT NULL,
//!     size_bytes BIGINT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE books_index (
//!     id BIGSERIAL PRIMARY KEY,
//!     isbn TEXT NOT NULL,
//!     pages BIGINT NOT NULL,
//!     author TEXT NOT NULL,
//!     pub_date DATE NOT NULL,
//!     pid BIGINT NOT NULL,
//!     fingerprint BIGINT NOT NULL,
//!     snapshot_id BIGINT NOT NULL REFERENCES parquet_index (id) ON DELETE CASCADE
//! );
//! ```

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use glacier_observability::ErrorKind;
use glacier_resources::{PartitionName, Snapshot, SnapshotId, SnapshotRef};
use snafu::ResultExt;
use sqlx::{
    Postgres, QueryBuilder, Row,
    postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow},
};
use tracing::{debug, info};

use crate::{
    entry::IndexEntry,
    error::{DatabaseSnafu, IndexStoreError, InvalidDataSnafu, Result},
    store::{IndexStore, IndexTables, RegisteredSnapshot, validate_table_name},
};

/// Rows per INSERT statement, 7 bind parameters each.
const INSERT_CHUNK_ROWS: usize = 1_000;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

pub struct PostgresIndexStore {
    pool: PgPool,
}

impl PostgresIndexStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(Arc::new)
            .context(DatabaseSnafu { operation: "parse url" })?;
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(Arc::new)
            .context(DatabaseSnafu { operation: "connect" })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables if they don't exist yet.
    pub async fn ensure_tables(&self, tables: &IndexTables) -> Result<()> {
        validate_table_name(&tables.snapshots)?;
        validate_table_name(&tables.entries)?;

        let snapshots = &tables.snapshots;
        let entries = &tables.entries;

        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {snapshots} (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL,
                    partition TEXT NOT NULL,
                    path TEXT NOT NULL UNIQUE,
                    row_count BIGINT NOT NULL,
                    size_bytes BIGINT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {entries} (
                    id BIGSERIAL PRIMARY KEY,
                    isbn TEXT NOT NULL,
                    pages BIGINT NOT NULL,
                    author TEXT NOT NULL,
                    pub_date DATE NOT NULL,
                    pid BIGINT NOT NULL,
                    fingerprint BIGINT NOT NULL,
                    snapshot_id BIGINT NOT NULL REFERENCES {snapshots} (id) ON DELETE CASCADE
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {entries}_snapshot_id_idx ON {entries} (snapshot_id)"
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(Arc::new)
                .context(DatabaseSnafu {
                    operation: "create table",
                })?;
        }

        info!(%snapshots, %entries, "Index tables ready");

        Ok(())
    }
}

#[async_trait]
impl IndexStore for PostgresIndexStore {
    async fn register_snapshot(&self, table: &str, snapshot: &Snapshot) -> Result<SnapshotRef> {
        validate_table_name(table)?;

        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(&format!(
            "INSERT INTO {table} (name, partition, path, row_count, size_bytes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (path) DO UPDATE SET path = EXCLUDED.path
             RETURNING id"
        ))
        .bind(&snapshot.name)
        .bind(snapshot.partition.as_str())
        .bind(&snapshot.path)
        .bind(snapshot.row_count as i64)
        .bind(snapshot.size_bytes as i64)
        .bind(snapshot.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Arc::new)
        .context(DatabaseSnafu {
            operation: "register snapshot",
        })?;

        let id = SnapshotId(get(table, &row, "id")?);
        debug!(table, %id, path = %snapshot.path, "Snapshot registered");

        Ok(SnapshotRef {
            id,
            path: snapshot.path.clone(),
        })
    }

    async fn append_rows(&self, table: &str, rows: &[IndexEntry]) -> Result<u64> {
        validate_table_name(table)?;

        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Arc::new)
            .context(DatabaseSnafu {
                operation: "begin transaction",
            })?;

        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} (isbn, pages, author, pub_date, pid, fingerprint, snapshot_id) "
            ));
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(&row.isbn)
                    .push_bind(row.pages)
                    .push_bind(&row.author)
                    .push_bind(row.pub_date)
                    .push_bind(row.pid)
                    .push_bind(row.fingerprint)
                    .push_bind(row.snapshot_id.0);
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(Arc::new)
                .context(DatabaseSnafu {
                    operation: "append rows",
                })?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(Arc::new)
            .context(DatabaseSnafu {
                operation: "commit",
            })?;

        Ok(inserted)
    }

    async fn list_snapshots(
        &self,
        table: &str,
        partition: &PartitionName,
    ) -> Result<Vec<RegisteredSnapshot>> {
        validate_table_name(table)?;

        let rows = sqlx::query(&format!(
            "SELECT id, name, partition, path, row_count, size_bytes, created_at
             FROM {table} WHERE partition = $1 ORDER BY path"
        ))
        .bind(partition.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Arc::new)
        .context(DatabaseSnafu {
            operation: "list snapshots",
        })?;

        rows.iter()
            .map(|row| snapshot_from_row(table, row))
            .collect()
    }

    async fn supersede(
        &self,
        tables: &IndexTables,
        sources: &[SnapshotId],
        replacement: SnapshotId,
    ) -> Result<u64> {
        validate_table_name(&tables.snapshots)?;
        validate_table_name(&tables.entries)?;

        let source_ids: Vec<i64> = sources
            .iter()
            .filter(|id| **id != replacement)
            .map(|id| id.0)
            .collect();

        if source_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Arc::new)
            .context(DatabaseSnafu {
                operation: "begin transaction",
            })?;

        let moved = sqlx::query(&format!(
            "UPDATE {} SET snapshot_id = $1 WHERE snapshot_id = ANY($2)",
            tables.entries
        ))
        .bind(replacement.0)
        .bind(&source_ids)
        .execute(&mut *tx)
        .await
        .map_err(Arc::new)
        .context(DatabaseSnafu {
            operation: "move index rows",
        })?
        .rows_affected();

        sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ANY($1)",
            tables.snapshots
        ))
        .bind(&source_ids)
        .execute(&mut *tx)
        .await
        .map_err(Arc::new)
        .context(DatabaseSnafu {
            operation: "delete snapshots",
        })?;

        tx.commit()
            .await
            .map_err(Arc::new)
            .context(DatabaseSnafu {
                operation: "commit",
            })?;

        Ok(moved)
    }

    async fn entries(&self, table: &str, snapshot: SnapshotId) -> Result<Vec<IndexEntry>> {
        validate_table_name(table)?;

        let rows = sqlx::query(&format!(
            "SELECT isbn, pages, author, pub_date, pid, fingerprint, snapshot_id
             FROM {table} WHERE snapshot_id = $1 ORDER BY id"
        ))
        .bind(snapshot.0)
        .fetch_all(&self.pool)
        .await
        .map_err(Arc::new)
        .context(DatabaseSnafu {
            operation: "list entries",
        })?;

        rows.iter()
            .map(|row| {
                Ok(IndexEntry {
                    isbn: get(table, row, "isbn")?,
                    pages: get(table, row, "pages")?,
                    author: get(table, row, "author")?,
                    pub_date: get::<NaiveDate>(table, row, "pub_date")?,
                    pid: get(table, row, "pid")?,
                    fingerprint: get(table, row, "fingerprint")?,
                    snapshot_id: SnapshotId(get(table, row, "snapshot_id")?),
                })
            })
            .collect()
    }
}

fn get<'r, T>(table: &str, row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|err| IndexStoreError::InvalidData {
        table: table.to_string(),
        message: format!("column {column}: {err}"),
    })
}

fn snapshot_from_row(table: &str, row: &PgRow) -> Result<RegisteredSnapshot> {
    let partition: String = get(table, row, "partition")?;
    let partition = PartitionName::new(partition).map_err(|err| IndexStoreError::InvalidData {
        table: table.to_string(),
        message: err.to_string(),
    })?;

    let row_count: i64 = get(table, row, "row_count")?;
    let size_bytes: i64 = get(table, row, "size_bytes")?;
    let created_at: DateTime<Utc> = get(table, row, "created_at")?;

    if row_count < 0 || size_bytes < 0 {
        return InvalidDataSnafu {
            table,
            message: "negative row count or size",
        }
        .fail();
    }

    Ok(RegisteredSnapshot {
        id: SnapshotId(get(table, row, "id")?),
        snapshot: Snapshot {
            name: get(table, row, "name")?,
            partition,
            path: get(table, row, "path")?,
            row_count: row_count as u64,
            size_bytes: size_bytes as u64,
            created_at,
        },
    })
}

/// Maps a database error to an error kind. Connection failures, serialization
/// failures, deadlocks, lock timeouts and cancellations are retryable.
pub(crate) fn classify(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
            ErrorKind::Temporary
        }
        sqlx::Error::Configuration(_) | sqlx::Error::Tls(_) => ErrorKind::Configuration,
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if code.starts_with("08") => ErrorKind::Temporary,
            Some("40001" | "40P01" | "55P03" | "57014" | "57P01" | "53300") => {
                ErrorKind::Temporary
            }
            Some("42P01" | "42703") => ErrorKind::Configuration,
            Some("23505") => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        },
        _ => ErrorKind::Internal,
    }
}
