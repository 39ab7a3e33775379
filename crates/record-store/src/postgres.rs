use async_trait::async_trait;
use common::CorrelationId;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::record::{OrchestrationRecord, RecordSnapshot, RecordVersion, SagaStatus};
use crate::store::{CasOutcome, RecordStore, RecordStream, validate_transition};
use crate::{RecordStoreError, Result};

/// Batch size for the keyset-paginated `scan_all` stream.
const SCAN_BATCH_SIZE: i64 = 256;

/// PostgreSQL-backed record store implementation.
///
/// The compare-and-swap is a single conditional `UPDATE` keyed on the
/// correlation ID and the version read by the caller; a lost race simply
/// matches zero rows.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a new PostgreSQL record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_snapshot(row: &PgRow) -> Result<RecordSnapshot> {
        let status_str: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status_str)
            .ok_or(RecordStoreError::UnknownStatus(status_str))?;

        Ok(RecordSnapshot::new(
            OrchestrationRecord {
                correlation_id: CorrelationId::new(row.try_get::<String, _>("correlation_id")?),
                status,
                expires_at: row.try_get("expires_at")?,
            },
            RecordVersion::new(row.try_get("version")?),
        ))
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create(&self, record: OrchestrationRecord) -> Result<()> {
        // Upsert; bumping the version on conflict invalidates any snapshot
        // taken of the stale record.
        sqlx::query(
            r#"
            INSERT INTO orchestration_records (correlation_id, status, expires_at, version)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (correlation_id) DO UPDATE
            SET status = EXCLUDED.status,
                expires_at = EXCLUDED.expires_at,
                version = orchestration_records.version + 1
            "#,
        )
        .bind(record.correlation_id.as_str())
        .bind(record.status.as_str())
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            correlation_id = %record.correlation_id,
            status = %record.status,
            "orchestration record upserted"
        );
        Ok(())
    }

    async fn get(&self, id: &CorrelationId) -> Result<Option<RecordSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT correlation_id, status, expires_at, version
            FROM orchestration_records
            WHERE correlation_id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected: &RecordSnapshot,
        next: OrchestrationRecord,
    ) -> Result<CasOutcome> {
        validate_transition(expected, &next)?;

        let row = sqlx::query(
            r#"
            UPDATE orchestration_records
            SET status = $3, expires_at = $4, version = version + 1
            WHERE correlation_id = $1 AND version = $2
            RETURNING correlation_id, status, expires_at, version
            "#,
        )
        .bind(expected.correlation_id().as_str())
        .bind(expected.version.as_i64())
        .bind(next.status.as_str())
        .bind(next.expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(CasOutcome::Updated(Self::row_to_snapshot(&row)?));
        }

        // Zero rows matched: either the version moved or the record is gone.
        match self.get(expected.correlation_id()).await? {
            Some(_) => Ok(CasOutcome::Conflict),
            None => Ok(CasOutcome::NotFound),
        }
    }

    async fn delete(&self, id: &CorrelationId) -> Result<()> {
        sqlx::query("DELETE FROM orchestration_records WHERE correlation_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_all(&self) -> Result<RecordStream> {
        use futures_util::{TryStreamExt, stream};

        // Keyset pagination keeps the enumeration lazy and restartable
        // without holding a server-side cursor across await points.
        let cursor = ScanCursor {
            pool: self.pool.clone(),
            after: None,
            done: false,
        };

        let stream = stream::try_unfold(cursor, |mut cursor| async move {
            match cursor.next_batch().await? {
                Some(batch) => {
                    let items = stream::iter(batch.into_iter().map(Ok::<_, RecordStoreError>));
                    Ok::<_, RecordStoreError>(Some((items, cursor)))
                }
                None => Ok(None),
            }
        })
        .try_flatten();

        Ok(Box::pin(stream))
    }
}

struct ScanCursor {
    pool: PgPool,
    after: Option<String>,
    done: bool,
}

impl ScanCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<RecordSnapshot>>> {
        if self.done {
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"
            SELECT correlation_id, status, expires_at, version
            FROM orchestration_records
            WHERE ($1::TEXT IS NULL OR correlation_id > $1)
            ORDER BY correlation_id
            LIMIT $2
            "#,
        )
        .bind(self.after.as_deref())
        .bind(SCAN_BATCH_SIZE)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let batch: Vec<RecordSnapshot> = rows
            .iter()
            .map(Self::row_to_snapshot_row)
            .collect::<Result<_>>()?;

        self.after = batch
            .last()
            .map(|snapshot| snapshot.correlation_id().to_string());
        if (rows.len() as i64) < SCAN_BATCH_SIZE {
            self.done = true;
        }

        Ok(Some(batch))
    }

    fn row_to_snapshot_row(row: &PgRow) -> Result<RecordSnapshot> {
        PostgresRecordStore::row_to_snapshot(row)
    }
}
