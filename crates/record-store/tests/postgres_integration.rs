//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p record-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use futures_util::StreamExt;
use record_store::{
    CasOutcome, CorrelationId, OrchestrationRecord, PostgresRecordStore, RecordStore, SagaStatus,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for the schema
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_orchestration_records.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared table
async fn get_test_store() -> PostgresRecordStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orchestration_records")
        .execute(&pool)
        .await
        .unwrap();

    PostgresRecordStore::new(pool)
}

fn record(id: &str, status: SagaStatus, expires_at: i64) -> OrchestrationRecord {
    OrchestrationRecord::new(CorrelationId::new(id), status, expires_at)
}

#[tokio::test]
#[serial]
async fn create_get_delete_roundtrip() {
    let store = get_test_store().await;

    store
        .create(record("abc", SagaStatus::InProgress, 1_000))
        .await
        .unwrap();

    let snapshot = store.get(&CorrelationId::new("abc")).await.unwrap().unwrap();
    assert_eq!(snapshot.record.status, SagaStatus::InProgress);
    assert_eq!(snapshot.record.expires_at, 1_000);

    store.delete(&CorrelationId::new("abc")).await.unwrap();
    assert!(store.get(&CorrelationId::new("abc")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn cas_advances_and_bumps_version() {
    let store = get_test_store().await;

    store
        .create(record("abc", SagaStatus::InProgress, 1_000))
        .await
        .unwrap();
    let snapshot = store.get(&CorrelationId::new("abc")).await.unwrap().unwrap();

    let next = snapshot.record.advanced(SagaStatus::Rollback, 5_000);
    let outcome = store.compare_and_swap(&snapshot, next).await.unwrap();

    let CasOutcome::Updated(updated) = outcome else {
        panic!("expected Updated, got {outcome:?}");
    };
    assert_eq!(updated.record.status, SagaStatus::Rollback);
    assert_eq!(updated.version, snapshot.version.next());
}

#[tokio::test]
#[serial]
async fn cas_conflict_on_stale_snapshot() {
    let store = get_test_store().await;

    store
        .create(record("abc", SagaStatus::InProgress, 1_000))
        .await
        .unwrap();
    let snapshot = store.get(&CorrelationId::new("abc")).await.unwrap().unwrap();

    let next = snapshot.record.advanced(SagaStatus::Rollback, 2_000);
    assert!(store
        .compare_and_swap(&snapshot, next)
        .await
        .unwrap()
        .is_updated());

    // Retrying from the stale snapshot must lose.
    let next = snapshot.record.advanced(SagaStatus::Rollback, 3_000);
    let outcome = store.compare_and_swap(&snapshot, next).await.unwrap();
    assert_eq!(outcome, CasOutcome::Conflict);
}

#[tokio::test]
#[serial]
async fn cas_not_found_for_deleted_record() {
    let store = get_test_store().await;

    store
        .create(record("abc", SagaStatus::InProgress, 1_000))
        .await
        .unwrap();
    let snapshot = store.get(&CorrelationId::new("abc")).await.unwrap().unwrap();
    store.delete(&CorrelationId::new("abc")).await.unwrap();

    let next = snapshot.record.advanced(SagaStatus::Rollback, 2_000);
    let outcome = store.compare_and_swap(&snapshot, next).await.unwrap();
    assert_eq!(outcome, CasOutcome::NotFound);
}

#[tokio::test]
#[serial]
async fn concurrent_cas_single_winner() {
    let store = get_test_store().await;

    store
        .create(record("abc", SagaStatus::InProgress, 1_000))
        .await
        .unwrap();
    let snapshot = store.get(&CorrelationId::new("abc")).await.unwrap().unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let store = store.clone();
        let snapshot = snapshot.clone();
        handles.push(tokio::spawn(async move {
            let next = snapshot.record.advanced(SagaStatus::Rollback, 2_000 + i);
            store.compare_and_swap(&snapshot, next).await.unwrap()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_updated() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
#[serial]
async fn scan_all_streams_every_record() {
    let store = get_test_store().await;

    for i in 0..300 {
        store
            .create(record(
                &format!("saga-{i:04}"),
                SagaStatus::InProgress,
                1_000,
            ))
            .await
            .unwrap();
    }

    let mut stream = store.scan_all().await.unwrap();
    let mut count = 0;
    while let Some(result) = stream.next().await {
        result.unwrap();
        count += 1;
    }
    // More than one keyset batch.
    assert_eq!(count, 300);
}

#[tokio::test]
#[serial]
async fn upsert_overwrites_stale_record() {
    let store = get_test_store().await;

    store
        .create(record("abc", SagaStatus::InProgress, 1_000))
        .await
        .unwrap();
    store
        .create(record("abc", SagaStatus::InProgress, 9_000))
        .await
        .unwrap();

    let snapshot = store.get(&CorrelationId::new("abc")).await.unwrap().unwrap();
    assert_eq!(snapshot.record.expires_at, 9_000);
    assert!(snapshot.version.as_i64() > 1);
}
