use criterion::{Criterion, criterion_group, criterion_main};
use record_store::{
    CorrelationId, InMemoryRecordStore, OrchestrationRecord, RecordStore, SagaStatus,
};

fn make_record(id: &str) -> OrchestrationRecord {
    OrchestrationRecord::new(CorrelationId::new(id), SagaStatus::InProgress, 1_000)
}

fn bench_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("record_store/create", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryRecordStore::new();
                store.create(make_record("bench")).await.unwrap();
            });
        });
    });
}

fn bench_cas(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("record_store/compare_and_swap", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryRecordStore::new();
                store.create(make_record("bench")).await.unwrap();
                let snapshot = store
                    .get(&CorrelationId::new("bench"))
                    .await
                    .unwrap()
                    .unwrap();
                let next = snapshot.record.advanced(SagaStatus::Rollback, 2_000);
                store.compare_and_swap(&snapshot, next).await.unwrap();
            });
        });
    });
}

fn bench_scan_1000(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryRecordStore::new();
    rt.block_on(async {
        for i in 0..1_000 {
            store.create(make_record(&format!("saga-{i}"))).await.unwrap();
        }
    });

    c.bench_function("record_store/scan_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.scan_all().await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1_000);
            });
        });
    });
}

criterion_group!(benches, bench_create, bench_cas, bench_scan_1000);
criterion_main!(benches);
