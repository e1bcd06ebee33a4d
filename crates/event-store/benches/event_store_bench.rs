use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{EventId, EventLog, InMemoryEventLog, InboundEvent, OrderId};

fn make_event(event_id: String) -> InboundEvent {
    InboundEvent::new(
        event_id,
        "payment_succeeded",
        Some(OrderId::new()),
        serde_json::json!({
            "payment_intent_id": "pi_bench",
            "amount_cents": 12500,
            "currency": "eur"
        }),
    )
}

fn bench_record_first_seen(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = InMemoryEventLog::new();
    let mut n = 0u64;

    c.bench_function("event_store/record_first_seen", |b| {
        b.iter(|| {
            n += 1;
            rt.block_on(log.record(make_event(format!("evt_{n}"))))
                .unwrap()
        });
    });
}

fn bench_record_duplicate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = InMemoryEventLog::new();
    rt.block_on(log.record(make_event("evt_dup".to_string())))
        .unwrap();

    c.bench_function("event_store/record_duplicate", |b| {
        b.iter(|| {
            rt.block_on(log.record(make_event("evt_dup".to_string())))
                .unwrap()
        });
    });
}

fn bench_claim_and_settle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = InMemoryEventLog::new();
    let lease = Duration::from_secs(60);
    let mut n = 0u64;

    c.bench_function("event_store/record_claim_apply", |b| {
        b.iter(|| {
            n += 1;
            let event_id = EventId::new(format!("evt_settle_{n}"));
            rt.block_on(async {
                log.record(make_event(event_id.as_str().to_string()))
                    .await
                    .unwrap();
                log.claim(&event_id, lease).await.unwrap();
                log.mark_applied(&event_id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_record_first_seen,
    bench_record_duplicate,
    bench_claim_and_settle
);
criterion_main!(benches);
