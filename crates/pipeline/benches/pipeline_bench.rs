use std::sync::Arc;

use common::OrderId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::OrderRepository;
use event_store::InboundEvent;
use pipeline::{EventProcessor, InMemoryBackend, PipelineConfig, RetryPolicy, TracingNotificationSink};
use serde_json::json;

fn payment_succeeded(event_id: String, order_id: OrderId) -> InboundEvent {
    InboundEvent::new(
        event_id,
        "payment_succeeded",
        Some(order_id),
        json!({"payment_intent_id": "pi_bench", "amount_cents": 12500, "currency": "eur"}),
    )
}

fn processor() -> Arc<EventProcessor<InMemoryBackend>> {
    Arc::new(EventProcessor::in_memory(
        Arc::new(TracingNotificationSink),
        PipelineConfig::default(),
    ))
}

fn bench_first_delivery(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let processor = processor();
    let mut n = 0u64;

    c.bench_function("pipeline/first_delivery", |b| {
        b.iter(|| {
            n += 1;
            let event_id = format!("evt_first_{n}");
            rt.block_on(async {
                let order_id = OrderId::new();
                processor.orders().create(order_id).await.unwrap();
                processor
                    .process(payment_succeeded(event_id, order_id))
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_duplicate_delivery(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let processor = processor();
    let order_id = OrderId::new();
    rt.block_on(async {
        processor.orders().create(order_id).await.unwrap();
        processor
            .process(payment_succeeded("evt_dup".to_string(), order_id))
            .await
            .unwrap();
    });

    c.bench_function("pipeline/duplicate_delivery", |b| {
        b.iter(|| {
            rt.block_on(
                processor.process(payment_succeeded("evt_dup".to_string(), order_id)),
            )
            .unwrap()
        });
    });
}

fn bench_contended_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = PipelineConfig {
        retry: RetryPolicy::new(0, Default::default(), Default::default()),
        ..PipelineConfig::default()
    };
    let processor = Arc::new(EventProcessor::in_memory(
        Arc::new(TracingNotificationSink),
        config,
    ));
    let mut n = 0u64;

    c.bench_function("pipeline/contended_order_8_events", |b| {
        b.iter(|| {
            n += 1;
            let round = n;
            rt.block_on(async {
                let order_id = OrderId::new();
                processor.orders().create(order_id).await.unwrap();

                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        let processor = processor.clone();
                        tokio::spawn(async move {
                            processor
                                .process(payment_succeeded(format!("evt_{round}_{i}"), order_id))
                                .await
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_first_delivery,
    bench_duplicate_delivery,
    bench_contended_order
);
criterion_main!(benches);
