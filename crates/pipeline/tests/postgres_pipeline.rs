//! End-to-end pipeline tests against PostgreSQL.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p pipeline --test postgres_pipeline
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{EventId, OrderId, Version};
use domain::{OrderRepository, OrderState};
use event_store::{EventLog, EventStatus, InboundEvent};
use pipeline::{
    AuditAction, AuditLog, EventProcessor, InMemoryNotificationSink, LockKey, NamedLock,
    Outcome, PipelineConfig, PostgresAdvisoryLock, PostgresBackend, RetryPolicy,
};
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_payment_events.sql"),
                include_str!("../../../migrations/002_create_orders.sql"),
                include_str!("../../../migrations/003_create_audit_log.sql"),
                include_str!("../../../migrations/004_create_order_transitions.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn connect(max_connections: u32) -> PgPool {
    let info = get_container_info().await;

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&info.connection_string)
        .await
        .unwrap()
}

async fn get_test_pool() -> PgPool {
    let pool = connect(20).await;

    sqlx::query("TRUNCATE TABLE payment_events, order_transitions, orders, audit_log")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
        lock_timeout: Duration::from_millis(500),
        ..PipelineConfig::default()
    }
}

async fn get_test_processor() -> (Arc<EventProcessor<PostgresBackend>>, PgPool) {
    let pool = get_test_pool().await;
    let processor = EventProcessor::postgres(
        pool.clone(),
        connect(8).await,
        Arc::new(InMemoryNotificationSink::new()),
        test_config(),
    );
    (Arc::new(processor), pool)
}

fn payment_succeeded(event_id: &str, order_id: OrderId) -> InboundEvent {
    InboundEvent::new(
        event_id,
        "payment_succeeded",
        Some(order_id),
        json!({"payment_intent_id": "pi_pg", "amount_cents": 1000, "currency": "eur"}),
    )
}

#[tokio::test]
#[serial]
async fn duplicate_delivery_applies_once() {
    let (processor, _pool) = get_test_processor().await;
    let order_id = OrderId::new();
    processor.orders().create(order_id).await.unwrap();

    let first = processor
        .process(payment_succeeded("evt_1", order_id))
        .await
        .unwrap();
    let second = processor
        .process(payment_succeeded("evt_1", order_id))
        .await
        .unwrap();

    assert_eq!(
        first,
        Outcome::Applied {
            state: Some(OrderState::Paid),
            version: Some(Version::new(1))
        }
    );
    assert_eq!(
        second,
        Outcome::Duplicate {
            status: EventStatus::Applied
        }
    );

    let audit = processor
        .audit_log()
        .for_event(&EventId::from("evt_1"))
        .await
        .unwrap();
    let actions: Vec<_> = audit.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![AuditAction::Applied, AuditAction::Duplicate]);
    assert_eq!(audit[0].resulting_state, Some(OrderState::Paid));
}

#[tokio::test]
#[serial]
async fn concurrent_redeliveries_apply_once() {
    let (processor, _pool) = get_test_processor().await;
    let order_id = OrderId::new();
    processor.orders().create(order_id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            processor
                .process(payment_succeeded("evt_1", order_id))
                .await
                .unwrap()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Outcome::Applied { .. }) {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let order = processor.orders().load(order_id).await.unwrap().unwrap();
    assert_eq!(order.version(), Version::new(1));
}

#[tokio::test]
#[serial]
async fn competing_events_serialize_on_the_order() {
    let (processor, _pool) = get_test_processor().await;
    let order_id = OrderId::new();
    processor.orders().create(order_id).await.unwrap();
    processor
        .process(payment_succeeded("evt_pay", order_id))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for (i, event_type) in ["order_cancelled", "handover_ready", "shipped"]
        .into_iter()
        .enumerate()
    {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            processor
                .process(InboundEvent::new(
                    format!("evt_{i}"),
                    event_type,
                    Some(order_id),
                    json!({}),
                ))
                .await
                .unwrap()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Outcome::Applied { .. }) {
            applied += 1;
        }
    }

    let order = processor.orders().load(order_id).await.unwrap().unwrap();
    assert_eq!(order.version(), Version::new(1 + applied));
    assert!(applied >= 1);
}

#[tokio::test]
#[serial]
async fn illegal_transition_is_rejected() {
    let (processor, _pool) = get_test_processor().await;
    let order_id = OrderId::new();
    processor.orders().create(order_id).await.unwrap();

    let outcome = processor
        .process(InboundEvent::new(
            "evt_ship",
            "shipped",
            Some(order_id),
            json!({}),
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Rejected { .. }));
    let stored = processor
        .events()
        .get(&EventId::from("evt_ship"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, EventStatus::Rejected);
    assert!(stored.error_message.is_some());

    let order = processor.orders().load(order_id).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::PendingPayment);
}

#[tokio::test]
#[serial]
async fn held_advisory_lock_schedules_retry() {
    let (processor, pool) = get_test_processor().await;
    let order_id = OrderId::new();
    processor.orders().create(order_id).await.unwrap();

    let lock = PostgresAdvisoryLock::new(pool);
    let held = lock
        .acquire(LockKey::for_order(order_id), Duration::from_secs(1))
        .await
        .unwrap();

    let outcome = processor
        .process(payment_succeeded("evt_1", order_id))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::RetryScheduled { retry_count: 1, .. }
    ));

    lock.release(held).await.unwrap();

    let retried = processor.retry(&EventId::from("evt_1")).await.unwrap();
    assert!(matches!(retried, Outcome::Applied { .. }));

    let audit = processor.audit_log().for_order(order_id).await.unwrap();
    let actions: Vec<_> = audit.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![AuditAction::LockTimeout, AuditAction::Applied]);
}

#[tokio::test]
#[serial]
async fn missing_order_exhausts_and_can_be_requeued() {
    let (processor, _pool) = get_test_processor().await;
    let order_id = OrderId::new();
    let event_id = EventId::from("evt_early");

    let first = processor
        .process(payment_succeeded("evt_early", order_id))
        .await
        .unwrap();
    assert!(matches!(first, Outcome::RetryScheduled { .. }));

    let mut last = first;
    for _ in 0..3 {
        last = processor.retry(&event_id).await.unwrap();
    }
    assert!(matches!(last, Outcome::Exhausted { retry_count: 3, .. }));

    let exhausted = processor.events().exhausted(10).await.unwrap();
    assert_eq!(exhausted.len(), 1);

    processor.orders().create(order_id).await.unwrap();
    let requeued = processor.requeue(&event_id).await.unwrap();
    assert_eq!(requeued.status, EventStatus::RetryScheduled);

    let outcome = processor.retry(&event_id).await.unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));

    let audit = processor.audit_log().for_event(&event_id).await.unwrap();
    let count = |action| audit.iter().filter(|r| r.action == action).count();
    assert_eq!(count(AuditAction::RetryScheduled), 3);
    assert_eq!(count(AuditAction::Exhausted), 1);
    assert_eq!(count(AuditAction::Requeued), 1);
    assert_eq!(count(AuditAction::Applied), 1);
}

#[tokio::test]
#[serial]
async fn lock_holders_cannot_starve_the_order_queries() {
    let pool = get_test_pool().await;
    let processor = Arc::new(EventProcessor::postgres(
        connect(2).await,
        connect(2).await,
        Arc::new(InMemoryNotificationSink::new()),
        PipelineConfig {
            lock_timeout: Duration::from_secs(10),
            ..test_config()
        },
    ));

    let mut order_ids = Vec::new();
    for _ in 0..12 {
        let order_id = OrderId::new();
        processor.orders().create(order_id).await.unwrap();
        order_ids.push(order_id);
    }

    let mut handles = Vec::new();
    for (i, order_id) in order_ids.iter().copied().enumerate() {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            processor
                .process(payment_succeeded(&format!("evt_{i}"), order_id))
                .await
        }));
    }

    let outcomes = tokio::time::timeout(Duration::from_secs(30), async {
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }
        outcomes
    })
    .await
    .expect("processing stalled on the connection pool");

    assert!(
        outcomes
            .iter()
            .all(|outcome| matches!(outcome, Outcome::Applied { .. }))
    );
    for order_id in order_ids {
        let order = processor.orders().load(order_id).await.unwrap().unwrap();
        assert_eq!(order.state(), OrderState::Paid);
    }
    pool.close().await;
}

#[tokio::test]
#[serial]
async fn transition_is_recorded_against_its_event() {
    let (processor, _pool) = get_test_processor().await;
    let order_id = OrderId::new();
    processor.orders().create(order_id).await.unwrap();

    processor
        .process(payment_succeeded("evt_pay", order_id))
        .await
        .unwrap();
    processor
        .process(InboundEvent::new(
            "evt_late_fail",
            "payment_failed",
            Some(order_id),
            json!({"payment_intent_id": "pi_pg"}),
        ))
        .await
        .unwrap();

    let transitions = processor.orders().transitions(order_id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].event_id, EventId::from("evt_pay"));
    assert_eq!(transitions[0].state, OrderState::Paid);
    assert_eq!(transitions[0].version, Version::new(1));

    let order = processor.orders().load(order_id).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::Paid);
}
