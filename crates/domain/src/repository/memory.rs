use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{EventId, OrderId, Version};
use tokio::sync::RwLock;

use super::{AppliedTransition, OrderRepository, Result, TransitionWrite};
use crate::error::RepositoryError;
use crate::order::{Order, OrderState};

#[derive(Default)]
struct Store {
    orders: HashMap<OrderId, Order>,
    transitions: HashMap<EventId, AppliedTransition>,
}

/// In-memory order repository for tests and single-node deployments.
///
/// The compare-and-set runs under the store's write lock, which gives the
/// same guarantee as the conditional `UPDATE` in PostgreSQL. Orders and
/// their transition records share that lock, so they never disagree.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    store: Arc<RwLock<Store>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.store.read().await.orders.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory order repository switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order_id: OrderId) -> Result<Order> {
        self.check_available()?;
        let mut store = self.store.write().await;
        if store.orders.contains_key(&order_id) {
            return Err(RepositoryError::AlreadyExists(order_id));
        }

        let order = Order::new(order_id, Utc::now());
        store.orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.check_available()?;
        Ok(self.store.read().await.orders.get(&order_id).cloned())
    }

    async fn apply_transition(
        &self,
        order_id: OrderId,
        expected_version: Version,
        new_state: OrderState,
        event_id: &EventId,
    ) -> Result<TransitionWrite> {
        self.check_available()?;
        let mut guard = self.store.write().await;
        let store = &mut *guard;

        if store.transitions.contains_key(event_id) {
            return Err(RepositoryError::DuplicateTransition(event_id.clone()));
        }
        let current = store
            .orders
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound(order_id))?;

        if current.version() != expected_version {
            return Ok(TransitionWrite::VersionConflict {
                actual: current.version(),
            });
        }

        *current = current.transitioned(new_state, Utc::now());
        store.transitions.insert(
            event_id.clone(),
            AppliedTransition {
                event_id: event_id.clone(),
                order_id,
                state: current.state(),
                version: current.version(),
                applied_at: current.updated_at(),
            },
        );
        Ok(TransitionWrite::Applied(current.clone()))
    }

    async fn applied_transition(&self, event_id: &EventId) -> Result<Option<AppliedTransition>> {
        self.check_available()?;
        Ok(self.store.read().await.transitions.get(event_id).cloned())
    }

    async fn transitions(&self, order_id: OrderId) -> Result<Vec<AppliedTransition>> {
        self.check_available()?;
        let mut transitions: Vec<_> = self
            .store
            .read()
            .await
            .transitions
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        transitions.sort_by_key(|t| t.version);
        Ok(transitions)
    }
}
