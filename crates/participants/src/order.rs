//! Order participant: forward-path order creation and its compensator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use channel::{CompensationMessage, EventChannel};
use chrono::{DateTime, Utc};
use common::CorrelationId;
use idempotency::IdempotencyGuard;
use orchestrator::consumer::{HandlerError, MessageHandler};
use orchestrator::SagaInitiator;
use record_store::RecordStore;
use uuid::Uuid;

use crate::money::Money;
use crate::payment::{ChargeRequest, PaymentGateway};
use crate::{ParticipantError, Result};

/// An order row, keyed by the saga's correlation ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: Uuid,
    pub correlation_id: CorrelationId,
    pub product_id: String,
    pub account_id: String,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

/// A client request to place an order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Client-supplied request ID; becomes the saga's correlation ID.
    pub correlation_id: CorrelationId,
    pub product_id: String,
    pub account_id: String,
    pub amount: Money,
}

/// The order participant's local transactional store.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Returns true if the product exists in the catalog.
    async fn product_exists(&self, product_id: &str) -> Result<bool>;

    /// Inserts an order row.
    async fn insert_order(&self, order: Order) -> Result<()>;

    /// Removes the order row for a correlation ID within a local
    /// transaction. Returns false if no row existed; that is "already
    /// compensated", not an error.
    async fn remove_order(&self, id: &CorrelationId) -> Result<bool>;

    /// Fetches the order row for a correlation ID.
    async fn get_order(&self, id: &CorrelationId) -> Result<Option<Order>>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    products: HashSet<String>,
    orders: HashMap<CorrelationId, Order>,
    fail_on_remove: bool,
}

/// In-memory order store for testing and local runs.
///
/// The single lock stands in for the participant's local transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product to the catalog.
    pub fn add_product(&self, product_id: impl Into<String>) {
        self.state.write().unwrap().products.insert(product_id.into());
    }

    /// Returns the number of order rows.
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Configures `remove_order` to fail until cleared.
    pub fn set_fail_on_remove(&self, fail: bool) {
        self.state.write().unwrap().fail_on_remove = fail;
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn product_exists(&self, product_id: &str) -> Result<bool> {
        Ok(self.state.read().unwrap().products.contains(product_id))
    }

    async fn insert_order(&self, order: Order) -> Result<()> {
        self.state
            .write()
            .unwrap()
            .orders
            .insert(order.correlation_id.clone(), order);
        Ok(())
    }

    async fn remove_order(&self, id: &CorrelationId) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_remove {
            return Err(ParticipantError::Store("order table unavailable".to_string()));
        }
        Ok(state.orders.remove(id).is_some())
    }

    async fn get_order(&self, id: &CorrelationId) -> Result<Option<Order>> {
        Ok(self.state.read().unwrap().orders.get(id).cloned())
    }
}

/// Forward-path order service.
///
/// Places an order under saga protection: the orchestration record is
/// opened before any local side effect and cleared only once the local
/// insert and the remote charge have both committed.
pub struct OrderService<S, G, P, R, C> {
    store: S,
    guard: G,
    gateway: P,
    initiator: SagaInitiator<R, C>,
    claim_ttl: Duration,
}

impl<S, G, P, R, C> OrderService<S, G, P, R, C>
where
    S: OrderStore,
    G: IdempotencyGuard,
    P: PaymentGateway,
    R: RecordStore,
    C: EventChannel,
{
    /// Creates a new order service.
    pub fn new(
        store: S,
        guard: G,
        gateway: P,
        initiator: SagaInitiator<R, C>,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            store,
            guard,
            gateway,
            initiator,
            claim_ttl,
        }
    }

    /// Places an order: de-duplicates the request, starts the saga, inserts
    /// the order row and charges the payment, then closes the saga.
    ///
    /// Any failure after the record exists forces an immediate rollback
    /// instead of waiting for the expiration scanner; the caller still sees
    /// the original error.
    #[tracing::instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    pub async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        if !self
            .guard
            .claim(request.correlation_id.as_str(), self.claim_ttl)
            .await?
        {
            return Err(ParticipantError::DuplicateRequest(
                request.correlation_id.to_string(),
            ));
        }

        self.initiator.start(&request.correlation_id).await?;

        match self.execute(&request).await {
            Ok(order) => {
                self.initiator.finish(&request.correlation_id).await?;
                metrics::counter!("orders_placed_total").increment(1);
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(error = %e, "forward path failed, forcing rollback");
                self.initiator.force_rollback(&request.correlation_id).await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, request: &OrderRequest) -> Result<Order> {
        if !self.store.product_exists(&request.product_id).await? {
            return Err(ParticipantError::ProductNotFound(request.product_id.clone()));
        }

        let order = Order {
            order_id: Uuid::new_v4(),
            correlation_id: request.correlation_id.clone(),
            product_id: request.product_id.clone(),
            account_id: request.account_id.clone(),
            amount: request.amount,
            created_at: Utc::now(),
        };
        self.store.insert_order(order.clone()).await?;

        self.gateway
            .charge(ChargeRequest {
                correlation_id: request.correlation_id.clone(),
                account_id: request.account_id.clone(),
                product_id: request.product_id.clone(),
                amount: request.amount,
            })
            .await?;

        Ok(order)
    }
}

/// Compensator for the order participant.
///
/// Consumes the order rollback destination and deletes the order row,
/// guarded against redelivery by a namespaced idempotency claim.
pub struct OrderCompensator<S, G> {
    store: S,
    guard: G,
    claim_ttl: Duration,
}

impl<S, G> OrderCompensator<S, G>
where
    S: OrderStore,
    G: IdempotencyGuard,
{
    /// Creates a new compensator.
    pub fn new(store: S, guard: G, claim_ttl: Duration) -> Self {
        Self {
            store,
            guard,
            claim_ttl,
        }
    }

    fn claim_key(id: &CorrelationId) -> String {
        format!("rollback:order:{id}")
    }
}

#[async_trait]
impl<S, G> MessageHandler for OrderCompensator<S, G>
where
    S: OrderStore + 'static,
    G: IdempotencyGuard + 'static,
{
    fn name(&self) -> &'static str {
        "order_compensator"
    }

    #[tracing::instrument(skip(self), fields(correlation_id = %message.correlation_id))]
    async fn handle(&self, message: CompensationMessage) -> std::result::Result<(), HandlerError> {
        let id = &message.correlation_id;
        let key = Self::claim_key(id);

        if !self.guard.claim(&key, self.claim_ttl).await? {
            tracing::debug!("compensation already applied, absorbing redelivery");
            return Ok(());
        }

        match self.store.remove_order(id).await {
            Ok(removed) => {
                if removed {
                    metrics::counter!("order_compensations_total").increment(1);
                    tracing::info!("order row removed");
                } else {
                    tracing::debug!("no order row, already compensated");
                }
                Ok(())
            }
            Err(e) => {
                // Free the claim so the redelivery is not blocked until the
                // TTL runs out.
                if let Err(release_err) = self.guard.release(&key).await {
                    tracing::warn!(error = %release_err, "failed to release claim");
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idempotency::InMemoryIdempotencyGuard;

    const TTL: Duration = Duration::from_secs(60);

    fn order(id: &str) -> Order {
        Order {
            order_id: Uuid::new_v4(),
            correlation_id: CorrelationId::new(id),
            product_id: "widget".to_string(),
            account_id: "acct-1".to_string(),
            amount: Money::from_cents(1_000),
            created_at: Utc::now(),
        }
    }

    fn compensator(
        store: InMemoryOrderStore,
    ) -> OrderCompensator<InMemoryOrderStore, InMemoryIdempotencyGuard> {
        OrderCompensator::new(store, InMemoryIdempotencyGuard::new(), TTL)
    }

    fn message(id: &str) -> CompensationMessage {
        CompensationMessage::new(CorrelationId::new(id))
    }

    #[tokio::test]
    async fn removes_order_row_once() {
        let store = InMemoryOrderStore::new();
        store.insert_order(order("abc")).await.unwrap();
        let compensator = compensator(store.clone());

        compensator.handle(message("abc")).await.unwrap();
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn replay_is_absorbed_by_the_claim() {
        let store = InMemoryOrderStore::new();
        store.insert_order(order("abc")).await.unwrap();
        let compensator = compensator(store.clone());

        for _ in 0..5 {
            compensator.handle(message("abc")).await.unwrap();
        }
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn missing_row_is_already_compensated() {
        let compensator = compensator(InMemoryOrderStore::new());
        compensator.handle(message("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn failure_releases_claim_for_retry() {
        let store = InMemoryOrderStore::new();
        store.insert_order(order("abc")).await.unwrap();
        store.set_fail_on_remove(true);
        let compensator = compensator(store.clone());

        assert!(compensator.handle(message("abc")).await.is_err());

        // The store heals; the redelivered message must get through even
        // though the first attempt claimed the key.
        store.set_fail_on_remove(false);
        compensator.handle(message("abc")).await.unwrap();
        assert_eq!(store.order_count(), 0);
    }
}
