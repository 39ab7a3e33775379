//! Payment participant: account charging and its compensator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use channel::CompensationMessage;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use idempotency::IdempotencyGuard;
use orchestrator::consumer::{HandlerError, MessageHandler};
use uuid::Uuid;

use crate::money::Money;
use crate::{ParticipantError, Result};

/// A committed charge, keyed by the saga's correlation ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub transaction_id: Uuid,
    pub correlation_id: CorrelationId,
    pub account_id: String,
    pub product_id: String,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

/// A request to charge an account on behalf of a saga.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub correlation_id: CorrelationId,
    pub account_id: String,
    pub product_id: String,
    pub amount: Money,
}

/// Result of reversing a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalOutcome {
    /// The ledger entry was removed and the amount credited back.
    Reversed { amount: Money },
    /// No ledger entry existed; the charge never landed or was already
    /// reversed.
    AlreadyReversed,
}

/// The payment participant's local transactional store.
///
/// Balance mutation and ledger mutation are a single atomic unit: a charge
/// either debits and records, or does neither.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Debits the account and records the ledger entry atomically.
    async fn apply_charge(&self, entry: LedgerEntry) -> Result<()>;

    /// Credits the amount back and removes the ledger entry atomically.
    async fn reverse_charge(&self, id: &CorrelationId) -> Result<ReversalOutcome>;

    /// Returns the current balance of an account.
    async fn balance(&self, account_id: &str) -> Result<Money>;

    /// Fetches the ledger entry for a correlation ID.
    async fn ledger_entry(&self, id: &CorrelationId) -> Result<Option<LedgerEntry>>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    accounts: HashMap<String, Money>,
    ledger: HashMap<CorrelationId, LedgerEntry>,
    fail_on_reverse: bool,
}

/// In-memory payment store for testing and local runs.
///
/// One lock covers both the accounts and the ledger, so every check is made
/// against the state that will be mutated.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an account with an initial balance.
    pub fn open_account(&self, account_id: impl Into<String>, balance: Money) {
        self.state
            .write()
            .unwrap()
            .accounts
            .insert(account_id.into(), balance);
    }

    /// Returns the number of ledger entries.
    pub fn ledger_len(&self) -> usize {
        self.state.read().unwrap().ledger.len()
    }

    /// Configures `reverse_charge` to fail until cleared.
    pub fn set_fail_on_reverse(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reverse = fail;
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn apply_charge(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.ledger.contains_key(&entry.correlation_id) {
            return Err(ParticipantError::DuplicateCharge(
                entry.correlation_id.to_string(),
            ));
        }
        let balance = state
            .accounts
            .get(&entry.account_id)
            .copied()
            .ok_or_else(|| ParticipantError::AccountNotFound(entry.account_id.clone()))?;
        if balance < entry.amount {
            return Err(ParticipantError::InsufficientFunds {
                account_id: entry.account_id.clone(),
                required: entry.amount,
                available: balance,
            });
        }
        // All checks passed; mutate both sides under the same lock.
        state
            .accounts
            .insert(entry.account_id.clone(), balance - entry.amount);
        state.ledger.insert(entry.correlation_id.clone(), entry);
        Ok(())
    }

    async fn reverse_charge(&self, id: &CorrelationId) -> Result<ReversalOutcome> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_reverse {
            return Err(ParticipantError::Store("ledger unavailable".to_string()));
        }
        let Some(entry) = state.ledger.remove(id) else {
            return Ok(ReversalOutcome::AlreadyReversed);
        };
        let balance = state
            .accounts
            .get(&entry.account_id)
            .copied()
            .ok_or_else(|| ParticipantError::AccountNotFound(entry.account_id.clone()))?;
        state
            .accounts
            .insert(entry.account_id.clone(), balance + entry.amount);
        Ok(ReversalOutcome::Reversed {
            amount: entry.amount,
        })
    }

    async fn balance(&self, account_id: &str) -> Result<Money> {
        self.state
            .read()
            .unwrap()
            .accounts
            .get(account_id)
            .copied()
            .ok_or_else(|| ParticipantError::AccountNotFound(account_id.to_string()))
    }

    async fn ledger_entry(&self, id: &CorrelationId) -> Result<Option<LedgerEntry>> {
        Ok(self.state.read().unwrap().ledger.get(id).cloned())
    }
}

/// Charging half of the payment participant, called from the forward path.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges an account, de-duplicated by correlation ID.
    async fn charge(&self, request: ChargeRequest) -> Result<LedgerEntry>;
}

/// Payment processor backing the forward path.
pub struct PaymentProcessor<S, G> {
    store: S,
    guard: G,
    claim_ttl: Duration,
}

impl<S, G> PaymentProcessor<S, G>
where
    S: PaymentStore,
    G: IdempotencyGuard,
{
    /// Creates a new processor.
    pub fn new(store: S, guard: G, claim_ttl: Duration) -> Self {
        Self {
            store,
            guard,
            claim_ttl,
        }
    }

    fn claim_key(id: &CorrelationId) -> String {
        format!("charge:{id}")
    }
}

#[async_trait]
impl<S, G> PaymentGateway for PaymentProcessor<S, G>
where
    S: PaymentStore,
    G: IdempotencyGuard,
{
    #[tracing::instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn charge(&self, request: ChargeRequest) -> Result<LedgerEntry> {
        if !self
            .guard
            .claim(&Self::claim_key(&request.correlation_id), self.claim_ttl)
            .await?
        {
            return Err(ParticipantError::DuplicateRequest(
                request.correlation_id.to_string(),
            ));
        }

        let entry = LedgerEntry {
            transaction_id: Uuid::new_v4(),
            correlation_id: request.correlation_id.clone(),
            account_id: request.account_id,
            product_id: request.product_id,
            amount: request.amount,
            created_at: Utc::now(),
        };
        self.store.apply_charge(entry.clone()).await?;
        metrics::counter!("charges_applied_total").increment(1);
        tracing::info!(amount = %entry.amount, "charge applied");
        Ok(entry)
    }
}

/// Compensator for the payment participant.
///
/// Consumes the payment rollback destination and reverses the charge,
/// guarded against redelivery by a namespaced idempotency claim.
pub struct PaymentCompensator<S, G> {
    store: S,
    guard: G,
    claim_ttl: Duration,
}

impl<S, G> PaymentCompensator<S, G>
where
    S: PaymentStore,
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
        format!("rollback:payment:{id}")
    }
}

#[async_trait]
impl<S, G> MessageHandler for PaymentCompensator<S, G>
where
    S: PaymentStore + 'static,
    G: IdempotencyGuard + 'static,
{
    fn name(&self) -> &'static str {
        "payment_compensator"
    }

    #[tracing::instrument(skip(self), fields(correlation_id = %message.correlation_id))]
    async fn handle(&self, message: CompensationMessage) -> std::result::Result<(), HandlerError> {
        let id = &message.correlation_id;
        let key = Self::claim_key(id);

        if !self.guard.claim(&key, self.claim_ttl).await? {
            tracing::debug!("compensation already applied, absorbing redelivery");
            return Ok(());
        }

        match self.store.reverse_charge(id).await {
            Ok(ReversalOutcome::Reversed { amount }) => {
                metrics::counter!("payment_compensations_total").increment(1);
                tracing::info!(amount = %amount, "charge reversed");
                Ok(())
            }
            Ok(ReversalOutcome::AlreadyReversed) => {
                tracing::debug!("no ledger entry, already reversed");
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

    fn request(id: &str, amount: i64) -> ChargeRequest {
        ChargeRequest {
            correlation_id: CorrelationId::new(id),
            account_id: "acct-1".to_string(),
            product_id: "widget".to_string(),
            amount: Money::from_cents(amount),
        }
    }

    fn processor(
        store: InMemoryPaymentStore,
    ) -> PaymentProcessor<InMemoryPaymentStore, InMemoryIdempotencyGuard> {
        PaymentProcessor::new(store, InMemoryIdempotencyGuard::new(), TTL)
    }

    fn compensator(
        store: InMemoryPaymentStore,
    ) -> PaymentCompensator<InMemoryPaymentStore, InMemoryIdempotencyGuard> {
        PaymentCompensator::new(store, InMemoryIdempotencyGuard::new(), TTL)
    }

    fn message(id: &str) -> CompensationMessage {
        CompensationMessage::new(CorrelationId::new(id))
    }

    #[tokio::test]
    async fn charge_then_reverse_restores_balance() {
        let store = InMemoryPaymentStore::new();
        store.open_account("acct-1", Money::from_cents(10_000));
        let processor = processor(store.clone());
        let compensator = compensator(store.clone());

        processor.charge(request("abc", 2_500)).await.unwrap();
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(7_500)
        );

        compensator.handle(message("abc")).await.unwrap();
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(10_000)
        );
        assert_eq!(store.ledger_len(), 0);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_state_untouched() {
        let store = InMemoryPaymentStore::new();
        store.open_account("acct-1", Money::from_cents(100));
        let processor = processor(store.clone());

        let err = processor.charge(request("abc", 500)).await.unwrap_err();
        assert!(matches!(err, ParticipantError::InsufficientFunds { .. }));
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(100)
        );
        assert_eq!(store.ledger_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_charge_is_rejected_by_the_claim() {
        let store = InMemoryPaymentStore::new();
        store.open_account("acct-1", Money::from_cents(10_000));
        let processor = processor(store.clone());

        processor.charge(request("abc", 1_000)).await.unwrap();
        let err = processor.charge(request("abc", 1_000)).await.unwrap_err();
        assert!(matches!(err, ParticipantError::DuplicateRequest(_)));
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(9_000)
        );
    }

    #[tokio::test]
    async fn replayed_reversal_credits_exactly_once() {
        let store = InMemoryPaymentStore::new();
        store.open_account("acct-1", Money::from_cents(10_000));
        let processor = processor(store.clone());
        let compensator = compensator(store.clone());

        processor.charge(request("abc", 2_500)).await.unwrap();
        for _ in 0..5 {
            compensator.handle(message("abc")).await.unwrap();
        }
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(10_000)
        );
    }

    #[tokio::test]
    async fn reversal_without_charge_is_a_noop() {
        let store = InMemoryPaymentStore::new();
        store.open_account("acct-1", Money::from_cents(10_000));
        let compensator = compensator(store.clone());

        compensator.handle(message("ghost")).await.unwrap();
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(10_000)
        );
    }

    #[tokio::test]
    async fn failure_releases_claim_for_retry() {
        let store = InMemoryPaymentStore::new();
        store.open_account("acct-1", Money::from_cents(10_000));
        let processor = processor(store.clone());
        let compensator = compensator(store.clone());

        processor.charge(request("abc", 2_500)).await.unwrap();
        store.set_fail_on_reverse(true);
        assert!(compensator.handle(message("abc")).await.is_err());

        store.set_fail_on_reverse(false);
        compensator.handle(message("abc")).await.unwrap();
        assert_eq!(
            store.balance("acct-1").await.unwrap(),
            Money::from_cents(10_000)
        );
    }
}
