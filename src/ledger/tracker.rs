//! Privacy budget ledger.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};

use crate::audit::{AuditAction, AuditRecord, AuditTrail};
use crate::error::{ConsoleError, ConsoleResult};
use crate::ledger::scope::{
    validate_amount, validate_scope_id, BudgetScope, Remaining, UsageRatio,
};
use crate::ledger::store::LedgerStore;

const EVENT_CAPACITY: usize = 256;

/// What a successful ledger mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerChange {
    Created,
    Allocated { epsilon: f64, delta: f64 },
    Consumed { epsilon: f64, delta: f64 },
    Reset,
}

impl LedgerChange {
    fn audit_action(&self) -> AuditAction {
        match self {
            LedgerChange::Created => AuditAction::BudgetCreated,
            LedgerChange::Allocated { .. } => AuditAction::BudgetAllocated,
            LedgerChange::Consumed { .. } => AuditAction::BudgetConsumed,
            LedgerChange::Reset => AuditAction::BudgetReset,
        }
    }
}

/// Published after every successful mutation, carrying the new scope state.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEvent {
    pub change: LedgerChange,
    pub scope: BudgetScope,
}

type ScopeSlot = Arc<Mutex<BudgetScope>>;

/// Per-scope privacy budget accounting.
///
/// Each scope sits behind its own async mutex: allocate, consume and reset on
/// the same scope are serialized, so two concurrent consumes can never both
/// pass the remaining-budget check against a stale read. Operations on
/// different scopes never wait on each other.
///
/// A mutation is computed on a copy, persisted (when a store is configured),
/// and only then swapped in, so a failed check or a failed write leaves the
/// scope untouched.
pub struct BudgetLedger {
    scopes: RwLock<HashMap<String, ScopeSlot>>,
    creating: Mutex<()>,
    events: broadcast::Sender<LedgerEvent>,
    store: Option<LedgerStore>,
    audit: Option<Arc<AuditTrail>>,
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl BudgetLedger {
    /// A ledger that lives only in memory.
    pub fn in_memory() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scopes: RwLock::new(HashMap::new()),
            creating: Mutex::new(()),
            events,
            store: None,
            audit: None,
        }
    }

    /// A ledger persisted under `data_dir`, loading any scopes already there.
    pub fn open(data_dir: impl AsRef<Path>) -> ConsoleResult<Self> {
        let data_dir = data_dir.as_ref();
        let store = LedgerStore::new(data_dir)?;
        let audit = AuditTrail::new(data_dir)?;

        let mut scopes = HashMap::new();
        for scope in store.load_all()? {
            scopes.insert(scope.id.clone(), Arc::new(Mutex::new(scope)));
        }
        tracing::info!(
            scopes = scopes.len(),
            dir = %data_dir.display(),
            "loaded budget ledger"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            scopes: RwLock::new(scopes),
            creating: Mutex::new(()),
            events,
            store: Some(store),
            audit: Some(Arc::new(audit)),
        })
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// The audit trail, when the ledger is persisted.
    pub fn audit_trail(&self) -> Option<&AuditTrail> {
        self.audit.as_deref()
    }

    /// Register a new scope with nothing consumed.
    pub async fn create_scope(
        &self,
        id: &str,
        name: &str,
        total_epsilon: f64,
        total_delta: f64,
    ) -> ConsoleResult<BudgetScope> {
        validate_scope_id(id)?;
        validate_amount("total_epsilon", total_epsilon)?;
        validate_amount("total_delta", total_delta)?;

        let scope = BudgetScope::new(id, name, total_epsilon, total_delta);

        // Creations are serialized among themselves; the map lock is only
        // taken for the existence check and the insert.
        let _creating = self.creating.lock().await;
        let exists = self
            .scopes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id);
        if exists {
            return Err(ConsoleError::ScopeExists(id.to_string()));
        }
        if let Some(store) = &self.store {
            store.persist(&scope).await?;
        }

        let slot: ScopeSlot = Arc::new(Mutex::new(scope.clone()));
        let held = Arc::clone(&slot);
        let _current = held.lock().await;
        self.scopes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), slot);

        self.publish(LedgerChange::Created, &scope).await;
        Ok(scope)
    }

    /// Snapshot of one scope.
    pub async fn get(&self, scope_id: &str) -> ConsoleResult<BudgetScope> {
        let slot = self.slot(scope_id)?;
        let scope = slot.lock().await;
        Ok(scope.clone())
    }

    /// Snapshot of every scope, oldest first.
    pub async fn list(&self) -> Vec<BudgetScope> {
        let slots: Vec<ScopeSlot> = {
            let scopes = self.scopes.read().unwrap_or_else(|e| e.into_inner());
            scopes.values().cloned().collect()
        };

        let mut result = Vec::with_capacity(slots.len());
        for slot in slots {
            result.push(slot.lock().await.clone());
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        result
    }

    /// Add to a scope's totals; consumption is unchanged.
    pub async fn allocate(
        &self,
        scope_id: &str,
        epsilon: f64,
        delta: f64,
    ) -> ConsoleResult<BudgetScope> {
        self.mutate(scope_id, LedgerChange::Allocated { epsilon, delta }, |scope| {
            scope.allocated(epsilon, delta)
        })
        .await
    }

    /// Consume epsilon and delta together, or fail with `BudgetExceeded`
    /// leaving the scope unchanged.
    pub async fn consume(
        &self,
        scope_id: &str,
        epsilon: f64,
        delta: f64,
    ) -> ConsoleResult<BudgetScope> {
        self.mutate(scope_id, LedgerChange::Consumed { epsilon, delta }, |scope| {
            scope.consumed(epsilon, delta)
        })
        .await
    }

    /// Set both consumed counters back to zero. There is no undo.
    pub async fn reset(&self, scope_id: &str) -> ConsoleResult<BudgetScope> {
        self.mutate(scope_id, LedgerChange::Reset, |scope| Ok(scope.cleared()))
            .await
    }

    /// Remaining epsilon and delta.
    pub async fn remaining(&self, scope_id: &str) -> ConsoleResult<Remaining> {
        Ok(self.get(scope_id).await?.remaining())
    }

    /// Consumption as percentages of the totals.
    pub async fn usage_ratio(&self, scope_id: &str) -> ConsoleResult<UsageRatio> {
        Ok(self.get(scope_id).await?.usage_ratio())
    }

    fn slot(&self, scope_id: &str) -> ConsoleResult<ScopeSlot> {
        let scopes = self.scopes.read().unwrap_or_else(|e| e.into_inner());
        scopes
            .get(scope_id)
            .cloned()
            .ok_or_else(|| ConsoleError::ScopeNotFound(scope_id.to_string()))
    }

    async fn mutate<F>(
        &self,
        scope_id: &str,
        change: LedgerChange,
        apply: F,
    ) -> ConsoleResult<BudgetScope>
    where
        F: FnOnce(&BudgetScope) -> ConsoleResult<BudgetScope>,
    {
        let slot = self.slot(scope_id)?;
        let mut current = slot.lock().await;

        let next = match apply(&current) {
            Ok(next) => next,
            Err(err) => {
                tracing::debug!(scope_id, error = %err, "ledger mutation rejected");
                return Err(err);
            }
        };
        if let Some(store) = &self.store {
            store.persist(&next).await?;
        }
        *current = next.clone();

        // Published under the scope lock so subscribers see per-scope changes in order.
        self.publish(change, &next).await;
        Ok(next)
    }

    async fn publish(&self, change: LedgerChange, scope: &BudgetScope) {
        let remaining = scope.remaining();
        tracing::info!(
            scope_id = %scope.id,
            change = ?change,
            remaining_epsilon = remaining.epsilon,
            remaining_delta = remaining.delta,
            "budget ledger updated"
        );

        if let Some(audit) = &self.audit {
            let details = json!({
                "change": change,
                "total_epsilon": scope.total_epsilon,
                "total_delta": scope.total_delta,
                "consumed_epsilon": scope.consumed_epsilon,
                "consumed_delta": scope.consumed_delta,
            });
            let record = AuditRecord::new(change.audit_action(), Some(scope.id.clone()), details);
            if let Err(err) = audit.append_async(record).await {
                tracing::warn!(error = %err, "failed to append audit record");
            }
        }

        // No subscribers is fine.
        let _ = self.events.send(LedgerEvent {
            change,
            scope: scope.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use tempfile::TempDir;

    async fn ledger_with(id: &str, total_epsilon: f64, total_delta: f64) -> BudgetLedger {
        let ledger = BudgetLedger::in_memory();
        ledger
            .create_scope(id, id, total_epsilon, total_delta)
            .await
            .expect("create scope");
        ledger
    }

    #[tokio::test]
    async fn test_consume_within_budget() {
        let ledger = ledger_with("ds_001", 10.0, 1e-5).await;

        ledger.consume("ds_001", 4.0, 0.0).await.expect("consume");

        let remaining = ledger.remaining("ds_001").await.expect("remaining");
        assert_eq!(remaining.epsilon, 6.0);
        assert_eq!(remaining.delta, 1e-5);
    }

    #[tokio::test]
    async fn test_consume_over_budget_leaves_state_unchanged() {
        let ledger = ledger_with("ds_001", 10.0, 1e-5).await;
        ledger.consume("ds_001", 9.0, 0.0).await.expect("consume 9");

        let err = ledger.consume("ds_001", 2.0, 0.0).await.unwrap_err();
        assert!(matches!(err, ConsoleError::BudgetExceeded { .. }));

        let scope = ledger.get("ds_001").await.expect("get");
        assert_eq!(scope.consumed_epsilon, 9.0);
        assert_eq!(scope.consumed_delta, 0.0);
    }

    #[tokio::test]
    async fn test_consume_delta_overflow_does_not_book_epsilon() {
        let ledger = ledger_with("ds", 10.0, 1e-5).await;
        let err = ledger.consume("ds", 1.0, 1e-3).await.unwrap_err();
        assert!(matches!(err, ConsoleError::BudgetExceeded { .. }));
        assert_eq!(ledger.get("ds").await.expect("get").consumed_epsilon, 0.0);
    }

    #[tokio::test]
    async fn test_reset_restores_full_remaining() {
        let ledger = ledger_with("ds", 10.0, 1e-5).await;
        ledger.consume("ds", 7.5, 5e-6).await.expect("consume");

        ledger.reset("ds").await.expect("reset");

        let remaining = ledger.remaining("ds").await.expect("remaining");
        assert_eq!(remaining.epsilon, 10.0);
        assert_eq!(remaining.delta, 1e-5);
    }

    #[tokio::test]
    async fn test_allocate_adds_exactly_and_keeps_consumption() {
        let ledger = ledger_with("ds", 10.0, 1e-5).await;
        ledger.consume("ds", 3.0, 0.0).await.expect("consume");

        let scope = ledger.allocate("ds", 2.5, 1e-5).await.expect("allocate");

        assert_eq!(scope.total_epsilon, 12.5);
        assert_eq!(scope.total_delta, 2e-5);
        assert_eq!(scope.consumed_epsilon, 3.0);
        assert_eq!(scope.consumed_delta, 0.0);
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let ledger = ledger_with("ds", 8.0, 1e-5).await;
        ledger.consume("ds", 2.0, 0.0).await.expect("consume");

        let first = ledger.usage_ratio("ds").await.expect("ratio");
        let second = ledger.usage_ratio("ds").await.expect("ratio");
        assert_eq!(first, second);
        assert_eq!(first.epsilon_pct, 25.0);
        assert_eq!(
            ledger.remaining("ds").await.expect("remaining"),
            ledger.remaining("ds").await.expect("remaining")
        );
    }

    #[tokio::test]
    async fn test_unknown_scope() {
        let ledger = BudgetLedger::in_memory();
        assert!(matches!(
            ledger.consume("missing", 1.0, 0.0).await,
            Err(ConsoleError::ScopeNotFound(_))
        ));
        assert!(matches!(
            ledger.allocate("missing", 1.0, 0.0).await,
            Err(ConsoleError::ScopeNotFound(_))
        ));
        assert!(matches!(
            ledger.reset("missing").await,
            Err(ConsoleError::ScopeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_scope_rejected() {
        let ledger = ledger_with("ds", 1.0, 0.0).await;
        assert!(matches!(
            ledger.create_scope("ds", "again", 1.0, 0.0).await,
            Err(ConsoleError::ScopeExists(_))
        ));
    }

    #[tokio::test]
    async fn test_small_delta_budget_never_overspent() {
        let ledger = ledger_with("ds", 10.0, 1e-10).await;

        let err = ledger.consume("ds", 1.0, 1e-9).await.unwrap_err();
        assert!(matches!(err, ConsoleError::BudgetExceeded { .. }));
        let scope = ledger.get("ds").await.expect("get");
        assert_eq!(scope.consumed_epsilon, 0.0);
        assert_eq!(scope.consumed_delta, 0.0);

        ledger.consume("ds", 1.0, 6e-11).await.expect("first half");
        let err = ledger.consume("ds", 1.0, 6e-11).await.unwrap_err();
        assert!(matches!(err, ConsoleError::BudgetExceeded { .. }));
        assert_eq!(ledger.get("ds").await.expect("get").consumed_delta, 6e-11);
    }

    #[tokio::test]
    async fn test_overflowing_allocation_keeps_data_dir_loadable() {
        let temp_dir = TempDir::new().expect("temp dir");
        {
            let ledger = BudgetLedger::open(temp_dir.path()).expect("open");
            ledger
                .create_scope("huge", "huge", f64::MAX, 0.0)
                .await
                .expect("create");
            let err = ledger.allocate("huge", f64::MAX, 0.0).await.unwrap_err();
            assert!(matches!(err, ConsoleError::Validation(_)));
            assert_eq!(
                ledger.get("huge").await.expect("get").total_epsilon,
                f64::MAX
            );
        }

        let reopened = BudgetLedger::open(temp_dir.path()).expect("reopen");
        assert_eq!(
            reopened.get("huge").await.expect("get").total_epsilon,
            f64::MAX
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_of_one_id_admit_one() {
        let temp_dir = TempDir::new().expect("temp dir");
        let ledger = Arc::new(BudgetLedger::open(temp_dir.path()).expect("open"));

        let attempts = (0..8).map(|i| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger
                    .create_scope("ds", &format!("attempt {}", i), 1.0, 0.0)
                    .await
                    .is_ok()
            })
        });
        let created = join_all(attempts)
            .await
            .into_iter()
            .filter(|outcome| *outcome.as_ref().expect("task"))
            .count();

        assert_eq!(created, 1);
        assert_eq!(ledger.list().await.len(), 1);
        let audit = ledger.audit_trail().expect("audit").load().expect("load");
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumes_never_overspend() {
        let ledger = Arc::new(ledger_with("shared", 10.0, 1e-5).await);

        let attempts = (0..50).map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.consume("shared", 1.0, 1e-7).await.is_ok() })
        });
        let outcomes = join_all(attempts).await;
        let succeeded = outcomes
            .into_iter()
            .filter(|outcome| *outcome.as_ref().expect("task"))
            .count();

        let scope = ledger.get("shared").await.expect("get");
        assert_eq!(succeeded, 10);
        assert!(scope.consumed_epsilon <= scope.total_epsilon);
        assert!(scope.consumed_delta <= scope.total_delta);
        assert_eq!(scope.remaining().epsilon, 0.0);
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let ledger = ledger_with("ds", 5.0, 0.0).await;
        let mut events = ledger.subscribe();

        ledger.consume("ds", 1.0, 0.0).await.expect("consume");
        ledger.reset("ds").await.expect("reset");
        let _ = ledger.consume("ds", 50.0, 0.0).await;

        let first = events.recv().await.expect("first event");
        assert!(matches!(first.change, LedgerChange::Consumed { .. }));
        assert_eq!(first.scope.consumed_epsilon, 1.0);
        let second = events.recv().await.expect("second event");
        assert_eq!(second.change, LedgerChange::Reset);
        assert!(events.try_recv().is_err(), "rejected consume must not publish");
    }

    #[tokio::test]
    async fn test_persisted_ledger_reloads() {
        let temp_dir = TempDir::new().expect("temp dir");
        {
            let ledger = BudgetLedger::open(temp_dir.path()).expect("open");
            ledger
                .create_scope("ds_001", "customer_events", 10.0, 1e-5)
                .await
                .expect("create");
            ledger.consume("ds_001", 3.0, 0.0).await.expect("consume");
        }

        let reopened = BudgetLedger::open(temp_dir.path()).expect("reopen");
        let scope = reopened.get("ds_001").await.expect("get");
        assert_eq!(scope.consumed_epsilon, 3.0);
        assert_eq!(scope.name, "customer_events");

        let audit = reopened.audit_trail().expect("audit").load().expect("load");
        let actions: Vec<AuditAction> = audit.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::BudgetCreated, AuditAction::BudgetConsumed]
        );
    }
}
