use async_trait::async_trait;

use crate::api::{BudgetAmount, LedgerApi, NewScope};
use crate::error::ConsoleResult;
use crate::ledger::{BudgetLedger, BudgetScope};

#[async_trait]
impl LedgerApi for BudgetLedger {
    async fn list_scopes(&self) -> ConsoleResult<Vec<BudgetScope>> {
        Ok(self.list().await)
    }

    async fn get_scope(&self, scope_id: &str) -> ConsoleResult<BudgetScope> {
        self.get(scope_id).await
    }

    async fn create_scope(&self, scope: &NewScope) -> ConsoleResult<BudgetScope> {
        let name = if scope.name.trim().is_empty() {
            scope.id.as_str()
        } else {
            scope.name.as_str()
        };
        BudgetLedger::create_scope(self, &scope.id, name, scope.total_epsilon, scope.total_delta)
            .await
    }

    async fn allocate(&self, scope_id: &str, amount: BudgetAmount) -> ConsoleResult<BudgetScope> {
        BudgetLedger::allocate(self, scope_id, amount.epsilon, amount.delta).await
    }

    async fn consume(&self, scope_id: &str, amount: BudgetAmount) -> ConsoleResult<BudgetScope> {
        BudgetLedger::consume(self, scope_id, amount.epsilon, amount.delta).await
    }

    async fn reset(&self, scope_id: &str) -> ConsoleResult<BudgetScope> {
        BudgetLedger::reset(self, scope_id).await
    }
}
