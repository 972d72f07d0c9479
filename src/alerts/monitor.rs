//! Background alert monitor.
//!
//! The monitor subscribes to [`LedgerEvent`]s, re-evaluates the rules of the
//! changed scope, hands newly triggered rules to a [`Notifier`], and sends
//! raised/cleared events through a channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::alerts::rules::{AlertBook, AlertRule, AlertTransitions};
use crate::error::ConsoleResult;
use crate::ledger::{BudgetScope, LedgerEvent};

/// Events emitted by the alert monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// Usage reached the rule's threshold.
    Raised {
        rule: AlertRule,
        /// Higher of the epsilon and delta usage percentages.
        usage_pct: f64,
    },
    /// Usage fell back below the rule's threshold.
    Cleared { rule: AlertRule, usage_pct: f64 },
}

/// Delivers a notification for a triggered rule.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, rule: &AlertRule, scope: &BudgetScope) -> ConsoleResult<()>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, rule: &AlertRule, scope: &BudgetScope) -> ConsoleResult<()> {
        let ratio = scope.usage_ratio();
        tracing::warn!(
            scope_id = %scope.id,
            scope_name = %scope.name,
            target = %rule.target,
            threshold = rule.threshold,
            epsilon_pct = ratio.epsilon_pct,
            delta_pct = ratio.delta_pct,
            "privacy budget threshold exceeded"
        );
        Ok(())
    }
}

/// Watches ledger changes and raises/clears alerts.
///
/// # Example
///
/// ```ignore
/// let (monitor, mut events) = AlertMonitor::new(book, Arc::new(LogNotifier));
/// monitor.start(ledger.subscribe()).await;
///
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// ```
pub struct AlertMonitor {
    book: Arc<AlertBook>,
    notifier: Arc<dyn Notifier>,
    sender: mpsc::Sender<AlertEvent>,
    stop_tx: watch::Sender<bool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AlertMonitor {
    /// Creates a monitor and the receiver for its events.
    pub fn new(
        book: Arc<AlertBook>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::Receiver<AlertEvent>) {
        let (sender, receiver) = mpsc::channel(64);
        let (stop_tx, _) = watch::channel(false);

        let monitor = Self {
            book,
            notifier,
            sender,
            stop_tx,
            task_handle: Mutex::new(None),
        };

        (monitor, receiver)
    }

    /// Starts the background task consuming `ledger_events`.
    pub async fn start(&self, mut ledger_events: broadcast::Receiver<LedgerEvent>) {
        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let book = Arc::clone(&self.book);
        let notifier = Arc::clone(&self.notifier);
        let sender = self.sender.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = stop_rx.changed() => break,
                    received = ledger_events.recv() => received,
                };

                match event {
                    Ok(event) => {
                        handle_change(&book, notifier.as_ref(), &sender, &event.scope).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // The next event for each scope carries its full state.
                        tracing::warn!(skipped, "alert monitor lagged behind ledger events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let mut task = self.task_handle.lock().await;
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the background task and waits for it to finish.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);

        let handle = {
            let mut task = self.task_handle.lock().await;
            task.take()
        };

        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Returns true if the monitoring task is currently running.
    pub async fn is_running(&self) -> bool {
        let task = self.task_handle.lock().await;
        task.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

/// Rule latches live in a file when the book is persisted.
async fn observe_blocking(
    book: &Arc<AlertBook>,
    scope: &BudgetScope,
) -> ConsoleResult<AlertTransitions> {
    let book = Arc::clone(book);
    let scope = scope.clone();
    tokio::task::spawn_blocking(move || book.observe(&scope)).await?
}

async fn handle_change(
    book: &Arc<AlertBook>,
    notifier: &dyn Notifier,
    sender: &mpsc::Sender<AlertEvent>,
    scope: &BudgetScope,
) {
    let transitions = match observe_blocking(book, scope).await {
        Ok(transitions) => transitions,
        Err(err) => {
            tracing::warn!(scope_id = %scope.id, error = %err, "failed to evaluate alert rules");
            return;
        }
    };
    let usage_pct = scope.usage_ratio().max_pct();

    for rule in transitions.raised {
        if let Err(err) = notifier.notify(&rule, scope).await {
            tracing::warn!(rule_id = rule.id, error = %err, "alert notification failed");
        }
        let _ = sender.send(AlertEvent::Raised { rule, usage_pct }).await;
    }
    for rule in transitions.cleared {
        tracing::info!(rule_id = rule.id, scope_id = %scope.id, "budget alert cleared");
        let _ = sender.send(AlertEvent::Cleared { rule, usage_pct }).await;
    }
}
