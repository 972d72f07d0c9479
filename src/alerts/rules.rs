//! Alert rules and threshold evaluation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditAction, AuditRecord, AuditTrail};
use crate::error::{ConsoleError, ConsoleResult};
use crate::ledger::{write_json_atomic, BudgetScope};

const ALERTS_DIR_NAME: &str = "alerts";
const RULES_FILE_NAME: &str = "rules.json";

/// Notify `target` once the owning scope's usage reaches `threshold` percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: u64,
    pub scope_id: String,
    /// Notification target, e.g. an email address.
    pub target: String,
    /// Percentage in `[0, 100]`.
    pub threshold: f64,
    /// Latched after a notification until usage falls back below the threshold.
    #[serde(default)]
    pub triggered: bool,
}

/// Ids of the rules in `rules` that belong to `scope` and whose threshold
/// its current usage has reached. Usage is the higher of the epsilon and
/// delta percentages.
pub fn evaluate(scope: &BudgetScope, rules: &[AlertRule]) -> BTreeSet<u64> {
    let usage = scope.usage_ratio().max_pct();
    rules
        .iter()
        .filter(|rule| rule.scope_id == scope.id && usage >= rule.threshold)
        .map(|rule| rule.id)
        .collect()
}

/// Rules whose latch changed after observing a scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertTransitions {
    pub raised: Vec<AlertRule>,
    pub cleared: Vec<AlertRule>,
}

impl AlertTransitions {
    pub fn is_empty(&self) -> bool {
        self.raised.is_empty() && self.cleared.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BookState {
    next_id: u64,
    rules: BTreeMap<u64, AlertRule>,
}

/// Registry of alert rules, optionally persisted.
#[derive(Debug)]
pub struct AlertBook {
    state: RwLock<BookState>,
    rules_path: Option<PathBuf>,
    audit: Option<AuditTrail>,
}

impl Default for AlertBook {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl AlertBook {
    /// A registry that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(BookState {
                next_id: 1,
                rules: BTreeMap::new(),
            }),
            rules_path: None,
            audit: None,
        }
    }

    /// A registry persisted under `<data_dir>/alerts/rules.json`.
    pub fn open(data_dir: impl AsRef<Path>) -> ConsoleResult<Self> {
        let data_dir = data_dir.as_ref();
        let dir = data_dir.join(ALERTS_DIR_NAME);
        fs::create_dir_all(&dir)?;
        let rules_path = dir.join(RULES_FILE_NAME);

        let state = match fs::read_to_string(&rules_path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BookState {
                next_id: 1,
                rules: BTreeMap::new(),
            },
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            state: RwLock::new(state),
            rules_path: Some(rules_path),
            audit: Some(AuditTrail::new(data_dir)?),
        })
    }

    /// Register a rule for `scope_id`.
    pub fn add_rule(
        &self,
        scope_id: &str,
        threshold: f64,
        target: &str,
    ) -> ConsoleResult<AlertRule> {
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return Err(ConsoleError::validation(format!(
                "alert threshold must be between 0 and 100 (got {})",
                threshold
            )));
        }
        if target.trim().is_empty() {
            return Err(ConsoleError::validation("alert target must not be empty"));
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let rule = AlertRule {
            id: state.next_id,
            scope_id: scope_id.to_string(),
            target: target.trim().to_string(),
            threshold,
            triggered: false,
        };
        let mut next = state.clone();
        next.next_id += 1;
        next.rules.insert(rule.id, rule.clone());
        self.persist(&next)?;
        *state = next;
        drop(state);

        self.record(
            AuditAction::AlertCreated,
            &rule,
            json!({"id": rule.id, "threshold": rule.threshold, "target": rule.target}),
        );
        Ok(rule)
    }

    /// Delete a rule by id.
    pub fn remove_rule(&self, id: u64) -> ConsoleResult<AlertRule> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let mut next = state.clone();
        let rule = next
            .rules
            .remove(&id)
            .ok_or_else(|| ConsoleError::NotFound(format!("alert rule {}", id)))?;
        self.persist(&next)?;
        *state = next;
        drop(state);

        self.record(AuditAction::AlertDeleted, &rule, json!({"id": rule.id}));
        Ok(rule)
    }

    /// Rules owned by `scope_id`, ordered by id.
    pub fn rules_for(&self, scope_id: &str) -> Vec<AlertRule> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .rules
            .values()
            .filter(|rule| rule.scope_id == scope_id)
            .cloned()
            .collect()
    }

    /// Re-evaluate the rules of `scope` and flip latches that changed.
    pub fn observe(&self, scope: &BudgetScope) -> ConsoleResult<AlertTransitions> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let owned: Vec<AlertRule> = state
            .rules
            .values()
            .filter(|rule| rule.scope_id == scope.id)
            .cloned()
            .collect();
        let triggered = evaluate(scope, &owned);

        let mut next = state.clone();
        let mut transitions = AlertTransitions::default();
        for rule in owned {
            let now = triggered.contains(&rule.id);
            if now == rule.triggered {
                continue;
            }
            if let Some(stored) = next.rules.get_mut(&rule.id) {
                stored.triggered = now;
                if now {
                    transitions.raised.push(stored.clone());
                } else {
                    transitions.cleared.push(stored.clone());
                }
            }
        }

        if !transitions.is_empty() {
            self.persist(&next)?;
            *state = next;
        }
        Ok(transitions)
    }

    fn persist(&self, state: &BookState) -> ConsoleResult<()> {
        match &self.rules_path {
            Some(path) => write_json_atomic(path, state),
            None => Ok(()),
        }
    }

    fn record(&self, action: AuditAction, rule: &AlertRule, details: serde_json::Value) {
        if let Some(audit) = &self.audit {
            let record = AuditRecord::new(action, Some(rule.scope_id.clone()), details);
            if let Err(err) = audit.append(&record) {
                tracing::warn!(error = %err, "failed to append audit record");
            }
        }
    }
}
