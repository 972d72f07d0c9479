//! Job creation state machine.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::api::{Dataset, DatasetApi, JobExecutor, LedgerApi};
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::ledger::BudgetScope;
use crate::preview::{ChannelKey, PreviewEngine, PreviewRequest};
use crate::query::{Mechanism, Metric};
use crate::timeout::{with_deadline, TimeoutConfig};
use crate::wizard::job::{JobDraft, JobResult, JobSpec};

/// Current step together with the data it owns.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardStep {
    SelectTarget {
        draft: JobDraft,
    },
    ConfigureParameters {
        draft: JobDraft,
    },
    /// `draft` is kept so that going back restores every entered field.
    Review {
        spec: JobSpec,
        draft: JobDraft,
        last_error: Option<String>,
    },
    /// A commit is outstanding.
    Submitting {
        spec: JobSpec,
        draft: JobDraft,
    },
    Completed {
        spec: JobSpec,
        result: JobResult,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SelectTarget,
    ConfigureParameters,
    Review,
    Submitting,
    Completed,
}

impl WizardStep {
    pub fn kind(&self) -> StepKind {
        match self {
            WizardStep::SelectTarget { .. } => StepKind::SelectTarget,
            WizardStep::ConfigureParameters { .. } => StepKind::ConfigureParameters,
            WizardStep::Review { .. } => StepKind::Review,
            WizardStep::Submitting { .. } => StepKind::Submitting,
            WizardStep::Completed { .. } => StepKind::Completed,
        }
    }

    pub fn draft(&self) -> Option<&JobDraft> {
        match self {
            WizardStep::SelectTarget { draft }
            | WizardStep::ConfigureParameters { draft }
            | WizardStep::Review { draft, .. }
            | WizardStep::Submitting { draft, .. } => Some(draft),
            WizardStep::Completed { .. } => None,
        }
    }

    pub fn spec(&self) -> Option<&JobSpec> {
        match self {
            WizardStep::Review { spec, .. }
            | WizardStep::Submitting { spec, .. }
            | WizardStep::Completed { spec, .. } => Some(spec),
            _ => None,
        }
    }

    /// Error from the last failed submission, shown on the review step.
    pub fn last_error(&self) -> Option<&str> {
        match self {
            WizardStep::Review { last_error, .. } => last_error.as_deref(),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&JobResult> {
        match self {
            WizardStep::Completed { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Drives one job from target selection to a committed result.
///
/// Steps advance linearly through [`next`](Self::next) and
/// [`back`](Self::back); the review step advances only through
/// [`submit`](Self::submit). Only one submission can be outstanding, and a
/// failed submission returns to review with every field intact.
/// `Completed` is terminal: start a new wizard for the next job.
///
/// The wizard never consumes budget itself. A bound scope is only checked
/// for remaining budget before submitting; booking is left to the
/// execution collaborator.
///
/// With a dataset catalog, [`choose_dataset`](Self::choose_dataset) keeps
/// the dataset's schema: column selections are checked against it and an
/// empty selection previews every numeric column.
pub struct JobWizard {
    step: Mutex<WizardStep>,
    executor: Arc<dyn JobExecutor>,
    ledger: Option<Arc<dyn LedgerApi>>,
    datasets: Option<Arc<dyn DatasetApi>>,
    schema: Mutex<Option<Dataset>>,
    preview: Option<PreviewEngine>,
    max_epsilon_per_job: Option<f64>,
    commit_timeout: Duration,
}

impl JobWizard {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            step: Mutex::new(WizardStep::SelectTarget {
                draft: JobDraft::default(),
            }),
            executor,
            ledger: None,
            datasets: None,
            schema: Mutex::new(None),
            preview: None,
            max_epsilon_per_job: None,
            commit_timeout: TimeoutConfig::default().commit_timeout,
        }
    }

    /// Wizard using the configured commit deadline and per-job epsilon cap.
    pub fn from_config(executor: Arc<dyn JobExecutor>, config: &ConsoleConfig) -> Self {
        Self::new(executor)
            .with_commit_timeout(config.timeouts().commit_timeout)
            .with_max_epsilon_per_job(config.jobs.max_epsilon_per_job)
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerApi>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_datasets(mut self, datasets: Arc<dyn DatasetApi>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    pub fn with_preview(mut self, preview: PreviewEngine) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_max_epsilon_per_job(mut self, cap: Option<f64>) -> Self {
        self.max_epsilon_per_job = cap;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn step(&self) -> StepKind {
        self.lock().kind()
    }

    pub fn snapshot(&self) -> WizardStep {
        self.lock().clone()
    }

    pub fn select_dataset(&self, dataset_id: &str) -> ConsoleResult<()> {
        self.edit("select a dataset", &[StepKind::SelectTarget], |draft| {
            let dataset_id = dataset_id.trim();
            if draft.dataset_id.as_deref() != Some(dataset_id) {
                draft.columns.clear();
            }
            draft.dataset_id = Some(dataset_id.to_string());
            Ok(())
        })
    }

    /// Look `dataset_id` up in the catalog and select it.
    ///
    /// Lookup failures leave the wizard untouched.
    pub async fn choose_dataset(&self, dataset_id: &str) -> ConsoleResult<Dataset> {
        let Some(datasets) = &self.datasets else {
            return Err(ConsoleError::validation("no dataset catalog is configured"));
        };
        let dataset = datasets.get_dataset(dataset_id.trim()).await?;
        self.select_dataset(&dataset.id)?;
        tracing::debug!(
            dataset_id = %dataset.id,
            columns = dataset.columns.len(),
            "dataset schema loaded"
        );
        *self.schema() = Some(dataset.clone());
        Ok(dataset)
    }

    /// Schema of the selected dataset, if it came from the catalog.
    pub fn dataset(&self) -> Option<Dataset> {
        let dataset_id = self.selected_dataset()?;
        self.schema()
            .as_ref()
            .filter(|dataset| dataset.id == dataset_id)
            .cloned()
    }

    /// Empty means all numeric columns.
    pub fn set_columns(&self, columns: Vec<String>) -> ConsoleResult<()> {
        if let Some(dataset) = self.dataset() {
            if let Some(unknown) = columns
                .iter()
                .find(|column| !dataset.columns.iter().any(|known| &known.name == *column))
            {
                return Err(ConsoleError::validation(format!(
                    "dataset '{}' has no column '{}'",
                    dataset.id, unknown
                )));
            }
        }
        self.edit(
            "select columns",
            &[StepKind::SelectTarget, StepKind::ConfigureParameters],
            |draft| {
                draft.columns = columns;
                Ok(())
            },
        )
    }

    /// Not validated until the wizard advances.
    pub fn set_epsilon(&self, epsilon: f64) -> ConsoleResult<()> {
        self.configure("set epsilon", |draft| draft.epsilon = epsilon)
    }

    pub fn set_delta(&self, delta: f64) -> ConsoleResult<()> {
        self.configure("set delta", |draft| draft.delta = delta)
    }

    pub fn set_mechanism(&self, mechanism: Mechanism) -> ConsoleResult<()> {
        self.configure("set mechanism", |draft| draft.mechanism = mechanism)
    }

    pub fn set_metrics(&self, metrics: impl IntoIterator<Item = Metric>) -> ConsoleResult<()> {
        let metrics = metrics.into_iter().collect();
        self.configure("set metrics", |draft| draft.metrics = metrics)
    }

    /// Add `metric` if absent, remove it otherwise.
    pub fn toggle_metric(&self, metric: Metric) -> ConsoleResult<()> {
        self.configure("toggle metric", |draft| {
            if !draft.metrics.remove(&metric) {
                draft.metrics.insert(metric);
            }
        })
    }

    /// Bind (or unbind) the budget scope shown next to the parameters.
    pub fn bind_scope(&self, scope_id: Option<&str>) -> ConsoleResult<()> {
        self.configure("bind a budget scope", |draft| {
            draft.budget_scope_id = scope_id.map(str::to_string)
        })
    }

    /// Current state of the bound scope, for the advisory remaining-budget display.
    pub async fn bound_scope(&self) -> ConsoleResult<Option<BudgetScope>> {
        let scope_id = self
            .lock()
            .draft()
            .and_then(|draft| draft.budget_scope_id.clone());
        match (scope_id, &self.ledger) {
            (Some(scope_id), Some(ledger)) => Ok(Some(ledger.get_scope(&scope_id).await?)),
            _ => Ok(None),
        }
    }

    /// Advance one step after validating the current one.
    pub fn next(&self) -> ConsoleResult<StepKind> {
        let (kind, preview_draft) = {
            let mut step = self.lock();
            let next = match &*step {
                WizardStep::SelectTarget { draft } => {
                    draft.validate_target()?;
                    WizardStep::ConfigureParameters {
                        draft: draft.clone(),
                    }
                }
                WizardStep::ConfigureParameters { draft } => WizardStep::Review {
                    spec: draft.to_spec(self.max_epsilon_per_job)?,
                    draft: draft.clone(),
                    last_error: None,
                },
                WizardStep::Review { .. } => {
                    return Err(ConsoleError::InvalidStep(
                        "review advances only by submitting".to_string(),
                    ))
                }
                WizardStep::Submitting { .. } => return Err(ConsoleError::SubmissionInFlight),
                WizardStep::Completed { .. } => return Err(completed_is_terminal()),
            };
            tracing::debug!(from = ?step.kind(), to = ?next.kind(), "wizard advanced");
            *step = next;
            let preview_draft = match &*step {
                WizardStep::ConfigureParameters { draft } => Some(draft.clone()),
                _ => None,
            };
            (step.kind(), preview_draft)
        };

        if let Some(draft) = preview_draft {
            self.refresh_preview(&draft);
        }
        Ok(kind)
    }

    /// Go back one step, keeping every entered field.
    pub fn back(&self) -> ConsoleResult<StepKind> {
        let mut step = self.lock();
        let previous = match &*step {
            WizardStep::SelectTarget { .. } => {
                return Err(ConsoleError::InvalidStep(
                    "already at the first step".to_string(),
                ))
            }
            WizardStep::ConfigureParameters { draft } => WizardStep::SelectTarget {
                draft: draft.clone(),
            },
            WizardStep::Review { draft, .. } => WizardStep::ConfigureParameters {
                draft: draft.clone(),
            },
            WizardStep::Submitting { .. } => return Err(ConsoleError::SubmissionInFlight),
            WizardStep::Completed { .. } => return Err(completed_is_terminal()),
        };
        tracing::debug!(from = ?step.kind(), to = ?previous.kind(), "wizard went back");
        *step = previous;
        Ok(step.kind())
    }

    /// Commit the reviewed job.
    ///
    /// Fails with `SubmissionInFlight` while another submission is
    /// outstanding. On any failure, including a budget that no longer fits
    /// the bound scope, the wizard stays on review with the error recorded.
    pub async fn submit(&self) -> ConsoleResult<JobResult> {
        let (spec, draft) = {
            let mut step = self.lock();
            let (spec, draft) = match &*step {
                WizardStep::Review { spec, draft, .. } => (spec.clone(), draft.clone()),
                WizardStep::Submitting { .. } => return Err(ConsoleError::SubmissionInFlight),
                other => {
                    return Err(ConsoleError::InvalidStep(format!(
                        "cannot submit from {:?}",
                        other.kind()
                    )))
                }
            };
            *step = WizardStep::Submitting {
                spec: spec.clone(),
                draft: draft.clone(),
            };
            (spec, draft)
        };

        let in_flight = InFlight {
            wizard: self,
            pending: Some((spec.clone(), draft)),
        };

        match self.commit(&spec).await {
            Ok(result) => {
                tracing::info!(
                    job_id = %result.id,
                    status = %result.status,
                    dataset_id = %spec.dataset_id,
                    epsilon = spec.epsilon,
                    "job submitted"
                );
                in_flight.complete(result.clone());
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(dataset_id = %spec.dataset_id, error = %err, "job submission failed");
                in_flight.fail(&err);
                Err(err)
            }
        }
    }

    async fn commit(&self, spec: &JobSpec) -> ConsoleResult<JobResult> {
        self.check_remaining(spec).await?;
        with_deadline("job commit", self.commit_timeout, self.executor.submit(spec)).await
    }

    async fn check_remaining(&self, spec: &JobSpec) -> ConsoleResult<()> {
        let (Some(scope_id), Some(ledger)) = (&spec.budget_scope_id, &self.ledger) else {
            return Ok(());
        };
        let scope = ledger.get_scope(scope_id).await?;
        if scope.can_afford(spec.epsilon, spec.delta) {
            return Ok(());
        }
        let remaining = scope.remaining();
        Err(ConsoleError::BudgetExceeded {
            scope_id: scope.id,
            detail: format!(
                "job needs epsilon {} but only {} remains",
                spec.epsilon, remaining.epsilon
            ),
        })
    }

    fn configure(&self, action: &str, apply: impl FnOnce(&mut JobDraft)) -> ConsoleResult<()> {
        self.edit(action, &[StepKind::ConfigureParameters], |draft| {
            apply(draft);
            Ok(())
        })
    }

    fn edit(
        &self,
        action: &str,
        allowed: &[StepKind],
        apply: impl FnOnce(&mut JobDraft) -> ConsoleResult<()>,
    ) -> ConsoleResult<()> {
        let preview_draft = {
            let mut step = self.lock();
            let kind = step.kind();
            if !allowed.contains(&kind) {
                return Err(match kind {
                    StepKind::Submitting => ConsoleError::SubmissionInFlight,
                    _ => ConsoleError::InvalidStep(format!("cannot {} during {:?}", action, kind)),
                });
            }
            match &mut *step {
                WizardStep::SelectTarget { draft } | WizardStep::ConfigureParameters { draft } => {
                    apply(draft)?;
                    (kind == StepKind::ConfigureParameters).then(|| draft.clone())
                }
                _ => None,
            }
        };

        if let Some(draft) = preview_draft {
            self.refresh_preview(&draft);
        }
        Ok(())
    }

    /// Channels left over from earlier selections are dropped first.
    fn refresh_preview(&self, draft: &JobDraft) {
        let Some(engine) = &self.preview else {
            return;
        };
        let requests = self.preview_requests(draft);
        let wanted: HashSet<ChannelKey> = requests.iter().map(PreviewRequest::channel).collect();
        engine.retain(|channel| wanted.contains(channel));
        for request in requests {
            engine.request(request);
        }
    }

    /// One preview per selected column and previewable metric.
    fn preview_requests(&self, draft: &JobDraft) -> Vec<PreviewRequest> {
        let Some(dataset_id) = &draft.dataset_id else {
            return Vec::new();
        };
        let columns = if draft.columns.is_empty() {
            self.numeric_columns(dataset_id)
        } else {
            draft.columns.clone()
        };
        let mut requests = Vec::new();
        for column in &columns {
            for metric in draft.metrics.iter().filter(|m| m.supports_preview()) {
                requests.push(PreviewRequest::new(
                    dataset_id.clone(),
                    column.clone(),
                    *metric,
                    draft.epsilon,
                ));
            }
        }
        requests
    }

    /// Empty unless the schema of `dataset_id` came from the catalog.
    fn numeric_columns(&self, dataset_id: &str) -> Vec<String> {
        self.schema()
            .as_ref()
            .filter(|dataset| dataset.id == dataset_id)
            .map(|dataset| {
                dataset
                    .numeric_columns()
                    .map(|column| column.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn selected_dataset(&self) -> Option<String> {
        self.lock()
            .draft()
            .and_then(|draft| draft.dataset_id.clone())
    }

    fn lock(&self) -> MutexGuard<'_, WizardStep> {
        self.step.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schema(&self) -> MutexGuard<'_, Option<Dataset>> {
        self.schema.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, next: WizardStep) {
        *self.lock() = next;
    }
}

fn completed_is_terminal() -> ConsoleError {
    ConsoleError::InvalidStep("the job is completed; start a new wizard".to_string())
}

/// Returns the wizard to review if a submission is dropped before finishing.
struct InFlight<'a> {
    wizard: &'a JobWizard,
    pending: Option<(JobSpec, JobDraft)>,
}

impl InFlight<'_> {
    fn complete(mut self, result: JobResult) {
        if let Some((spec, _)) = self.pending.take() {
            self.wizard.set(WizardStep::Completed { spec, result });
        }
    }

    fn fail(mut self, error: &ConsoleError) {
        if let Some((spec, draft)) = self.pending.take() {
            self.wizard.set(WizardStep::Review {
                spec,
                draft,
                last_error: Some(error.to_string()),
            });
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some((spec, draft)) = self.pending.take() {
            self.wizard.set(WizardStep::Review {
                spec,
                draft,
                last_error: Some("submission cancelled".to_string()),
            });
        }
    }
}
