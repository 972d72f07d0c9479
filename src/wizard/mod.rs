//! DP job creation workflow.
//!
//! `SelectTarget -> ConfigureParameters -> Review -> Completed`, modelled as
//! a tagged [`WizardStep`] so each step owns exactly the data it needs.

mod job;
mod machine;

pub use job::{JobDraft, JobResult, JobSpec, DEFAULT_EPSILON, DEFAULT_GAUSSIAN_DELTA};
pub use machine::{JobWizard, StepKind, WizardStep};

pub(crate) use job::string_or_number;
