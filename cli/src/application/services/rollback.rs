//! LIFO stack of compensating actions for one pipeline run.

use anyhow::Result;
use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::domain::error::PipelineError;

type Compensation<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// A compensating action paired with the forward step that created it.
struct RollbackStep<'a> {
    label: String,
    action: Compensation<'a>,
}

/// Compensations are pushed after their forward step succeeds and run in
/// reverse order when a later step fails.
#[derive(Default)]
pub struct RollbackStack<'a> {
    steps: Vec<RollbackStep<'a>>,
}

impl<'a> RollbackStack<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register the compensation for the step labelled `label`.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'a, Result<()>> + Send + 'a,
    {
        self.steps.push(RollbackStep {
            label: label.into(),
            action: Box::new(action),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every compensation once, most recent first. Failures are logged
    /// and do not stop the unwind. Returns the labels that were compensated.
    pub async fn unwind(self) -> Vec<String> {
        let mut compensated = Vec::with_capacity(self.steps.len());
        for step in self.steps.into_iter().rev() {
            info!(step = %step.label, "rolling back");
            if let Err(e) = (step.action)().await {
                warn!(step = %step.label, error = %format!("{e:#}"), "compensation failed");
            }
            compensated.push(step.label);
        }
        compensated
    }

    /// The run succeeded; discard all compensations.
    pub fn commit(self) {
        drop(self.steps);
    }

    /// Commit on success; on failure unwind and describe what was undone.
    ///
    /// A `PipelineError::Validation` is passed through unchanged after the
    /// unwind, every other failure becomes `PipelineError::StepFailed`.
    pub async fn settle<T>(self, outcome: Result<T, StepFailure>) -> Result<T, PipelineError> {
        match outcome {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(failure) => {
                warn!(step = failure.step, error = %format!("{:#}", failure.error), "pipeline step failed");
                let compensated = self.unwind().await;
                match failure.error.downcast::<PipelineError>() {
                    Ok(PipelineError::Validation(message)) => Err(PipelineError::Validation(message)),
                    Ok(other) => Err(PipelineError::StepFailed {
                        step: failure.step.to_string(),
                        message: other.to_string(),
                        compensated,
                    }),
                    Err(error) => Err(PipelineError::StepFailed {
                        step: failure.step.to_string(),
                        message: format!("{error:#}"),
                        compensated,
                    }),
                }
            }
        }
    }
}

/// A forward step's error tagged with the step it came from.
#[derive(Debug)]
pub struct StepFailure {
    pub step: &'static str,
    pub error: anyhow::Error,
}

/// Tag a step result with its label.
pub trait InStep<T> {
    fn in_step(self, step: &'static str) -> Result<T, StepFailure>;
}

impl<T, E: Into<anyhow::Error>> InStep<T> for Result<T, E> {
    fn in_step(self, step: &'static str) -> Result<T, StepFailure> {
        self.map_err(|e| StepFailure {
            step,
            error: e.into(),
        })
    }
}
