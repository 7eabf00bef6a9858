//! Records which steps of a mutating operation have run, so a failure can
//! report exactly how far the operation got and what was undone.

use std::fmt::{self, Display};

use strum::Display;

/// A single externally visible step of an orchestrator operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Step {
    BuildImage,
    AwaitImage,
    ReadReplicaSet,
    CreateReplicaSet,
    CreateService,
    DeleteReplicaSet,
    DeletePods,
    DeleteService,
    RestoreReplicaSet,
    RestoreService,
}

/// The steps an operation completed, failed and compensated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: Vec<Step>,
    pub failed: Vec<Step>,
    pub compensated: Vec<Step>,
    pub compensation_failures: Vec<Step>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits `step_result` and records `step` as completed or failed.
    pub async fn run<T, E>(
        &mut self,
        step: Step,
        step_result: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let result = step_result.await;
        match result {
            Ok(_) => self.completed.push(step),
            Err(_) => self.failed.push(step),
        }
        result
    }

    /// Awaits the compensating `step_result` and records whether it worked.
    /// The error is handed back for logging only.
    pub async fn compensate<E>(
        &mut self,
        step: Step,
        step_result: impl Future<Output = Result<(), E>>,
    ) -> Result<(), E> {
        let result = step_result.await;
        match result {
            Ok(()) => self.compensated.push(step),
            Err(_) => self.compensation_failures.push(step),
        }
        result
    }

    pub fn has_completed(&self, step: Step) -> bool {
        self.completed.contains(&step)
    }
}

struct Steps<'a>(&'a [Step]);

impl Display for Steps<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, step) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections = [
            ("completed", &self.completed),
            ("failed", &self.failed),
            ("compensated", &self.compensated),
            ("compensation failed", &self.compensation_failures),
        ];

        let mut first = true;
        for (label, steps) in sections {
            if steps.is_empty() {
                continue;
            }
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{label}: {}", Steps(steps))?;
        }

        if first {
            f.write_str("no steps run")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_outcome_of_each_step() {
        let mut progress = Progress::new();
        progress
            .run(Step::BuildImage, async { Ok::<_, ()>(()) })
            .await
            .unwrap();
        progress
            .run(Step::CreateReplicaSet, async { Err::<(), _>("boom") })
            .await
            .unwrap_err();
        progress
            .compensate(Step::RestoreReplicaSet, async { Ok::<_, ()>(()) })
            .await
            .unwrap();

        assert!(progress.has_completed(Step::BuildImage));
        assert!(!progress.has_completed(Step::CreateReplicaSet));
        assert_eq!(
            progress.to_string(),
            "completed: build-image; failed: create-replica-set; compensated: restore-replica-set"
        );
    }

    #[test]
    fn empty_progress() {
        assert_eq!(Progress::new().to_string(), "no steps run");
    }
}
