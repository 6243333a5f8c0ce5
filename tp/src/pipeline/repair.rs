//! Bounded fix-and-retest loop for the Debugging phase

use tracing::{debug, info, warn};

use crate::domain::{ErrorInfo, Phase};
use crate::services::{Fixer, TaskContext, Tester};
use crate::state::{RegistryError, TaskRegistry};

use super::engine::run_tests_recovering;

/// How the repair loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOutcome {
    /// A retest passed
    pub resolved: bool,

    /// Fix/retest cycles performed
    pub cycles: u32,
}

/// Pairs a fix attempt with a retest, at most `max_retries` times
#[derive(Debug, Clone, Copy)]
pub struct RepairLoop {
    max_retries: u32,
}

impl RepairLoop {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Run until a retest passes or the budget is spent
    ///
    /// Each cycle targets the most recently recorded error. A failed retest
    /// records a new error, which becomes the next cycle's target.
    pub async fn run(
        &self,
        registry: &TaskRegistry,
        fixer: &dyn Fixer,
        tester: &dyn Tester,
        ctx: &TaskContext,
    ) -> Result<RepairOutcome, RegistryError> {
        debug!(task_id = %ctx.task_id, max_retries = self.max_retries, "RepairLoop::run: called");
        let mut cycles = 0;

        while cycles < self.max_retries {
            let snapshot = registry.get_required(&ctx.task_id).await?;
            let Some(target) = snapshot.errors.last().cloned() else {
                debug!(task_id = %ctx.task_id, "RepairLoop::run: no error to repair");
                break;
            };
            cycles += 1;

            registry
                .update_progress(
                    &ctx.task_id,
                    Phase::Debugging,
                    f64::from(cycles - 1) / f64::from(self.max_retries),
                    format!("fix attempt {}/{}: {}", cycles, self.max_retries, target.error_type),
                )
                .await?;

            match fixer.fix_error(ctx, &target).await {
                Ok(true) => debug!(task_id = %ctx.task_id, cycles, "RepairLoop::run: fix attempted"),
                Ok(false) => debug!(task_id = %ctx.task_id, cycles, "RepairLoop::run: fixer declined"),
                Err(e) => warn!(task_id = %ctx.task_id, error = %e, "Fix attempt failed"),
            }

            let outcome = run_tests_recovering(tester, ctx).await;
            if outcome.success {
                info!(task_id = %ctx.task_id, cycles, "Retest passed");
                return Ok(RepairOutcome { resolved: true, cycles });
            }

            registry
                .push_error(
                    &ctx.task_id,
                    ErrorInfo::new("test_failure", outcome.output).with_attempts(cycles),
                )
                .await?;
        }

        info!(task_id = %ctx.task_id, cycles, "Repair budget exhausted");
        Ok(RepairOutcome {
            resolved: false,
            cycles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Plan;
    use crate::services::mock::{MockFixer, MockTester};

    async fn setup() -> (TaskRegistry, TaskContext) {
        let registry = TaskRegistry::spawn();
        registry.create("t-1", "demo", "/tmp/t-1").await.unwrap();
        registry
            .push_error("t-1", ErrorInfo::new("test_failure", "initial"))
            .await
            .unwrap();
        let ctx = TaskContext {
            task_id: "t-1".to_string(),
            description: "demo".to_string(),
            workdir: "/tmp/t-1".into(),
            plan: Plan::default(),
        };
        (registry, ctx)
    }

    #[tokio::test]
    async fn test_exhausts_budget_when_tests_keep_failing() {
        let (registry, ctx) = setup().await;
        let fixer = MockFixer::default();
        let tester = MockTester::always(false);

        let outcome = RepairLoop::new(2).run(&registry, &fixer, &tester, &ctx).await.unwrap();
        assert_eq!(outcome, RepairOutcome { resolved: false, cycles: 2 });
        assert_eq!(fixer.calls(), 2);
        assert_eq!(tester.calls(), 2);

        let errors = registry.get_required("t-1").await.unwrap().errors;
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[2].attempts, 2);
    }

    #[tokio::test]
    async fn test_exits_on_first_successful_retest() {
        let (registry, ctx) = setup().await;
        let fixer = MockFixer::default();
        let tester = MockTester::new(vec![false, true, false]);

        let outcome = RepairLoop::new(5).run(&registry, &fixer, &tester, &ctx).await.unwrap();
        assert_eq!(outcome, RepairOutcome { resolved: true, cycles: 2 });
        assert_eq!(tester.calls(), 2);
    }

    #[tokio::test]
    async fn test_targets_most_recent_error() {
        let (registry, ctx) = setup().await;
        let fixer = MockFixer::default();
        let tester = MockTester::always(false);

        RepairLoop::new(2).run(&registry, &fixer, &tester, &ctx).await.unwrap();
        let targets = fixer.targets.lock().unwrap().clone();
        assert_eq!(targets, vec!["initial".to_string(), "1 test failed".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_budget_runs_nothing() {
        let (registry, ctx) = setup().await;
        let fixer = MockFixer::default();
        let tester = MockTester::always(false);

        let outcome = RepairLoop::new(0).run(&registry, &fixer, &tester, &ctx).await.unwrap();
        assert_eq!(outcome, RepairOutcome { resolved: false, cycles: 0 });
        assert_eq!(fixer.calls(), 0);
    }
}
