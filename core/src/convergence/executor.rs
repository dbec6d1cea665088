//! Convergence executor: walks a plan through providers with bounded retry.
//!
//! Per resource: observe, skip if already satisfied, otherwise apply. A
//! failed apply is fatal for the run. Service applies first get the retry
//! budget of the `RetryPolicy`. After a fatal failure no further provider
//! call is made and every remaining resource is reported `Skipped`.

use std::thread;

use tracing::{debug, error, info, warn};

use crate::convergence::planner::ConvergencePlan;
use crate::convergence::retry::RetryPolicy;
use crate::error::ProviderError;
use crate::infrastructure::ProviderSet;
use crate::types::report::{Action, ConvergenceReport, ResourceOutcome};
use crate::types::resource::Resource;

/// Runs a plan strictly sequentially, in plan order.
pub struct ConvergenceExecutor {
    policy: RetryPolicy,
}

impl ConvergenceExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        ConvergenceExecutor { policy }
    }

    pub fn execute(&self, plan: &ConvergencePlan, providers: &mut ProviderSet) -> ConvergenceReport {
        let mut report = ConvergenceReport::new();
        let mut steps = plan.iter();

        for resource in steps.by_ref() {
            let outcome = self.converge_one(resource, providers);
            let fatal = outcome.action == Action::Failed;
            report.push(outcome);
            if fatal {
                error!(resource = %resource.id, "fatal failure; aborting run");
                break;
            }
        }
        for resource in steps {
            report.push(ResourceOutcome::new(resource.id.clone(), Action::Skipped, 0));
        }

        let s = report.summary();
        info!(
            noop = s.noop,
            created = s.created,
            updated = s.updated,
            failed = s.failed,
            skipped = s.skipped,
            "convergence finished"
        );
        report
    }

    fn converge_one(&self, resource: &Resource, providers: &mut ProviderSet) -> ResourceOutcome {
        let id = resource.id.clone();
        let provider = match providers.get_mut(resource.kind()) {
            Ok(p) => p,
            Err(e) => return ResourceOutcome::failed(id, 0, e.to_string()),
        };

        let observed = match provider.current_state(resource) {
            Ok(state) => state,
            Err(e) => return ResourceOutcome::failed(id, 0, e.to_string()),
        };
        if resource.desired.is_satisfied_by(&observed) {
            debug!(resource = %id, "already converged");
            return ResourceOutcome::new(id, Action::NoOp, 0);
        }

        let budget = self.policy.attempts_for(resource.kind());
        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(resource = %id, attempt = attempts, "applying");
            match provider.apply(resource) {
                Ok(out) if !out.changed => return ResourceOutcome::new(id, Action::NoOp, attempts),
                Ok(_) => {
                    let action = if observed.is_absent() {
                        Action::Created
                    } else {
                        Action::Updated
                    };
                    info!(resource = %id, %action, attempts, "applied");
                    return ResourceOutcome::new(id, action, attempts);
                }
                Err(e) if attempts < budget && matches!(e, ProviderError::ApplyFailed { .. }) => {
                    let wait = self.policy.delay(attempts - 1);
                    warn!(resource = %id, attempt = attempts, error = %e, ?wait, "apply failed; retrying");
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                }
                Err(e) => return ResourceOutcome::failed(id, attempts, e.to_string()),
            }
        }
    }
}
