//! The convergence pipeline:
//! declarations → graph → plan → firewall validation → execution → report.
//!
//! Everything up to and including validation is side-effect free. Any error
//! there aborts the run before the first `Apply`.

use tracing::info;

use crate::convergence::executor::ConvergenceExecutor;
use crate::convergence::planner::{self, ConvergencePlan};
use crate::error::Result;
use crate::firewall::validator::FirewallPolicyValidator;
use crate::graph::ResourceGraph;
use crate::infrastructure::ProviderSet;
use crate::types::config::EngineSettings;
use crate::types::firewall::ChainKey;
use crate::types::report::ConvergenceReport;
use crate::types::resource::{Resource, ResourceKind};
use crate::types::state::ObservedState;

pub struct Engine {
    settings: EngineSettings,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Engine { settings }
    }

    /// Build and order the graph. No provider is consulted.
    pub fn plan(&self, resources: Vec<Resource>) -> Result<ConvergencePlan> {
        let graph = ResourceGraph::from_resources(resources)?;
        let plan = planner::plan(&graph)?;
        info!(resources = plan.len(), "plan ready");
        Ok(plan)
    }

    /// Plan, then validate firewall policy against the policies the chain
    /// provider currently reports. Read-only on the host.
    pub fn validate(&self, resources: Vec<Resource>, providers: &ProviderSet) -> Result<ConvergencePlan> {
        let plan = self.plan(resources)?;
        let validator = observe_policies(&plan, providers)?;
        validator.validate(&plan)?;
        Ok(plan)
    }

    /// Full run. Structural errors come back as `Err` with nothing applied;
    /// runtime failures are recorded in the report.
    pub fn converge(&self, resources: Vec<Resource>, providers: &mut ProviderSet) -> Result<ConvergenceReport> {
        let plan = self.validate(resources, providers)?;
        let executor = ConvergenceExecutor::new(self.settings.retry_policy());
        Ok(executor.execute(&plan, providers))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineSettings::default())
    }
}

/// Ask the chain provider for the live policy of every chain a rule in the
/// plan lives in. Undeclared chains are queried through a policy-less
/// stand-in declaration.
fn observe_policies(plan: &ConvergencePlan, providers: &ProviderSet) -> Result<FirewallPolicyValidator> {
    let mut validator = FirewallPolicyValidator::new();
    let mut seen: Vec<ChainKey> = Vec::new();
    for r in plan.iter() {
        let key = match (r.as_chain(), r.as_rule()) {
            (Some(c), _) => c.key(),
            (_, Some(rule)) => rule.chain_key(),
            _ => continue,
        };
        if seen.contains(&key) {
            continue;
        }
        seen.push(key.clone());
        let stand_in = Resource::chain(key.table, &key.chain, None);
        let provider = providers.get(ResourceKind::FirewallChain)?;
        if let ObservedState::Chain { policy: Some(policy) } = provider.current_state(&stand_in)? {
            validator.observe(key, policy);
        }
    }
    Ok(validator)
}
