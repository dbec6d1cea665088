//! Firewall policy validation, run on the whole plan before any mutation.
//!
//! For every chain in the plan:
//! - no rule may be shadowed by an earlier ACCEPT/DROP/REJECT rule whose
//!   match covers it (`UnreachableRule`);
//! - the chain must be closed: either its effective policy is DROP, or it was
//!   explicitly declared with policy ACCEPT, or its last rule is a catch-all
//!   terminal rule (`OpenChainPolicy`).
//!
//! The effective policy is the declared one if the plan declares the chain,
//! otherwise whatever the provider reported for it.

use std::collections::HashMap;

use tracing::debug;

use crate::convergence::planner::ConvergencePlan;
use crate::error::PolicyError;
use crate::firewall::matcher::MatchSpec;
use crate::types::firewall::{ChainKey, ChainPolicy};
use crate::types::resource::{ChainSpec, Resource};

#[derive(Debug, Default, Clone)]
pub struct FirewallPolicyValidator {
    observed: HashMap<ChainKey, ChainPolicy>,
}

/// Everything the plan says about one chain.
struct ChainView<'a> {
    key: ChainKey,
    declared: Option<&'a ChainSpec>,
    rules: Vec<&'a Resource>,
}

impl FirewallPolicyValidator {
    pub fn new() -> Self {
        FirewallPolicyValidator::default()
    }

    /// Record the policy the provider currently reports for a chain.
    pub fn observe(&mut self, key: ChainKey, policy: ChainPolicy) {
        self.observed.insert(key, policy);
    }

    pub fn with_observed(mut self, key: ChainKey, policy: ChainPolicy) -> Self {
        self.observe(key, policy);
        self
    }

    pub fn validate(&self, plan: &ConvergencePlan) -> Result<(), PolicyError> {
        for view in chain_views(plan) {
            check_reachability(&view)?;
            self.check_closed(&view)?;
            debug!(chain = %view.key, rules = view.rules.len(), "chain policy valid");
        }
        Ok(())
    }

    fn check_closed(&self, view: &ChainView<'_>) -> Result<(), PolicyError> {
        let declared = view.declared.and_then(|c| c.policy);
        match declared.or_else(|| self.observed.get(&view.key).copied()) {
            Some(ChainPolicy::Drop) => return Ok(()),
            // Declared ACCEPT is an explicit choice to leave the chain open.
            Some(ChainPolicy::Accept) if declared.is_some() => return Ok(()),
            _ => {}
        }
        let closed = view.rules.last().and_then(|r| r.as_rule()).map_or(false, |rule| {
            rule.target.is_terminal() && MatchSpec::parse(&rule.match_expr).is_unconditional()
        });
        if closed {
            Ok(())
        } else {
            Err(PolicyError::OpenChainPolicy {
                chain: view.key.clone(),
            })
        }
    }
}

fn check_reachability(view: &ChainView<'_>) -> Result<(), PolicyError> {
    let specs: Vec<MatchSpec> = view
        .rules
        .iter()
        .filter_map(|r| r.as_rule())
        .map(|rule| MatchSpec::parse(&rule.match_expr))
        .collect();
    for (later, later_spec) in specs.iter().enumerate() {
        for (earlier, earlier_spec) in specs.iter().enumerate().take(later) {
            let terminal = view.rules[earlier]
                .as_rule()
                .map_or(false, |r| r.target.is_terminal());
            if terminal && earlier_spec.covers(later_spec) {
                return Err(PolicyError::UnreachableRule {
                    rule: view.rules[later].id.clone(),
                    shadowed_by: view.rules[earlier].id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Group chains and rules in order of first appearance in the plan.
fn chain_views(plan: &ConvergencePlan) -> Vec<ChainView<'_>> {
    let mut views: Vec<ChainView<'_>> = Vec::new();
    let mut slot: HashMap<ChainKey, usize> = HashMap::new();
    for r in plan.iter() {
        let key = match (r.as_chain(), r.as_rule()) {
            (Some(chain), _) => chain.key(),
            (_, Some(rule)) => rule.chain_key(),
            _ => continue,
        };
        let i = *slot.entry(key.clone()).or_insert_with(|| {
            views.push(ChainView {
                key,
                declared: None,
                rules: Vec::new(),
            });
            views.len() - 1
        });
        match r.as_chain() {
            Some(chain) => views[i].declared = Some(chain),
            None => views[i].rules.push(r),
        }
    }
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::planner::plan;
    use crate::graph::ResourceGraph;
    use crate::types::firewall::{Table, Target};
    use crate::types::resource::DesiredState;

    fn plan_of(resources: Vec<Resource>) -> ConvergencePlan {
        plan(&ResourceGraph::from_resources(resources).unwrap()).unwrap()
    }

    fn custom_chain() -> Resource {
        Resource::chain(Table::Filter, "FW_EXTERNAL", None)
    }

    #[test]
    fn allow_list_then_deny_all_passes() {
        let p = plan_of(vec![
            custom_chain(),
            Resource::rule("ssh", "FW_EXTERNAL", "-p tcp --dport 22", Target::Accept),
            Resource::rule("established", "FW_EXTERNAL", "-m state --state ESTABLISHED,RELATED", Target::Accept),
            Resource::rule("deny", "FW_EXTERNAL", "", Target::Drop),
        ]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_ok());
    }

    #[test]
    fn final_reject_with_options_closes_chain() {
        let mut reset = Resource::rule("reset", "FW_EXTERNAL", "", Target::Reject);
        if let DesiredState::FirewallRule(r) = &mut reset.desired {
            r.target_args = "--reject-with tcp-reset".into();
        }
        let p = plan_of(vec![
            custom_chain(),
            Resource::rule("ssh", "FW_EXTERNAL", "-p tcp --dport 22", Target::Accept),
            reset,
        ]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_ok());
    }

    #[test]
    fn rule_after_deny_all_is_unreachable() {
        let p = plan_of(vec![
            custom_chain(),
            Resource::rule("deny", "FW_EXTERNAL", "", Target::Drop),
            Resource::rule("ssh", "FW_EXTERNAL", "-p tcp --dport 22", Target::Accept),
        ]);
        match FirewallPolicyValidator::new().validate(&p) {
            Err(PolicyError::UnreachableRule { rule, shadowed_by }) => {
                assert_eq!(rule.name, "ssh");
                assert_eq!(shadowed_by.name, "deny");
            }
            other => panic!("expected UnreachableRule, got {:?}", other),
        }
    }

    #[test]
    fn interface_deny_shadows_interface_specific_rule() {
        let p = plan_of(vec![
            Resource::rule("deny_eth0", "INPUT", "-i eth0", Target::Drop),
            Resource::rule("ssh", "INPUT", "-p tcp --dport 22 -i eth0", Target::Accept),
            Resource::rule("deny", "INPUT", "", Target::Drop),
        ]);
        let err = FirewallPolicyValidator::new().validate(&p).unwrap_err();
        assert!(matches!(err, PolicyError::UnreachableRule { rule, .. } if rule.name == "ssh"));
    }

    #[test]
    fn jump_rules_do_not_shadow() {
        let p = plan_of(vec![
            custom_chain(),
            Resource::rule("to_external", "INPUT", "", Target::from("FW_EXTERNAL")),
            Resource::rule("deny", "INPUT", "", Target::Drop),
            Resource::rule("ext_deny", "FW_EXTERNAL", "", Target::Drop),
        ]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_ok());
    }

    #[test]
    fn open_chain_without_deny_fails() {
        let p = plan_of(vec![Resource::rule(
            "ssh",
            "INPUT",
            "-p tcp --dport 22",
            Target::Accept,
        )]);
        let validator = FirewallPolicyValidator::new()
            .with_observed(ChainKey::new(Table::Filter, "INPUT"), ChainPolicy::Accept);
        match validator.validate(&p) {
            Err(PolicyError::OpenChainPolicy { chain }) => assert_eq!(chain.chain, "INPUT"),
            other => panic!("expected OpenChainPolicy, got {:?}", other),
        }
    }

    #[test]
    fn unknown_policy_treated_as_open() {
        let p = plan_of(vec![Resource::rule("ssh", "INPUT", "-p tcp --dport 22", Target::Accept)]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_err());
    }

    #[test]
    fn observed_drop_policy_closes_chain() {
        let p = plan_of(vec![Resource::rule("ssh", "INPUT", "-p tcp --dport 22", Target::Accept)]);
        let validator = FirewallPolicyValidator::new()
            .with_observed(ChainKey::new(Table::Filter, "INPUT"), ChainPolicy::Drop);
        assert!(validator.validate(&p).is_ok());
    }

    #[test]
    fn declared_policy_overrides_observed() {
        let p = plan_of(vec![
            Resource::chain(Table::Filter, "INPUT", Some(ChainPolicy::Drop)),
            Resource::rule("ssh", "INPUT", "-p tcp --dport 22", Target::Accept),
        ]);
        let validator = FirewallPolicyValidator::new()
            .with_observed(ChainKey::new(Table::Filter, "INPUT"), ChainPolicy::Accept);
        assert!(validator.validate(&p).is_ok());
    }

    #[test]
    fn explicitly_open_output_chain_passes() {
        let p = plan_of(vec![
            Resource::chain(Table::Filter, "OUTPUT", Some(ChainPolicy::Accept)),
            Resource::rule("outbound", "OUTPUT", "-o eth0 -d 0.0.0.0/0", Target::Accept),
        ]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_ok());
    }

    #[test]
    fn catch_all_accept_is_explicitly_open() {
        let p = plan_of(vec![
            Resource::rule("ssh", "OUTPUT", "-p tcp --dport 22", Target::Drop),
            Resource::rule("rest", "OUTPUT", "-d 0.0.0.0/0", Target::Accept),
        ]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_ok());
    }

    #[test]
    fn interface_scoped_deny_does_not_close_chain() {
        let p = plan_of(vec![
            Resource::rule("ssh", "INPUT", "-p tcp --dport 22 -i eth0", Target::Accept),
            Resource::rule("deny_eth0", "INPUT", "-i eth0", Target::Drop),
        ]);
        let err = FirewallPolicyValidator::new().validate(&p).unwrap_err();
        assert!(matches!(err, PolicyError::OpenChainPolicy { .. }));
    }

    #[test]
    fn declared_custom_chain_without_rules_is_open() {
        let p = plan_of(vec![custom_chain()]);
        assert!(matches!(
            FirewallPolicyValidator::new().validate(&p),
            Err(PolicyError::OpenChainPolicy { .. })
        ));
    }

    #[test]
    fn plans_without_firewall_resources_pass() {
        let p = plan_of(vec![Resource::package("perl")]);
        assert!(FirewallPolicyValidator::new().validate(&p).is_ok());
    }
}
