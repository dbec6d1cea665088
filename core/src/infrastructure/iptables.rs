//! iptables-backed chain and rule providers.
//!
//! Rules are checked with `iptables -C`, located in the `-S` listing, and
//! inserted at their declared position (`-I <chain> <position + 1>`). A rule
//! found at any other index is deleted and re-inserted. Applied in plan
//! order, that reproduces the declared sequence in a chain the engine owns.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::firewall::matcher::MatchSpec;
use crate::types::firewall::{ChainKey, ChainPolicy};
use crate::types::resource::{ChainSpec, DesiredState, Resource, ResourceKind, RuleSpec};
use crate::types::state::ObservedState;

use super::runner::{shell_escape, CommandRunner};
use super::{ApplyOutcome, Provider};

// ---------------------------------------------------------------------------
// Command builder
// ---------------------------------------------------------------------------

/// `iptables -t <table> -S <chain>`
pub fn list_chain(key: &ChainKey) -> String {
    format!("iptables -t {} -S {}", key.table, shell_escape(&key.chain))
}

/// `iptables -t <table> -N <chain>`
pub fn new_chain(key: &ChainKey) -> String {
    format!("iptables -t {} -N {}", key.table, shell_escape(&key.chain))
}

/// `iptables -t <table> -P <chain> <policy>`
pub fn set_policy(key: &ChainKey, policy: ChainPolicy) -> String {
    format!("iptables -t {} -P {} {}", key.table, shell_escape(&key.chain), policy)
}

/// `iptables -t <table> -C <chain> <rule>`
pub fn check_rule(rule: &RuleSpec) -> String {
    format!("iptables -t {} -C {}{}", rule.table, shell_escape(&rule.chain), rule_suffix(rule))
}

/// `iptables -t <table> -D <chain> <rule>`
pub fn delete_rule(rule: &RuleSpec) -> String {
    format!("iptables -t {} -D {}{}", rule.table, shell_escape(&rule.chain), rule_suffix(rule))
}

/// `iptables -t <table> -I <chain> <position+1> <rule>`
pub fn insert_rule(rule: &RuleSpec) -> String {
    format!(
        "iptables -t {} -I {} {}{}",
        rule.table,
        shell_escape(&rule.chain),
        rule.position + 1,
        rule_suffix(rule)
    )
}

/// `<match> -j <target> <target args>`. Match expression and target options
/// are passed through verbatim: they are already in iptables argument syntax.
fn rule_suffix(rule: &RuleSpec) -> String {
    let mut out = String::new();
    let expr = rule.match_expr.trim();
    if !expr.is_empty() {
        out.push(' ');
        out.push_str(expr);
    }
    out.push_str(" -j ");
    out.push_str(&shell_escape(rule.target.as_str()));
    let args = rule.target_args.trim();
    if !args.is_empty() {
        out.push(' ');
        out.push_str(args);
    }
    out
}

/// Index of `rule` among the `-A <chain>` lines of a `-S` listing.
///
/// Lines are compared by target and normalized match, so `-p tcp -m tcp
/// --dport 22` in the listing finds a rule declared as `-p tcp --dport 22`.
/// Listed target options are only compared when the rule declares some,
/// since iptables prints defaults (`--reject-with icmp-port-unreachable`).
pub fn rule_position(output: &str, rule: &RuleSpec) -> Option<usize> {
    let wanted = MatchSpec::parse(&rule.match_expr);
    let wanted_args: Vec<&str> = rule.target_args.split_whitespace().collect();
    output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<&str>>())
        .filter(|words| words.len() >= 2 && words[0] == "-A" && words[1] == rule.chain)
        .position(|words| {
            let rest = &words[2..];
            let Some(j) = rest.iter().position(|w| *w == "-j") else {
                return false;
            };
            let target = rest.get(j + 1).copied();
            let args = rest.get(j + 2..).unwrap_or(&[]);
            target == Some(rule.target.as_str())
                && (wanted_args.is_empty() || args == wanted_args.as_slice())
                && MatchSpec::parse(&rest[..j].join(" ")) == wanted
        })
}

/// Read the chain's policy from `-S` output. Built-in chains print
/// `-P INPUT ACCEPT`; user-defined chains print `-N NAME`.
pub fn parse_listing(output: &str, chain: &str) -> ObservedState {
    for line in output.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["-P", name, policy] if *name == chain => {
                return ObservedState::Chain {
                    policy: policy.parse().ok(),
                };
            }
            ["-N", name] if *name == chain => return ObservedState::Chain { policy: None },
            _ => {}
        }
    }
    ObservedState::Chain { policy: None }
}

// ---------------------------------------------------------------------------
// Chain provider
// ---------------------------------------------------------------------------

pub struct IptablesChainProvider {
    runner: Rc<dyn CommandRunner>,
}

impl IptablesChainProvider {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        IptablesChainProvider { runner }
    }
}

fn chain_of(resource: &Resource) -> Result<&ChainSpec, ProviderError> {
    resource.as_chain().ok_or_else(|| {
        ProviderError::unavailable(
            ResourceKind::FirewallChain,
            format!("{} is not a chain", resource.id),
        )
    })
}

impl Provider for IptablesChainProvider {
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError> {
        let key = chain_of(resource)?.key();
        match self.runner.run(&list_chain(&key)) {
            Ok(out) => Ok(parse_listing(&out, &key.chain)),
            Err(e) if key.is_builtin() => Err(ProviderError::unavailable(ResourceKind::FirewallChain, e)),
            Err(_) => Ok(ObservedState::Absent),
        }
    }

    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError> {
        let spec = chain_of(resource)?;
        let key = spec.key();
        let mut cmds = Vec::new();
        if !key.is_builtin() && self.current_state(resource)?.is_absent() {
            cmds.push(new_chain(&key));
        }
        if let Some(policy) = spec.policy {
            cmds.push(set_policy(&key, policy));
        }
        for cmd in &cmds {
            debug!(chain = %key, %cmd, "chain apply");
            self.runner.run(cmd).map_err(ProviderError::apply_failed)?;
        }
        Ok(ApplyOutcome {
            changed: !cmds.is_empty(),
        })
    }
}

// ---------------------------------------------------------------------------
// Rule provider
// ---------------------------------------------------------------------------

pub struct IptablesRuleProvider {
    runner: Rc<dyn CommandRunner>,
}

impl IptablesRuleProvider {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        IptablesRuleProvider { runner }
    }
}

fn rule_of(resource: &Resource) -> Result<&RuleSpec, ProviderError> {
    match &resource.desired {
        DesiredState::FirewallRule(r) => Ok(r),
        _ => Err(ProviderError::unavailable(
            ResourceKind::FirewallRule,
            format!("{} is not a rule", resource.id),
        )),
    }
}

impl Provider for IptablesRuleProvider {
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError> {
        let rule = rule_of(resource)?;
        // `-C` exits 1 when the rule is missing (or its chain is).
        if self.runner.run(&check_rule(rule)).is_err() {
            return Ok(ObservedState::Absent);
        }
        let listing = self
            .runner
            .run(&list_chain(&rule.chain_key()))
            .map_err(|e| ProviderError::unavailable(ResourceKind::FirewallRule, e))?;
        let position = rule_position(&listing, rule);
        if position.is_none() {
            warn!(rule = %resource.id, "rule exists but is not in the chain listing; position unchecked");
        }
        Ok(ObservedState::Rule { position })
    }

    /// Insert at the declared position. A rule already in the chain is in the
    /// wrong place, so it is deleted first.
    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError> {
        let rule = rule_of(resource)?;
        let mut cmds = Vec::new();
        if !self.current_state(resource)?.is_absent() {
            cmds.push(delete_rule(rule));
        }
        cmds.push(insert_rule(rule));
        for cmd in &cmds {
            debug!(rule = %resource.id, %cmd, "rule apply");
            self.runner.run(cmd).map_err(ProviderError::apply_failed)?;
        }
        Ok(ApplyOutcome::changed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::MockRunner;
    use crate::types::firewall::{Table, Target};

    fn ssh_rule(position: usize) -> RuleSpec {
        RuleSpec {
            chain: "FW_EXTERNAL".into(),
            table: Table::Filter,
            match_expr: "-p tcp --dport 22 -i eth0".into(),
            target: Target::Accept,
            target_args: String::new(),
            position,
        }
    }

    fn rule_resource(spec: RuleSpec) -> Resource {
        Resource::new("ssh", DesiredState::FirewallRule(spec))
    }

    const REVERSED: &str = "-N FW_EXTERNAL\n\
        -A FW_EXTERNAL -j DROP\n\
        -A FW_EXTERNAL -i eth0 -p tcp -m tcp --dport 22 -j ACCEPT\n";

    #[test]
    fn rule_commands() {
        assert_eq!(
            check_rule(&ssh_rule(0)),
            "iptables -t filter -C FW_EXTERNAL -p tcp --dport 22 -i eth0 -j ACCEPT"
        );
        assert_eq!(
            insert_rule(&ssh_rule(2)),
            "iptables -t filter -I FW_EXTERNAL 3 -p tcp --dport 22 -i eth0 -j ACCEPT"
        );
    }

    #[test]
    fn catch_all_rule_has_no_match_args() {
        let mut r = ssh_rule(1);
        r.match_expr = String::new();
        r.target = Target::Drop;
        assert_eq!(insert_rule(&r), "iptables -t filter -I FW_EXTERNAL 2 -j DROP");
    }

    #[test]
    fn parse_builtin_listing() {
        let out = "-P INPUT DROP\n-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT\n";
        assert_eq!(
            parse_listing(out, "INPUT"),
            ObservedState::Chain { policy: Some(ChainPolicy::Drop) }
        );
    }

    #[test]
    fn parse_custom_listing() {
        assert_eq!(
            parse_listing("-N FW_EXTERNAL\n", "FW_EXTERNAL"),
            ObservedState::Chain { policy: None }
        );
    }

    #[test]
    fn missing_custom_chain_is_created() {
        let runner = Rc::new(MockRunner::with_responses(vec![
            Err("iptables: No chain/target/match by that name.".into()),
            Ok(String::new()),
        ]));
        let mut p = IptablesChainProvider::new(runner.clone());
        let r = Resource::chain(Table::Filter, "FW_EXTERNAL", None);
        assert!(p.apply(&r).unwrap().changed);
        assert_eq!(
            runner.executed_commands(),
            vec!["iptables -t filter -S FW_EXTERNAL", "iptables -t filter -N FW_EXTERNAL"]
        );
    }

    #[test]
    fn builtin_chain_only_sets_policy() {
        let runner = Rc::new(MockRunner::new());
        let mut p = IptablesChainProvider::new(runner.clone());
        let r = Resource::chain(Table::Filter, "INPUT", Some(ChainPolicy::Drop));
        p.apply(&r).unwrap();
        assert_eq!(runner.executed_commands(), vec!["iptables -t filter -P INPUT DROP"]);
    }

    #[test]
    fn builtin_listing_failure_means_backend_down() {
        let runner = Rc::new(MockRunner::with_responses(vec![Err("iptables: command not found".into())]));
        let p = IptablesChainProvider::new(runner);
        let r = Resource::chain(Table::Filter, "INPUT", None);
        assert!(matches!(p.current_state(&r), Err(ProviderError::Unavailable { .. })));
    }

    #[test]
    fn reject_options_follow_the_target() {
        let mut r = ssh_rule(1);
        r.match_expr = String::new();
        r.target = Target::Reject;
        r.target_args = "--reject-with tcp-reset".into();
        assert_eq!(
            insert_rule(&r),
            "iptables -t filter -I FW_EXTERNAL 2 -j REJECT --reject-with tcp-reset"
        );
        assert_eq!(
            delete_rule(&r),
            "iptables -t filter -D FW_EXTERNAL -j REJECT --reject-with tcp-reset"
        );
    }

    #[test]
    fn position_found_in_listing() {
        assert_eq!(rule_position(REVERSED, &ssh_rule(0)), Some(1));

        let mut deny = ssh_rule(1);
        deny.match_expr = String::new();
        deny.target = Target::Drop;
        assert_eq!(rule_position(REVERSED, &deny), Some(0));

        let mut other_chain = ssh_rule(0);
        other_chain.chain = "INPUT".into();
        assert_eq!(rule_position(REVERSED, &other_chain), None);
    }

    #[test]
    fn listed_default_target_options_are_ignored() {
        let listing = "-A INPUT -j REJECT --reject-with icmp-port-unreachable\n";
        let mut r = ssh_rule(0);
        r.chain = "INPUT".into();
        r.match_expr = String::new();
        r.target = Target::Reject;
        assert_eq!(rule_position(listing, &r), Some(0));
        r.target_args = "--reject-with tcp-reset".into();
        assert_eq!(rule_position(listing, &r), None);
    }

    #[test]
    fn missing_rule_is_absent_without_listing() {
        let runner = Rc::new(MockRunner::with_responses(vec![Err("Bad rule".into())]));
        let p = IptablesRuleProvider::new(runner.clone());
        assert_eq!(p.current_state(&rule_resource(ssh_rule(0))).unwrap(), ObservedState::Absent);
        assert_eq!(runner.executed_commands().len(), 1);
    }

    #[test]
    fn present_rule_reports_its_index() {
        let runner = Rc::new(MockRunner::with_responses(vec![Ok(String::new()), Ok(REVERSED.into())]));
        let p = IptablesRuleProvider::new(runner.clone());
        let r = rule_resource(ssh_rule(0));
        let seen = p.current_state(&r).unwrap();
        assert_eq!(seen, ObservedState::Rule { position: Some(1) });
        assert!(!r.desired.is_satisfied_by(&seen));
        assert_eq!(runner.executed_commands()[1], "iptables -t filter -S FW_EXTERNAL");
    }

    #[test]
    fn misplaced_rule_is_deleted_then_reinserted() {
        let runner = Rc::new(MockRunner::with_responses(vec![
            Ok(String::new()),
            Ok(REVERSED.into()),
            Ok(String::new()),
            Ok(String::new()),
        ]));
        let mut p = IptablesRuleProvider::new(runner.clone());
        assert!(p.apply(&rule_resource(ssh_rule(0))).unwrap().changed);
        let cmds = runner.executed_commands();
        assert_eq!(
            &cmds[2..],
            &[
                "iptables -t filter -D FW_EXTERNAL -p tcp --dport 22 -i eth0 -j ACCEPT".to_string(),
                "iptables -t filter -I FW_EXTERNAL 1 -p tcp --dport 22 -i eth0 -j ACCEPT".to_string(),
            ]
        );
    }

    #[test]
    fn absent_rule_is_only_inserted() {
        let runner = Rc::new(MockRunner::with_responses(vec![Err("Bad rule".into()), Ok(String::new())]));
        let mut p = IptablesRuleProvider::new(runner.clone());
        p.apply(&rule_resource(ssh_rule(0))).unwrap();
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 2);
        assert!(cmds[1].contains(" -I FW_EXTERNAL 1 "));
    }
}
