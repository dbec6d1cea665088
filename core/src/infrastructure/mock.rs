//! In-memory host for testing.
//!
//! `MockHost` holds the observed state of every resource and records every
//! apply, making it easy to write deterministic tests for the executor and
//! the full pipeline. Failures and outages can be scripted per resource or
//! per kind.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::ProviderError;
use crate::types::firewall::ChainKey;
use crate::types::resource::{DesiredState, PackageAction, Resource, ResourceId, ResourceKind};
use crate::types::state::ObservedState;

use super::{ApplyOutcome, Provider, ProviderSet};

pub type SharedHost = Rc<RefCell<MockHost>>;

/// A fake machine.
#[derive(Debug, Default)]
pub struct MockHost {
    /// Observed state by resource. Missing entries observe as `Absent`.
    pub states: HashMap<ResourceId, ObservedState>,
    /// Policies of chains that exist without being declared (built-ins).
    pub chain_policies: HashMap<ChainKey, ObservedState>,
    /// Every successful or failed apply, in call order.
    pub applied: Vec<ResourceId>,
    pub queries: usize,
    failures: HashMap<ResourceId, u32>,
    always_fail: HashSet<ResourceId>,
    unavailable: HashSet<ResourceKind>,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost::default()
    }

    pub fn shared() -> SharedHost {
        Rc::new(RefCell::new(MockHost::new()))
    }

    /// A provider set whose every kind is served by this host.
    pub fn provider_set(host: &SharedHost) -> ProviderSet {
        let mut set = ProviderSet::new();
        for kind in ResourceKind::ALL {
            set.register(kind, Box::new(MockProvider { host: host.clone() }));
        }
        set
    }

    pub fn set_state(&mut self, id: ResourceId, state: ObservedState) {
        self.states.insert(id, state);
    }

    /// Pretend the host already looks the way `resource` wants it to.
    pub fn converge(&mut self, resource: &Resource) {
        self.states.insert(resource.id.clone(), converged_state(&resource.desired));
    }

    pub fn set_chain_policy(&mut self, key: ChainKey, state: ObservedState) {
        self.chain_policies.insert(key, state);
    }

    /// Fail the next `times` applies of `id`, then succeed.
    pub fn fail_times(&mut self, id: ResourceId, times: u32) {
        self.failures.insert(id, times);
    }

    pub fn fail_always(&mut self, id: ResourceId) {
        self.always_fail.insert(id);
    }

    pub fn make_unavailable(&mut self, kind: ResourceKind) {
        self.unavailable.insert(kind);
    }

    pub fn apply_count(&self, id: &ResourceId) -> usize {
        self.applied.iter().filter(|a| *a == id).count()
    }

    fn observe(&self, resource: &Resource) -> ObservedState {
        if let Some(state) = self.states.get(&resource.id) {
            return state.clone();
        }
        if let Some(chain) = resource.as_chain() {
            if let Some(state) = self.chain_policies.get(&chain.key()) {
                return state.clone();
            }
        }
        ObservedState::Absent
    }
}

/// The state a successful apply of `desired` leaves behind.
pub fn converged_state(desired: &DesiredState) -> ObservedState {
    match desired {
        DesiredState::Package(p) => match p.action {
            PackageAction::Install => ObservedState::Package {
                version: p.version.clone().unwrap_or_else(|| "1.0".into()),
            },
            PackageAction::Remove => ObservedState::Absent,
        },
        DesiredState::Service(s) => ObservedState::Service {
            active: s.wants_active().unwrap_or(false),
            enabled: s.wants_enabled().unwrap_or(false),
        },
        DesiredState::File(f) => ObservedState::File {
            owner: f.owner.clone().unwrap_or_else(|| "root".into()),
            mode: f.mode.clone().unwrap_or_else(|| "644".into()),
        },
        DesiredState::FirewallChain(c) => ObservedState::Chain { policy: c.policy },
        DesiredState::FirewallRule(r) => ObservedState::Rule {
            position: Some(r.position),
        },
    }
}

/// Serves one kind from a shared `MockHost`.
pub struct MockProvider {
    host: SharedHost,
}

impl Provider for MockProvider {
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError> {
        let mut host = self.host.borrow_mut();
        if host.unavailable.contains(&resource.kind()) {
            return Err(ProviderError::unavailable(resource.kind(), "mock outage"));
        }
        host.queries += 1;
        Ok(host.observe(resource))
    }

    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError> {
        let mut host = self.host.borrow_mut();
        host.applied.push(resource.id.clone());
        if host.always_fail.contains(&resource.id) {
            return Err(ProviderError::apply_failed(format!("mock: {} refused", resource.id)));
        }
        if let Some(left) = host.failures.get_mut(&resource.id) {
            if *left > 0 {
                *left -= 1;
                return Err(ProviderError::apply_failed(format!("mock: {} transient failure", resource.id)));
            }
        }
        let before = host.observe(resource);
        let after = converged_state(&resource.desired);
        host.states.insert(resource.id.clone(), after.clone());
        // A restart changes the process even when the observed flags don't.
        let restarted = matches!(&resource.desired, DesiredState::Service(s) if s.restarts());
        Ok(ApplyOutcome {
            changed: restarted || before != after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::resource::ServiceAction;

    #[test]
    fn unknown_resource_observes_absent() {
        let host = MockHost::shared();
        let set = MockHost::provider_set(&host);
        let r = Resource::package("perl");
        let seen = set.get(ResourceKind::Package).unwrap().current_state(&r).unwrap();
        assert_eq!(seen, ObservedState::Absent);
        assert_eq!(host.borrow().queries, 1);
    }

    #[test]
    fn apply_records_and_converges() {
        let host = MockHost::shared();
        let mut set = MockHost::provider_set(&host);
        let r = Resource::package("perl");
        let out = set.get_mut(ResourceKind::Package).unwrap().apply(&r).unwrap();
        assert!(out.changed);
        assert!(r.desired.is_satisfied_by(&host.borrow().states[&r.id]));
        assert_eq!(host.borrow().apply_count(&r.id), 1);
    }

    #[test]
    fn scripted_failures_then_success() {
        let host = MockHost::shared();
        let r = Resource::service("netfilter-persistent", &[ServiceAction::Restart]);
        host.borrow_mut().fail_times(r.id.clone(), 2);
        let mut p = MockProvider { host: host.clone() };
        assert!(p.apply(&r).is_err());
        assert!(p.apply(&r).is_err());
        assert!(p.apply(&r).unwrap().changed);
    }

    #[test]
    fn outage_makes_kind_unavailable() {
        let host = MockHost::shared();
        host.borrow_mut().make_unavailable(ResourceKind::FirewallRule);
        let p = MockProvider { host: host.clone() };
        let r = Resource::rule("ssh", "INPUT", "-p tcp --dport 22", "ACCEPT".into());
        assert!(matches!(p.current_state(&r), Err(ProviderError::Unavailable { .. })));
    }

    #[test]
    fn restart_always_reports_change() {
        let host = MockHost::shared();
        let r = Resource::service("netfilter-persistent", &[ServiceAction::Restart]);
        host.borrow_mut().converge(&r);
        let mut p = MockProvider { host: host.clone() };
        assert!(p.apply(&r).unwrap().changed);
    }
}
