//! Provider capability interface and host backends.
//!
//! A `Provider` inspects and mutates one kind of resource on the host. The
//! engine only ever touches the host through these two calls. Concrete
//! providers build command strings and hand them to a `CommandRunner`;
//! `mock` provides an in-memory host for tests.

pub mod apt;
pub mod fetch;
pub mod iptables;
pub mod mock;
pub mod runner;
pub mod systemd;

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::ProviderError;
use crate::types::resource::{Resource, ResourceKind};
use crate::types::state::ObservedState;

use runner::CommandRunner;

/// Result of a successful `apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub changed: bool,
}

impl ApplyOutcome {
    pub fn changed() -> Self {
        ApplyOutcome { changed: true }
    }
}

/// Inspection and mutation of one resource kind.
pub trait Provider {
    /// Observe the host. Must not mutate anything.
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError>;

    /// Bring the host in line with `resource.desired`.
    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError>;
}

/// One provider per resource kind.
#[derive(Default)]
pub struct ProviderSet {
    providers: HashMap<ResourceKind, Box<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        ProviderSet::default()
    }

    /// Command-backed providers for a Debian-family host with systemd and
    /// iptables, all sharing one runner.
    pub fn host(runner: Rc<dyn CommandRunner>) -> Self {
        ProviderSet::new()
            .with(ResourceKind::Package, Box::new(apt::AptProvider::new(runner.clone())))
            .with(ResourceKind::Service, Box::new(systemd::SystemdProvider::new(runner.clone())))
            .with(ResourceKind::File, Box::new(fetch::FetchProvider::new(runner.clone())))
            .with(
                ResourceKind::FirewallChain,
                Box::new(iptables::IptablesChainProvider::new(runner.clone())),
            )
            .with(ResourceKind::FirewallRule, Box::new(iptables::IptablesRuleProvider::new(runner)))
    }

    pub fn register(&mut self, kind: ResourceKind, provider: Box<dyn Provider>) {
        self.providers.insert(kind, provider);
    }

    pub fn with(mut self, kind: ResourceKind, provider: Box<dyn Provider>) -> Self {
        self.register(kind, provider);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&dyn Provider, ProviderError> {
        self.providers
            .get(&kind)
            .map(|p| p.as_ref())
            .ok_or_else(|| ProviderError::unavailable(kind, "no provider registered"))
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> Result<&mut (dyn Provider + 'static), ProviderError> {
        self.providers
            .get_mut(&kind)
            .map(|p| p.as_mut())
            .ok_or_else(|| ProviderError::unavailable(kind, "no provider registered"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock::MockHost;
    use super::runner::MockRunner;

    #[test]
    fn missing_provider_is_unavailable() {
        let set = ProviderSet::new();
        let err = set.get(ResourceKind::Package).err().unwrap();
        assert!(matches!(err, ProviderError::Unavailable { kind: ResourceKind::Package, .. }));
    }

    #[test]
    fn host_set_covers_every_kind() {
        let runner: Rc<dyn CommandRunner> = Rc::new(MockRunner::new());
        let set = ProviderSet::host(runner);
        for kind in ResourceKind::ALL {
            assert!(set.get(kind).is_ok(), "no provider for {}", kind);
        }
    }

    #[test]
    fn mock_host_set_covers_every_kind() {
        let host = MockHost::shared();
        let mut set = MockHost::provider_set(&host);
        for kind in ResourceKind::ALL {
            assert!(set.get_mut(kind).is_ok());
        }
    }
}
