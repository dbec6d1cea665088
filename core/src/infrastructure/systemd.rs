//! Service provider backed by `systemctl`.

use std::rc::Rc;

use tracing::debug;

use crate::error::ProviderError;
use crate::types::resource::{DesiredState, Resource, ResourceKind, ServiceAction, ServiceSpec};
use crate::types::state::ObservedState;

use super::runner::{shell_escape, CommandRunner};
use super::{ApplyOutcome, Provider};

pub struct SystemdProvider {
    runner: Rc<dyn CommandRunner>,
}

impl SystemdProvider {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        SystemdProvider { runner }
    }

    /// `systemctl <action> <unit>`
    pub fn action_command(action: ServiceAction, unit: &str) -> String {
        format!("systemctl {} {}", action.as_str(), shell_escape(unit))
    }

    /// `is-active`/`is-enabled` exit non-zero for "no"; the answer is the
    /// first word either way.
    fn ask(&self, question: &str, unit: &str) -> String {
        let cmd = format!("systemctl {} {}", question, shell_escape(unit));
        let out = match self.runner.run(&cmd) {
            Ok(out) => out,
            Err(out) => out,
        };
        out.split_whitespace().next().unwrap_or("").to_string()
    }
}

fn spec_of(resource: &Resource) -> Result<&ServiceSpec, ProviderError> {
    match &resource.desired {
        DesiredState::Service(s) => Ok(s),
        _ => Err(ProviderError::unavailable(
            ResourceKind::Service,
            format!("{} is not a service", resource.id),
        )),
    }
}

impl Provider for SystemdProvider {
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError> {
        let spec = spec_of(resource)?;
        let enabled = self.ask("is-enabled", &spec.name);
        if enabled.is_empty() || enabled == "not-found" {
            return Ok(ObservedState::Absent);
        }
        let active = self.ask("is-active", &spec.name);
        Ok(ObservedState::Service {
            active: active == "active",
            enabled: matches!(enabled.as_str(), "enabled" | "enabled-runtime" | "static"),
        })
    }

    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError> {
        let spec = spec_of(resource)?;
        for &action in &spec.actions {
            let cmd = SystemdProvider::action_command(action, &spec.name);
            debug!(service = %spec.name, %cmd, "systemd apply");
            self.runner.run(&cmd).map_err(ProviderError::apply_failed)?;
        }
        Ok(ApplyOutcome::changed())
    }
}
