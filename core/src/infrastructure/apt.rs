//! Debian package provider: `dpkg-query` to observe, `apt-get`/`dpkg` to apply.

use std::rc::Rc;

use tracing::debug;

use crate::error::ProviderError;
use crate::types::resource::{DesiredState, PackageAction, PackageSpec, Resource, ResourceKind};
use crate::types::state::ObservedState;

use super::runner::{shell_escape, CommandRunner};
use super::{ApplyOutcome, Provider};

pub struct AptProvider {
    runner: Rc<dyn CommandRunner>,
}

impl AptProvider {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        AptProvider { runner }
    }

    /// `dpkg-query -W -f='${Status} ${Version}' <name>`
    pub fn query_command(name: &str) -> String {
        format!("dpkg-query -W -f='${{Status}} ${{Version}}' {}", shell_escape(name))
    }

    pub fn apply_command(spec: &PackageSpec) -> String {
        match (spec.action, &spec.source) {
            (PackageAction::Install, Some(source)) => format!("dpkg -i {}", shell_escape(source)),
            (PackageAction::Install, None) => {
                let target = match &spec.version {
                    Some(v) => format!("{}={}", spec.name, v),
                    None => spec.name.clone(),
                };
                format!(
                    "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                    shell_escape(&target)
                )
            }
            (PackageAction::Remove, _) => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get remove -y {}",
                shell_escape(&spec.name)
            ),
        }
    }
}

/// Parse `install ok installed 1.1.1f-1ubuntu2`. Anything other than an
/// installed status means the package is absent.
pub fn parse_status(output: &str) -> ObservedState {
    let mut words = output.split_whitespace();
    let status: Vec<&str> = words.by_ref().take(3).collect();
    match (status.as_slice(), words.next()) {
        ([_, _, "installed"], Some(version)) => ObservedState::Package {
            version: version.to_string(),
        },
        _ => ObservedState::Absent,
    }
}

fn spec_of(resource: &Resource) -> Result<&PackageSpec, ProviderError> {
    match &resource.desired {
        DesiredState::Package(p) => Ok(p),
        _ => Err(ProviderError::unavailable(
            ResourceKind::Package,
            format!("{} is not a package", resource.id),
        )),
    }
}

impl Provider for AptProvider {
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError> {
        let spec = spec_of(resource)?;
        // dpkg-query exits non-zero for packages it has never heard of.
        match self.runner.run(&AptProvider::query_command(&spec.name)) {
            Ok(out) => Ok(parse_status(&out)),
            Err(_) => Ok(ObservedState::Absent),
        }
    }

    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError> {
        let spec = spec_of(resource)?;
        let cmd = AptProvider::apply_command(spec);
        debug!(package = %spec.name, %cmd, "apt apply");
        self.runner
            .run(&cmd)
            .map(|_| ApplyOutcome::changed())
            .map_err(ProviderError::apply_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::MockRunner;

    fn spec(name: &str) -> PackageSpec {
        PackageSpec {
            name: name.into(),
            version: None,
            source: None,
            action: PackageAction::Install,
        }
    }

    #[test]
    fn parse_installed_status() {
        let s = parse_status("install ok installed 1.1.1f-1ubuntu2");
        assert_eq!(s, ObservedState::Package { version: "1.1.1f-1ubuntu2".into() });
    }

    #[test]
    fn parse_removed_status_is_absent() {
        assert_eq!(parse_status("deinstall ok config-files 5.30.0-9"), ObservedState::Absent);
        assert_eq!(parse_status(""), ObservedState::Absent);
    }

    #[test]
    fn install_command_pins_version() {
        let mut s = spec("openssl");
        s.version = Some("1.1.1f".into());
        assert_eq!(
            AptProvider::apply_command(&s),
            "DEBIAN_FRONTEND=noninteractive apt-get install -y openssl=1.1.1f"
        );
    }

    #[test]
    fn local_source_installs_with_dpkg() {
        let mut s = spec("webmin");
        s.source = Some("/home/marioszp/downloads/webmin.dpkg".into());
        assert_eq!(AptProvider::apply_command(&s), "dpkg -i /home/marioszp/downloads/webmin.dpkg");
    }

    #[test]
    fn remove_command() {
        let mut s = spec("telnet");
        s.action = PackageAction::Remove;
        assert!(AptProvider::apply_command(&s).ends_with("apt-get remove -y telnet"));
    }

    #[test]
    fn query_failure_observes_absent() {
        let runner = Rc::new(MockRunner::with_responses(vec![Err("no packages found".into())]));
        let p = AptProvider::new(runner.clone());
        let state = p.current_state(&Resource::package("perl")).unwrap();
        assert_eq!(state, ObservedState::Absent);
        assert_eq!(
            runner.executed_commands(),
            vec!["dpkg-query -W -f='${Status} ${Version}' perl"]
        );
    }

    #[test]
    fn apply_failure_carries_stderr() {
        let runner = Rc::new(MockRunner::with_responses(vec![Err("E: Unable to locate package".into())]));
        let mut p = AptProvider::new(runner);
        let err = p.apply(&Resource::package("nope")).unwrap_err();
        assert_eq!(err, ProviderError::apply_failed("E: Unable to locate package"));
    }

    #[test]
    fn rejects_foreign_resource() {
        let p = AptProvider::new(Rc::new(MockRunner::new()));
        let r = Resource::file("/tmp/x", "http://example.invalid/x");
        assert!(p.current_state(&r).is_err());
    }
}
