//! Remote file provider: fetch with `curl` if absent, then fix owner and mode.
//!
//! Downloads land in `<path>.hcv-tmp` and are moved over `<path>` only once
//! complete, so an interrupted transfer never leaves a partial file where a
//! later `stat` would report it present.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::resource::{normalize_mode, DesiredState, FileSpec, Resource, ResourceKind};
use crate::types::state::ObservedState;

use super::runner::{shell_escape, CommandRunner};
use super::{ApplyOutcome, Provider};

const STAGING_SUFFIX: &str = ".hcv-tmp";

pub struct FetchProvider {
    runner: Rc<dyn CommandRunner>,
}

impl FetchProvider {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        FetchProvider { runner }
    }

    /// `stat -c '%U %a' <path>`
    pub fn stat_command(path: &str) -> String {
        format!("stat -c '%U %a' {}", shell_escape(path))
    }

    pub fn staging_path(path: &str) -> String {
        format!("{}{}", path, STAGING_SUFFIX)
    }

    /// `curl -fsSL -o <path>.hcv-tmp <source>`
    pub fn download_command(spec: &FileSpec) -> String {
        format!(
            "curl -fsSL -o {} {}",
            shell_escape(&FetchProvider::staging_path(&spec.path)),
            shell_escape(&spec.source)
        )
    }

    /// `mv -f <path>.hcv-tmp <path>`
    pub fn install_command(spec: &FileSpec) -> String {
        format!(
            "mv -f {} {}",
            shell_escape(&FetchProvider::staging_path(&spec.path)),
            shell_escape(&spec.path)
        )
    }

    /// `rm -f <path>.hcv-tmp`
    pub fn cleanup_command(spec: &FileSpec) -> String {
        format!("rm -f {}", shell_escape(&FetchProvider::staging_path(&spec.path)))
    }

    /// Commands that take the file from `observed` to `spec`.
    pub fn apply_commands(spec: &FileSpec, observed: &ObservedState) -> Vec<String> {
        let mut cmds = Vec::new();
        let (owner, mode) = match observed {
            ObservedState::File { owner, mode } => (Some(owner.as_str()), Some(mode.as_str())),
            _ => {
                cmds.push(FetchProvider::download_command(spec));
                cmds.push(FetchProvider::install_command(spec));
                (None, None)
            }
        };
        if let Some(want) = &spec.owner {
            if owner != Some(want.as_str()) {
                cmds.push(format!("chown {} {}", shell_escape(want), shell_escape(&spec.path)));
            }
        }
        if let Some(want) = &spec.mode {
            if mode.map(normalize_mode) != Some(normalize_mode(want)) {
                cmds.push(format!("chmod {} {}", shell_escape(want), shell_escape(&spec.path)));
            }
        }
        cmds
    }
}

/// Parse `marioszp 600`.
pub fn parse_stat(output: &str) -> Option<ObservedState> {
    let mut parts = output.split_whitespace();
    let owner = parts.next()?;
    let mode = parts.next()?;
    Some(ObservedState::File {
        owner: owner.to_string(),
        mode: mode.to_string(),
    })
}

fn spec_of(resource: &Resource) -> Result<&FileSpec, ProviderError> {
    match &resource.desired {
        DesiredState::File(f) => Ok(f),
        _ => Err(ProviderError::unavailable(
            ResourceKind::File,
            format!("{} is not a file", resource.id),
        )),
    }
}

impl FetchProvider {
    fn discard_staging(&self, spec: &FileSpec) {
        if let Err(e) = self.runner.run(&FetchProvider::cleanup_command(spec)) {
            warn!(path = %spec.path, error = %e, "could not remove partial download");
        }
    }
}

impl Provider for FetchProvider {
    fn current_state(&self, resource: &Resource) -> Result<ObservedState, ProviderError> {
        let spec = spec_of(resource)?;
        match self.runner.run(&FetchProvider::stat_command(&spec.path)) {
            Ok(out) => Ok(parse_stat(&out).unwrap_or(ObservedState::Absent)),
            Err(_) => Ok(ObservedState::Absent),
        }
    }

    fn apply(&mut self, resource: &Resource) -> Result<ApplyOutcome, ProviderError> {
        let spec = spec_of(resource)?;
        let observed = self.current_state(resource)?;
        let cmds = FetchProvider::apply_commands(spec, &observed);
        let staged = matches!(observed, ObservedState::Absent);
        for (i, cmd) in cmds.iter().enumerate() {
            debug!(path = %spec.path, %cmd, "file apply");
            if let Err(e) = self.runner.run(cmd) {
                // The download and the move are the first two commands.
                if staged && i < 2 {
                    self.discard_staging(spec);
                }
                return Err(ProviderError::apply_failed(e));
            }
        }
        Ok(ApplyOutcome {
            changed: !cmds.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::MockRunner;

    fn webmin() -> FileSpec {
        FileSpec {
            path: "/home/marioszp/downloads/webmin.dpkg".into(),
            source: "http://prdownloads.sourceforge.net/webadmin/webmin_1.940_all.deb".into(),
            owner: Some("marioszp".into()),
            mode: Some("0600".into()),
        }
    }

    #[test]
    fn absent_file_is_fetched_then_fixed_up() {
        let cmds = FetchProvider::apply_commands(&webmin(), &ObservedState::Absent);
        assert_eq!(cmds.len(), 4);
        assert!(cmds[0].starts_with("curl -fsSL -o /home/marioszp/downloads/webmin.dpkg.hcv-tmp http"));
        assert_eq!(
            cmds[1],
            "mv -f /home/marioszp/downloads/webmin.dpkg.hcv-tmp /home/marioszp/downloads/webmin.dpkg"
        );
        assert_eq!(cmds[2], "chown marioszp /home/marioszp/downloads/webmin.dpkg");
        assert_eq!(cmds[3], "chmod 0600 /home/marioszp/downloads/webmin.dpkg");
    }

    #[test]
    fn present_file_only_gets_mode_fix() {
        let seen = ObservedState::File { owner: "marioszp".into(), mode: "644".into() };
        let cmds = FetchProvider::apply_commands(&webmin(), &seen);
        assert_eq!(cmds, vec!["chmod 0600 /home/marioszp/downloads/webmin.dpkg"]);
    }

    #[test]
    fn parse_stat_output() {
        assert_eq!(
            parse_stat("marioszp 600\n"),
            Some(ObservedState::File { owner: "marioszp".into(), mode: "600".into() })
        );
        assert_eq!(parse_stat(""), None);
    }

    #[test]
    fn apply_stops_on_download_failure() {
        let runner = Rc::new(MockRunner::with_responses(vec![
            Err("stat: cannot statx".into()),
            Err("curl: (22) The requested URL returned error: 404".into()),
        ]));
        let mut p = FetchProvider::new(runner.clone());
        let r = Resource::new(&webmin().path, DesiredState::File(webmin()));
        let err = p.apply(&r).unwrap_err();
        assert!(err.to_string().contains("404"));
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[2], "rm -f /home/marioszp/downloads/webmin.dpkg.hcv-tmp");
    }

    #[test]
    fn interrupted_download_never_reaches_final_path() {
        let runner = Rc::new(MockRunner::with_responses(vec![
            Err("stat: cannot statx".into()),
            Err("curl: (18) transfer closed with 52000 bytes remaining to read".into()),
            Ok(String::new()),
        ]));
        let mut p = FetchProvider::new(runner.clone());
        let r = Resource::new(&webmin().path, DesiredState::File(webmin()));
        assert!(p.apply(&r).is_err());
        let cmds = runner.executed_commands();
        assert_eq!(
            cmds,
            vec![
                FetchProvider::stat_command(&webmin().path),
                FetchProvider::download_command(&webmin()),
                FetchProvider::cleanup_command(&webmin()),
            ]
        );
        assert!(!cmds.iter().any(|c| c.starts_with("mv ")));
        assert!(cmds[1].contains(".hcv-tmp"));
    }

    #[test]
    fn completed_download_is_moved_into_place() {
        let runner = Rc::new(MockRunner::with_responses(vec![
            Err("stat: cannot statx".into()),
            Ok(String::new()),
            Ok(String::new()),
            Ok(String::new()),
            Ok(String::new()),
        ]));
        let mut p = FetchProvider::new(runner.clone());
        let r = Resource::new(&webmin().path, DesiredState::File(webmin()));
        assert!(p.apply(&r).unwrap().changed);
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 5);
        assert_eq!(cmds[1], FetchProvider::download_command(&webmin()));
        assert_eq!(cmds[2], FetchProvider::install_command(&webmin()));
        assert!(!cmds.iter().any(|c| c.starts_with("rm ")));
    }

    #[test]
    fn failed_fixup_keeps_installed_file() {
        let runner = Rc::new(MockRunner::with_responses(vec![
            Err("stat: cannot statx".into()),
            Ok(String::new()),
            Ok(String::new()),
            Err("chown: invalid user: 'marioszp'".into()),
        ]));
        let mut p = FetchProvider::new(runner.clone());
        let r = Resource::new(&webmin().path, DesiredState::File(webmin()));
        assert!(p.apply(&r).is_err());
        assert_eq!(runner.executed_commands().len(), 4);
    }
}
