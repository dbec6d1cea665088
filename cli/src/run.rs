//! Command dispatch for `hcv`: load inputs, drive the engine, render output.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, error};

use hostconv_core::command::{Command, RunOptions};
use hostconv_core::help::help_text;
use hostconv_core::infrastructure::ProviderSet;
use hostconv_core::manifest;
use hostconv_core::types::config::{self, EngineSettings};
use hostconv_core::Engine;

/// Nothing applied: usage, manifest, settings, graph or policy errors.
pub const EXIT_REJECTED: i32 = 2;

/// What the binary prints and exits with.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    fn ok(stdout: String) -> Self {
        Outcome { code: 0, stdout, stderr: String::new() }
    }

    fn rejected(options: &RunOptions, message: String) -> Self {
        if options.json {
            Outcome {
                code: EXIT_REJECTED,
                stdout: json!({ "error": message }).to_string(),
                stderr: String::new(),
            }
        } else {
            Outcome {
                code: EXIT_REJECTED,
                stdout: String::new(),
                stderr: format!("hcv: {}", message),
            }
        }
    }
}

/// `--settings` wins, then `HCV_SETTINGS`, then built-in defaults.
pub fn resolve_settings_path(options: &RunOptions) -> Option<PathBuf> {
    if let Some(path) = &options.settings {
        return Some(path.clone());
    }
    std::env::var("HCV_SETTINGS")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn load_settings(path: Option<&Path>) -> Result<EngineSettings, String> {
    match path {
        Some(p) => {
            debug!(path = %p.display(), "loading settings");
            config::load(p).map_err(|e| e.to_string())
        }
        None => Ok(EngineSettings::default()),
    }
}

/// Run one command against the given providers. The binary passes the real
/// host providers; tests pass a mock host.
pub fn execute(cmd: &Command, providers: &mut ProviderSet) -> Outcome {
    let (manifest_path, options) = match (cmd.manifest(), cmd.options()) {
        (Some(m), Some(o)) => (m, o),
        _ => {
            let topic = match cmd {
                Command::Help { topic } => topic.as_deref(),
                _ => None,
            };
            return Outcome::ok(help_text(topic));
        }
    };

    let settings = match load_settings(resolve_settings_path(options).as_deref()) {
        Ok(s) => s,
        Err(e) => return Outcome::rejected(options, e),
    };
    let resources = match manifest::load(manifest_path) {
        Ok(r) => r,
        Err(e) => return Outcome::rejected(options, e.to_string()),
    };
    let engine = Engine::new(settings);

    match cmd {
        Command::Plan { .. } => match engine.plan(resources) {
            Ok(plan) if options.json => {
                let ids: Vec<String> = plan.iter().map(|r| r.id.to_string()).collect();
                Outcome::ok(json!({ "plan": ids }).to_string())
            }
            Ok(plan) => Outcome::ok(plan.render_text()),
            Err(e) => Outcome::rejected(options, e.to_string()),
        },
        Command::Validate { .. } => match engine.validate(resources, providers) {
            Ok(plan) if options.json => Outcome::ok(json!({ "valid": true, "resources": plan.len() }).to_string()),
            Ok(plan) => Outcome::ok(format!("ok: {} resources, firewall policy valid", plan.len())),
            Err(e) => Outcome::rejected(options, e.to_string()),
        },
        Command::Apply { .. } => match engine.converge(resources, providers) {
            Ok(report) => {
                let stdout = if options.json {
                    serde_json::to_string_pretty(&report).unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
                } else {
                    report.render_text()
                };
                if let Some(failed) = report.first_failure() {
                    error!(resource = %failed.id, "convergence failed");
                }
                Outcome {
                    code: report.exit_code(),
                    stdout,
                    stderr: String::new(),
                }
            }
            Err(e) => Outcome::rejected(options, e.to_string()),
        },
        Command::Help { .. } => Outcome::ok(help_text(None)),
    }
}
