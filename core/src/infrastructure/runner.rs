//! Command runner abstraction for executing shell commands.
//!
//! `CommandRunner` is the trait that providers use to execute host tools.
//! `ShellRunner` is the production implementation that spawns `sh -c`.
//! `MockRunner` is the test double that records calls and returns preset responses.

use std::cell::RefCell;
use std::process::Command;

use tracing::trace;

/// Trait for executing shell command strings. `Ok` carries stdout, `Err`
/// carries stderr (or the spawn failure).
pub trait CommandRunner {
    fn run(&self, cmd: &str) -> Result<String, String>;
}

/// Production runner that spawns `sh -c <cmd>`.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        trace!(cmd, "exec");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| format!("Failed to execute: {}", e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                // Some tools (systemctl is-active) report on stdout only.
                Err(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                Err(stderr)
            }
        }
    }
}

/// Test-double runner that records commands and returns pre-configured responses.
pub struct MockRunner {
    responses: RefCell<Vec<Result<String, String>>>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        MockRunner {
            responses: RefCell::new(Vec::new()),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        self.commands.borrow_mut().push(cmd.to_string());
        let mut responses = self.responses.borrow_mut();
        if let Some(response) = responses.pop() {
            response
        } else {
            Ok(String::new())
        }
    }
}

/// Quote an argument for `sh` unless it is plainly safe.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '=' | '+' | ','))
    {
        return s.to_string();
    }
    let escaped = s.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_runner_records_commands() {
        let runner = MockRunner::with_responses(vec![Ok("ok".into()), Ok("ok2".into())]);
        assert!(runner.run("apt-get install -y perl").is_ok());
        assert!(runner.run("systemctl restart netfilter-persistent").is_ok());
        let cmds = runner.executed_commands();
        assert_eq!(cmds, vec!["apt-get install -y perl", "systemctl restart netfilter-persistent"]);
    }

    #[test]
    fn mock_runner_returns_responses_in_order() {
        let runner = MockRunner::with_responses(vec![
            Ok("first".into()),
            Err("fail".into()),
            Ok("third".into()),
        ]);
        assert_eq!(runner.run("cmd1").unwrap(), "first");
        assert_eq!(runner.run("cmd2").unwrap_err(), "fail");
        assert_eq!(runner.run("cmd3").unwrap(), "third");
    }

    #[test]
    fn mock_runner_defaults_to_empty_ok() {
        let runner = MockRunner::new();
        assert_eq!(runner.run("anything").unwrap(), "");
    }

    #[test]
    fn shell_escape_leaves_safe_words_bare() {
        assert_eq!(shell_escape("netfilter-persistent"), "netfilter-persistent");
        assert_eq!(shell_escape("/home/marioszp/downloads/webmin.dpkg"), "/home/marioszp/downloads/webmin.dpkg");
        assert_eq!(shell_escape("perl=5.30"), "perl=5.30");
    }

    #[test]
    fn shell_escape_quotes_everything_else() {
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape("${Status}"), "'${Status}'");
    }
}
