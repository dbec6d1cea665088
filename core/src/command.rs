//! Command: the typed interface for every `hcv` operation.
//!
//! | Command | Effect on the host |
//! |---------|--------------------|
//! | `plan` | none; orders the manifest |
//! | `validate` | read-only queries for live chain policies |
//! | `apply` | full convergence |
//! | `help` | none |

use std::path::PathBuf;


/// Flags shared by the manifest-consuming commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Emit JSON instead of text.
    pub json: bool,
    /// Engine settings file. Falls back to `HCV_SETTINGS`, then defaults.
    pub settings: Option<PathBuf>,
}


#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the execution order without touching the host.
    Plan {
        manifest: PathBuf,
        options: RunOptions,
    },

    /// Plan and check firewall policy against live chain policies.
    Validate {
        manifest: PathBuf,
        options: RunOptions,
    },

    /// Converge the host and print the report.
    Apply {
        manifest: PathBuf,
        options: RunOptions,
    },

    Help {
        topic: Option<String>,
    },
}

impl Command {
    pub fn manifest(&self) -> Option<&PathBuf> {
        match self {
            Command::Plan { manifest, .. }
            | Command::Validate { manifest, .. }
            | Command::Apply { manifest, .. } => Some(manifest),
            Command::Help { .. } => None,
        }
    }

    pub fn options(&self) -> Option<&RunOptions> {
        match self {
            Command::Plan { options, .. }
            | Command::Validate { options, .. }
            | Command::Apply { options, .. } => Some(options),
            Command::Help { .. } => None,
        }
    }
}
