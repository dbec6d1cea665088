use serde::{Deserialize, Serialize};

use super::firewall::ChainPolicy;

/// What a provider observed on the host for one resource.
///
/// Each kind reports its own variant; `Absent` is shared by all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ObservedState {
    Absent,
    /// Installed package and its version.
    Package { version: String },
    Service { active: bool, enabled: bool },
    File { owner: String, mode: String },
    /// Existing chain. `policy` is `None` for user-defined chains.
    Chain { policy: Option<ChainPolicy> },
    /// The exact rule exists in its chain, at `position` among the chain's
    /// rules. `None` when the listing could not be matched back to the rule.
    Rule { position: Option<usize> },
}

impl ObservedState {
    pub fn is_absent(&self) -> bool {
        matches!(self, ObservedState::Absent)
    }
}
