use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Packet-filter table a chain lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Filter,
    Nat,
    Mangle,
    Raw,
    Security,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
            Table::Mangle => "mangle",
            Table::Raw => "raw",
            Table::Security => "security",
        }
    }

    /// Chains the kernel creates for this table. They always exist and carry
    /// a default policy.
    pub fn builtin_chains(&self) -> &'static [&'static str] {
        match self {
            Table::Filter | Table::Security => &["INPUT", "FORWARD", "OUTPUT"],
            Table::Nat => &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"],
            Table::Mangle => &["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"],
            Table::Raw => &["PREROUTING", "OUTPUT"],
        }
    }

    pub fn is_builtin_chain(&self, chain: &str) -> bool {
        self.builtin_chains().contains(&chain)
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::Filter
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filter" => Ok(Table::Filter),
            "nat" => Ok(Table::Nat),
            "mangle" => Ok(Table::Mangle),
            "raw" => Ok(Table::Raw),
            "security" => Ok(Table::Security),
            other => Err(format!("unknown table '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What a rule does with a matching packet.
///
/// Anything that is not one of the built-in verdicts is a jump into a
/// user-defined chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Accept,
    Drop,
    Reject,
    Return,
    Jump(String),
}

impl Target {
    /// Verdicts that stop traversal of the packet-filter entirely.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Target::Accept | Target::Drop | Target::Reject)
    }

    pub fn jump_chain(&self) -> Option<&str> {
        match self {
            Target::Jump(chain) => Some(chain),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Accept => "ACCEPT",
            Target::Drop => "DROP",
            Target::Reject => "REJECT",
            Target::Return => "RETURN",
            Target::Jump(chain) => chain,
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ACCEPT" => Target::Accept,
            "DROP" => Target::Drop,
            "REJECT" => Target::Reject,
            "RETURN" => Target::Return,
            _ => Target::Jump(s),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::from(s.to_string())
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ChainPolicy
// ---------------------------------------------------------------------------

/// Default verdict of a built-in chain when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainPolicy {
    #[serde(alias = "accept")]
    Accept,
    #[serde(alias = "drop")]
    Drop,
}

impl ChainPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainPolicy::Accept => "ACCEPT",
            ChainPolicy::Drop => "DROP",
        }
    }
}

impl fmt::Display for ChainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPT" => Ok(ChainPolicy::Accept),
            "DROP" => Ok(ChainPolicy::Drop),
            other => Err(format!("unsupported chain policy '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// ChainKey
// ---------------------------------------------------------------------------

/// Identity of a chain on the host: the same name in two tables is two chains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainKey {
    pub table: Table,
    pub chain: String,
}

impl ChainKey {
    pub fn new(table: Table, chain: &str) -> Self {
        ChainKey {
            table,
            chain: chain.to_string(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.table.is_builtin_chain(&self.chain)
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.chain)
    }
}
