//! Declared resources: the unit of desired state.
//!
//! A `Resource` is identified by `(kind, name)` and carries a `DesiredState`
//! variant holding only the fields relevant to its kind. Resources are built
//! fresh for every convergence run; nothing here is persisted.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::firewall::{ChainKey, ChainPolicy, Table, Target};
use super::state::ObservedState;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Package,
    Service,
    File,
    FirewallChain,
    FirewallRule,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Package,
        ResourceKind::Service,
        ResourceKind::File,
        ResourceKind::FirewallChain,
        ResourceKind::FirewallRule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Package => "package",
            ResourceKind::Service => "service",
            ResourceKind::File => "file",
            ResourceKind::FirewallChain => "firewall_chain",
            ResourceKind::FirewallRule => "firewall_rule",
        }
    }

    pub fn parse(s: &str) -> Option<ResourceKind> {
        ResourceKind::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, name)`, unique within a plan. Rendered as `kind:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        ResourceId {
            kind,
            name: name.to_string(),
        }
    }

    /// Parse the `kind:name` form. The name may itself contain colons.
    pub fn parse(s: &str) -> Option<ResourceId> {
        let (kind, name) = s.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        Some(ResourceId::new(ResourceKind::parse(kind)?, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Per-kind desired state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageAction {
    Install,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    /// Pin to an exact version. `None` accepts whatever is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Local archive to install from instead of the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub action: PackageAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub actions: Vec<ServiceAction>,
}

impl ServiceSpec {
    /// Requested run state, if any action expresses one. Later actions win.
    pub fn wants_active(&self) -> Option<bool> {
        self.actions.iter().rev().find_map(|a| match a {
            ServiceAction::Start | ServiceAction::Restart => Some(true),
            ServiceAction::Stop => Some(false),
            _ => None,
        })
    }

    pub fn wants_enabled(&self) -> Option<bool> {
        self.actions.iter().rev().find_map(|a| match a {
            ServiceAction::Enable => Some(true),
            ServiceAction::Disable => Some(false),
            _ => None,
        })
    }

    pub fn restarts(&self) -> bool {
        self.actions.contains(&ServiceAction::Restart)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    /// URL the file is fetched from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Octal permission string, e.g. `"0600"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub name: String,
    pub table: Table,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ChainPolicy>,
}

impl ChainSpec {
    pub fn key(&self) -> ChainKey {
        ChainKey::new(self.table, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub chain: String,
    pub table: Table,
    pub match_expr: String,
    pub target: Target,
    /// Target options (`--reject-with tcp-reset`), passed after `-j <target>`.
    /// They never narrow what the rule matches.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_args: String,
    /// Index in declaration order within the chain. Assigned when the rule is
    /// added to a `ResourceGraph`; the only source of ordering truth.
    pub position: usize,
}

impl RuleSpec {
    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.table, &self.chain)
    }
}

/// What a resource should look like on the host, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesiredState {
    Package(PackageSpec),
    Service(ServiceSpec),
    File(FileSpec),
    FirewallChain(ChainSpec),
    FirewallRule(RuleSpec),
}

impl DesiredState {
    pub fn kind(&self) -> ResourceKind {
        match self {
            DesiredState::Package(_) => ResourceKind::Package,
            DesiredState::Service(_) => ResourceKind::Service,
            DesiredState::File(_) => ResourceKind::File,
            DesiredState::FirewallChain(_) => ResourceKind::FirewallChain,
            DesiredState::FirewallRule(_) => ResourceKind::FirewallRule,
        }
    }

    /// Whether the observed host state already satisfies this declaration,
    /// i.e. applying it would be a no-op.
    pub fn is_satisfied_by(&self, observed: &ObservedState) -> bool {
        match (self, observed) {
            (DesiredState::Package(p), ObservedState::Package { version }) => {
                p.action == PackageAction::Install
                    && p.version.as_ref().map_or(true, |want| want == version)
            }
            (DesiredState::Package(p), ObservedState::Absent) => p.action == PackageAction::Remove,

            (DesiredState::Service(s), ObservedState::Service { active, enabled }) => {
                !s.restarts()
                    && s.wants_active().map_or(true, |want| want == *active)
                    && s.wants_enabled().map_or(true, |want| want == *enabled)
            }
            // A missing unit is as stopped and disabled as it gets.
            (DesiredState::Service(s), ObservedState::Absent) => {
                !s.restarts()
                    && s.wants_active() != Some(true)
                    && s.wants_enabled() != Some(true)
            }

            (DesiredState::File(f), ObservedState::File { owner, mode }) => {
                f.owner.as_ref().map_or(true, |want| want == owner)
                    && f.mode
                        .as_ref()
                        .map_or(true, |want| normalize_mode(want) == normalize_mode(mode))
            }

            (DesiredState::FirewallChain(c), ObservedState::Chain { policy }) => {
                c.policy.map_or(true, |want| Some(want) == *policy)
            }

            // A rule whose place in the chain cannot be told is left alone.
            (DesiredState::FirewallRule(r), ObservedState::Rule { position }) => {
                position.map_or(true, |at| at == r.position)
            }

            _ => false,
        }
    }
}

/// `"0600"`, `"600"` and `"0o600"` all name the same permission bits.
pub fn normalize_mode(mode: &str) -> String {
    let digits = mode.trim().trim_start_matches("0o");
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A unit of declared desired state plus its explicit "runs after" edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub desired: DesiredState,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    pub fn new(name: &str, desired: DesiredState) -> Self {
        Resource {
            id: ResourceId::new(desired.kind(), name),
            desired,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn package(name: &str) -> Self {
        Resource::new(
            name,
            DesiredState::Package(PackageSpec {
                name: name.to_string(),
                version: None,
                source: None,
                action: PackageAction::Install,
            }),
        )
    }

    pub fn service(name: &str, actions: &[ServiceAction]) -> Self {
        Resource::new(
            name,
            DesiredState::Service(ServiceSpec {
                name: name.to_string(),
                actions: actions.to_vec(),
            }),
        )
    }

    pub fn file(path: &str, source: &str) -> Self {
        Resource::new(
            path,
            DesiredState::File(FileSpec {
                path: path.to_string(),
                source: source.to_string(),
                owner: None,
                mode: None,
            }),
        )
    }

    /// A chain in the given table, identified as `table/name`.
    pub fn chain(table: Table, name: &str, policy: Option<ChainPolicy>) -> Self {
        let spec = ChainSpec {
            name: name.to_string(),
            table,
            policy,
        };
        Resource::new(&spec.key().to_string(), DesiredState::FirewallChain(spec))
    }

    /// A rule in the `filter` table. Its position is assigned by the graph.
    pub fn rule(id: &str, chain: &str, match_expr: &str, target: Target) -> Self {
        Resource::new(
            id,
            DesiredState::FirewallRule(RuleSpec {
                chain: chain.to_string(),
                table: Table::Filter,
                match_expr: match_expr.to_string(),
                target,
                target_args: String::new(),
                position: 0,
            }),
        )
    }

    pub fn depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.insert(id);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    pub fn as_rule(&self) -> Option<&RuleSpec> {
        match &self.desired {
            DesiredState::FirewallRule(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_chain(&self) -> Option<&ChainSpec> {
        match &self.desired {
            DesiredState::FirewallChain(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.desired {
            DesiredState::FirewallRule(r) => write!(
                f,
                "{} [{} #{}: {} -j {}]",
                self.id,
                r.chain_key(),
                r.position,
                r.match_expr,
                r.target
            ),
            _ => write!(f, "{}", self.id),
        }
    }
}
