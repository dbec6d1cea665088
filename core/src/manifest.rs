//! YAML manifest loader.
//!
//! A manifest is an ordered list of resource declarations. Order in the file
//! is declaration order: it breaks planner ties and fixes firewall rule
//! positions.
//!
//! ```yaml
//! resources:
//!   - kind: package
//!     name: perl
//!   - kind: firewall_chain
//!     name: FW_EXTERNAL
//!   - kind: firewall_rule
//!     id: inbound_ssh
//!     chain: FW_EXTERNAL
//!     match: "-p tcp --dport 22 -i eth0"
//!     target: ACCEPT
//!   - kind: service
//!     name: netfilter-persistent
//!     actions: [restart]
//!     depends_on: ["firewall_rule:inbound_ssh"]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::firewall::{ChainPolicy, Table, Target};
use crate::types::resource::{
    ChainSpec, DesiredState, FileSpec, PackageAction, PackageSpec, Resource, ResourceId,
    ResourceKind, RuleSpec, ServiceAction, ServiceSpec,
};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("resource #{index} ({kind}): missing field '{field}'")]
    MissingField {
        index: usize,
        kind: ResourceKind,
        field: &'static str,
    },

    #[error("resource #{index}: bad dependency reference '{reference}' (expected kind:name)")]
    BadReference { index: usize, reference: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<Declaration>,
}

/// One entry of the `resources` list. Which fields are required depends on
/// `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    pub kind: ResourceKind,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub action: Option<PackageAction>,
    #[serde(default)]
    pub actions: Option<Vec<ServiceAction>>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub table: Option<Table>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub policy: Option<ChainPolicy>,
    #[serde(default, rename = "match")]
    pub match_expr: Option<String>,
    /// `DROP`, `ACCEPT`, a chain name, or a target with its options
    /// (`REJECT --reject-with tcp-reset`).
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub target_args: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Manifest {
    pub fn into_resources(self) -> Result<Vec<Resource>, ManifestError> {
        self.resources
            .into_iter()
            .enumerate()
            .map(|(i, d)| d.into_resource(i))
            .collect()
    }
}

impl Declaration {
    fn require(&self, index: usize, field: &'static str, value: &Option<String>) -> Result<String, ManifestError> {
        value.clone().ok_or(ManifestError::MissingField {
            index,
            kind: self.kind,
            field,
        })
    }

    pub fn into_resource(self, index: usize) -> Result<Resource, ManifestError> {
        let (default_id, desired) = match self.kind {
            ResourceKind::Package => {
                let name = self.require(index, "name", &self.name)?;
                let spec = PackageSpec {
                    name: name.clone(),
                    version: self.version.clone(),
                    source: self.source.clone(),
                    action: self.action.unwrap_or(PackageAction::Install),
                };
                (name, DesiredState::Package(spec))
            }
            ResourceKind::Service => {
                let name = self.require(index, "name", &self.name)?;
                let spec = ServiceSpec {
                    name: name.clone(),
                    actions: self.actions.clone().unwrap_or_else(|| vec![ServiceAction::Start]),
                };
                (name, DesiredState::Service(spec))
            }
            ResourceKind::File => {
                let path = self.require(index, "path", &self.path)?;
                let spec = FileSpec {
                    path: path.clone(),
                    source: self.require(index, "source", &self.source)?,
                    owner: self.owner.clone(),
                    mode: self.mode.clone(),
                };
                (path, DesiredState::File(spec))
            }
            ResourceKind::FirewallChain => {
                let spec = ChainSpec {
                    name: self.require(index, "name", &self.name)?,
                    table: self.table.unwrap_or_default(),
                    policy: self.policy,
                };
                (spec.key().to_string(), DesiredState::FirewallChain(spec))
            }
            ResourceKind::FirewallRule => {
                let id = self.require(index, "id", &self.id)?;
                let written = self.require(index, "target", &self.target)?;
                let mut words = written.split_whitespace();
                let target = words.next().map(Target::from).ok_or(ManifestError::MissingField {
                    index,
                    kind: self.kind,
                    field: "target",
                })?;
                let target_args = words
                    .chain(self.target_args.as_deref().unwrap_or("").split_whitespace())
                    .collect::<Vec<_>>()
                    .join(" ");
                let spec = RuleSpec {
                    chain: self.require(index, "chain", &self.chain)?,
                    table: self.table.unwrap_or_default(),
                    match_expr: self.match_expr.clone().unwrap_or_default(),
                    target,
                    target_args,
                    position: 0,
                };
                (id, DesiredState::FirewallRule(spec))
            }
        };

        let depends_on = self
            .depends_on
            .iter()
            .map(|s| {
                ResourceId::parse(s).ok_or_else(|| ManifestError::BadReference {
                    index,
                    reference: s.clone(),
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut resource = Resource::new(self.id.as_deref().unwrap_or(&default_id), desired);
        resource.depends_on = depends_on;
        Ok(resource)
    }
}

/// Load a manifest from a YAML file.
pub fn load(path: &Path) -> Result<Vec<Resource>, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content)
}

/// Parse a manifest from a YAML string.
pub fn parse(content: &str) -> Result<Vec<Resource>, ManifestError> {
    let manifest: Manifest = serde_yaml::from_str(content)?;
    manifest.into_resources()
}
