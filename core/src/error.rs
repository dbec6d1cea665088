//! Error types for the convergence engine.
//!
//! Structural errors (`GraphError`, `PlanError`, `PolicyError`) are raised
//! before any mutating provider call. `ProviderError` is raised by providers
//! at run time and recorded per resource in the report.

use thiserror::Error;

use crate::types::firewall::ChainKey;
use crate::types::resource::{ResourceId, ResourceKind};

/// Result type for the top-level pipeline.
pub type Result<T> = std::result::Result<T, ConvergeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate resource: {0}")]
    DuplicateId(ResourceId),

    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// A rule references a chain that is neither declared nor built in.
    #[error("unknown chain {chain} referenced by {rule}")]
    UnknownChain { rule: ResourceId, chain: ChainKey },

    #[error("invalid declaration {id}: {reason}")]
    InvalidDeclaration { id: ResourceId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("dependency cycle among: {}", join_ids(.involved))]
    CycleDetected { involved: Vec<ResourceId> },

    /// Sorted plan disagrees with declared rule order: a bug in edge injection.
    #[error("rule {rule} is out of declared order in chain {chain}")]
    ChainOrderViolation { chain: ChainKey, rule: ResourceId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("rule {rule} is unreachable: shadowed by {shadowed_by}")]
    UnreachableRule {
        rule: ResourceId,
        shadowed_by: ResourceId,
    },

    #[error("chain {chain} has no deny policy and does not end in a catch-all terminal rule")]
    OpenChainPolicy { chain: ChainKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{kind} provider unavailable: {detail}")]
    Unavailable { kind: ResourceKind, detail: String },

    #[error("apply failed: {detail}")]
    ApplyFailed { detail: String },
}

impl ProviderError {
    pub fn unavailable(kind: ResourceKind, detail: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            kind,
            detail: detail.into(),
        }
    }

    pub fn apply_failed(detail: impl Into<String>) -> Self {
        ProviderError::ApplyFailed {
            detail: detail.into(),
        }
    }
}

/// Any error that aborts a run before the executor issues an `Apply`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvergeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Provider failed while observing chain policies for validation.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
