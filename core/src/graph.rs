//! Resource graph: declared resources plus ordering edges.
//!
//! Edges come from three places:
//! - explicit `add_dependency` calls and each resource's `depends_on` set,
//! - a chain always precedes the rules that live in it or jump to it,
//! - rules in the same chain are chained in `position` order.
//!
//! The last kind overrides any explicit edge between two rules of the same
//! chain. Chain order is never negotiable.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::error::GraphError;
use crate::types::firewall::ChainKey;
use crate::types::resource::{DesiredState, Resource, ResourceId};

#[derive(Debug, Default, Clone)]
pub struct ResourceGraph {
    /// Declaration order.
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    /// `(before, after)` pairs by index.
    explicit: BTreeSet<(usize, usize)>,
    chains: HashMap<ChainKey, usize>,
    /// Rule indices per chain, in declaration order.
    chain_rules: HashMap<ChainKey, Vec<usize>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        ResourceGraph::default()
    }

    /// Build a graph from an ordered declaration list, resolving every
    /// resource's `depends_on` once all of them are present.
    pub fn from_resources(resources: Vec<Resource>) -> Result<ResourceGraph, GraphError> {
        let mut graph = ResourceGraph::new();
        for r in resources {
            graph.add_resource(r)?;
        }
        let declared: Vec<(ResourceId, Vec<ResourceId>)> = graph
            .resources
            .iter()
            .map(|r| (r.id.clone(), r.depends_on.iter().cloned().collect()))
            .collect();
        for (id, deps) in declared {
            for dep in deps {
                graph.add_dependency(&dep, &id)?;
            }
        }
        Ok(graph)
    }

    /// Declare a resource. Firewall rules get their `position` assigned here.
    pub fn add_resource(&mut self, mut resource: Resource) -> Result<(), GraphError> {
        if self.index.contains_key(&resource.id) {
            return Err(GraphError::DuplicateId(resource.id));
        }
        let idx = self.resources.len();
        match &mut resource.desired {
            DesiredState::FirewallChain(chain) => {
                if chain.policy.is_some() && !chain.key().is_builtin() {
                    return Err(GraphError::InvalidDeclaration {
                        id: resource.id,
                        reason: format!("user-defined chain {} cannot carry a policy", chain.key()),
                    });
                }
                if self.chains.contains_key(&chain.key()) {
                    return Err(GraphError::DuplicateId(resource.id));
                }
                self.chains.insert(chain.key(), idx);
            }
            DesiredState::FirewallRule(rule) => {
                let rules = self.chain_rules.entry(rule.chain_key()).or_default();
                rule.position = rules.len();
                rules.push(idx);
            }
            _ => {}
        }
        self.index.insert(resource.id.clone(), idx);
        self.resources.push(resource);
        Ok(())
    }

    /// Record that `before` must be applied before `after`.
    pub fn add_dependency(&mut self, before: &ResourceId, after: &ResourceId) -> Result<(), GraphError> {
        let b = self.index_of(before).ok_or_else(|| GraphError::UnknownResource(before.clone()))?;
        let a = self.index_of(after).ok_or_else(|| GraphError::UnknownResource(after.clone()))?;
        if let (Some(rb), Some(ra)) = (self.resources[b].as_rule(), self.resources[a].as_rule()) {
            if rb.chain_key() == ra.chain_key() && rb.position > ra.position {
                warn!(
                    before = %before,
                    after = %after,
                    "explicit edge contradicts declared chain order; chain order wins"
                );
            }
        }
        self.explicit.insert((b, a));
        Ok(())
    }

    /// Every rule must live in, and jump to, a chain that is either declared
    /// or built into its table.
    pub fn check_references(&self) -> Result<(), GraphError> {
        for r in &self.resources {
            let Some(rule) = r.as_rule() else { continue };
            let mut referenced = vec![rule.chain_key()];
            if let Some(jump) = rule.target.jump_chain() {
                referenced.push(ChainKey::new(rule.table, jump));
            }
            for key in referenced {
                if !key.is_builtin() && !self.chains.contains_key(&key) {
                    return Err(GraphError::UnknownChain {
                        rule: r.id.clone(),
                        chain: key,
                    });
                }
            }
        }
        Ok(())
    }

    /// All ordering edges as `(before, after)` index pairs.
    pub fn edges(&self) -> BTreeSet<(usize, usize)> {
        let mut edges: BTreeSet<(usize, usize)> = self
            .explicit
            .iter()
            .copied()
            .filter(|&(b, a)| !self.same_chain_rules(b, a))
            .collect();

        for rules in self.chain_rules.values() {
            for pair in rules.windows(2) {
                edges.insert((pair[0], pair[1]));
            }
        }

        for (idx, r) in self.resources.iter().enumerate() {
            let Some(rule) = r.as_rule() else { continue };
            if let Some(&chain) = self.chains.get(&rule.chain_key()) {
                edges.insert((chain, idx));
            }
            if let Some(jump) = rule.target.jump_chain() {
                if let Some(&chain) = self.chains.get(&ChainKey::new(rule.table, jump)) {
                    edges.insert((chain, idx));
                }
            }
        }
        edges
    }

    fn same_chain_rules(&self, a: usize, b: usize) -> bool {
        match (self.resources[a].as_rule(), self.resources[b].as_rule()) {
            (Some(ra), Some(rb)) => ra.chain_key() == rb.chain_key(),
            _ => false,
        }
    }

    pub fn index_of(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
