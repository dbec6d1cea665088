//! Planner: orders a `ResourceGraph` into an execution plan.
//!
//! Stable topological sort (Kahn's algorithm). Among resources that are ready
//! at the same time, the one declared first goes first, so identical input
//! always yields an identical plan. The planner never executes anything.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::PlanError;
use crate::graph::ResourceGraph;
use crate::types::firewall::ChainKey;
use crate::types::resource::Resource;

/// Ordered resources for one run. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergencePlan {
    steps: Vec<Resource>,
}

impl ConvergencePlan {
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// One line per step, numbered from 1.
    pub fn render_text(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{:>3}. {}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Order the graph. Fails on a dependency cycle; no partial plan is returned.
pub fn plan(graph: &ResourceGraph) -> Result<ConvergencePlan, PlanError> {
    graph.check_references()?;

    let n = graph.len();
    let edges = graph.edges();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for &(before, after) in &edges {
        successors[before].push(after);
        in_degree[after] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() < n {
        let involved = cycle_members(&successors, &in_degree)
            .into_iter()
            .map(|i| graph.resources()[i].id.clone())
            .collect();
        return Err(PlanError::CycleDetected { involved });
    }

    let steps: Vec<Resource> = order
        .into_iter()
        .map(|i| graph.resources()[i].clone())
        .collect();
    verify_chain_order(&steps)?;

    debug!(resources = steps.len(), edges = edges.len(), "plan computed");
    Ok(ConvergencePlan { steps })
}

/// Nodes left over by Kahn's algorithm include everything downstream of a
/// cycle. Peel off nodes with no remaining successors until only the nodes
/// that sit on (or between) cycles are left.
fn cycle_members(successors: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    let mut remaining: BTreeSet<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] > 0).collect();
    loop {
        let sinks: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| !successors[i].iter().any(|s| remaining.contains(s)))
            .collect();
        if sinks.is_empty() {
            break;
        }
        for s in sinks {
            remaining.remove(&s);
        }
    }
    remaining.into_iter().collect()
}

/// Rules of each chain must appear in strictly increasing `position` order.
fn verify_chain_order(steps: &[Resource]) -> Result<(), PlanError> {
    let mut last_seen: HashMap<ChainKey, usize> = HashMap::new();
    for r in steps {
        let Some(rule) = r.as_rule() else { continue };
        let key = rule.chain_key();
        if let Some(&prev) = last_seen.get(&key) {
            if rule.position <= prev {
                return Err(PlanError::ChainOrderViolation {
                    chain: key,
                    rule: r.id.clone(),
                });
            }
        }
        last_seen.insert(key, rule.position);
    }
    Ok(())
}
