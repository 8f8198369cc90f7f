// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! The dependency graph: steps, parallel groups, reserved-name validation,
//! group expansion, and level/topological queries.
//!
//! Backed by [`petgraph::graph::DiGraph`], generalizing `conflow`'s
//! `DagBuilder` (single-predecessor pipeline "stages") to steps with
//! regular/optional dependency kinds and named parallel groups whose
//! membership expands to a set of step names at build time.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, DfsEvent};

use crate::errors::FlowError;
use crate::step::{DependsOn, StepFn, StepName};

/// A named, ordered set of sibling steps sharing a dependency set.
#[derive(Debug, Clone)]
pub struct ParallelGroupInfo {
    pub name: StepName,
    pub members: Vec<StepName>,
    pub depends_on: Vec<String>,
}

struct StepEntry {
    callable: StepFn,
    optional: bool,
    /// Raw dependency names as declared, before group expansion.
    raw_depends_on: Vec<String>,
}

/// Stores step callables, static dependencies, optional flags, and named
/// parallel groups. Expands group references to member sets at build time
/// and validates acyclicity.
pub struct DependencyGraph {
    steps: HashMap<StepName, StepEntry>,
    groups: HashMap<StepName, ParallelGroupInfo>,
    /// Insertion order, used to give `parallel_order` and `topological_order`
    /// a deterministic tiebreak within a level.
    declared_order: Vec<StepName>,
    /// Expanded dependency sets, built once and cached after `finalize`.
    expanded: HashMap<StepName, HashSet<StepName>>,
    graph: DiGraph<StepName, ()>,
    node_index: HashMap<StepName, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            groups: HashMap::new(),
            declared_order: Vec::new(),
            expanded: HashMap::new(),
            graph: DiGraph::new(),
            node_index: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn contains_step(&self, name: &StepName) -> bool {
        self.steps.contains_key(name)
    }

    pub fn is_optional(&self, name: &StepName) -> bool {
        self.steps.get(name).map(|s| s.optional).unwrap_or(false)
    }

    pub fn callable(&self, name: &StepName) -> Option<&StepFn> {
        self.steps.get(name).map(|s| &s.callable)
    }

    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.declared_order.iter()
    }

    /// Register a step. Rejects reserved names (already enforced by
    /// [`StepName::new`] at call sites) and duplicate names.
    pub fn add_step(
        &mut self,
        name: StepName,
        callable: StepFn,
        depends_on: DependsOn,
    ) -> Result<(), FlowError> {
        if self.steps.contains_key(&name) || self.groups.contains_key(&name) {
            return Err(FlowError::DuplicateStep {
                name: name.to_string(),
            });
        }

        let optional = depends_on.is_optional();
        let raw_depends_on = depends_on.names().to_vec();

        self.declared_order.push(name.clone());
        self.steps.insert(
            name,
            StepEntry {
                callable,
                optional,
                raw_depends_on,
            },
        );
        Ok(())
    }

    /// Register a named parallel group: rejects reserved names, then
    /// rewrites each member's dependency set to include the group's own
    /// `depends_on` (union).
    pub fn add_parallel_group(
        &mut self,
        name: StepName,
        members: Vec<StepName>,
        depends_on: Vec<String>,
    ) -> Result<(), FlowError> {
        // A group name must be distinct from every step name (and every
        // other group name), not just the reserved-name set: `depends_on`
        // resolution (`expand_dependencies`) always prefers a group match,
        // so a step/group name collision would silently reinterpret a
        // dependency on the step as a dependency on the group instead.
        if self.steps.contains_key(&name) || self.groups.contains_key(&name) {
            return Err(FlowError::DuplicateStep {
                name: name.to_string(),
            });
        }

        for member in &members {
            if let Some(entry) = self.steps.get_mut(member) {
                for dep in &depends_on {
                    if !entry.raw_depends_on.contains(dep) {
                        entry.raw_depends_on.push(dep.clone());
                    }
                }
            }
        }

        self.groups.insert(
            name.clone(),
            ParallelGroupInfo {
                name,
                members,
                depends_on,
            },
        );
        Ok(())
    }

    /// Expand a raw dependency list: group names become their member sets;
    /// `none`/`nothing` symbols are filtered out (they never reach this
    /// list since [`DependsOn::None`] carries no names, but a defensive
    /// filter keeps this function total over arbitrary string input).
    fn expand_dependencies(&self, deps: &[String]) -> HashSet<StepName> {
        let mut expanded = HashSet::new();
        for dep in deps {
            if dep == "none" || dep == "nothing" {
                continue;
            }
            if let Ok(group_name) = StepName::new(dep.clone()) {
                if let Some(group) = self.groups.get(&group_name) {
                    expanded.extend(group.members.iter().cloned());
                    continue;
                }
                expanded.insert(group_name);
            }
        }
        expanded
    }

    /// Validate that every dependency names a declared step or group, then
    /// expand group references and build the petgraph structure. Must be
    /// called before `parallel_order`/`topological_order`/cycle checks.
    pub fn finalize(&mut self) -> Result<(), FlowError> {
        self.graph = DiGraph::new();
        self.node_index.clear();
        self.expanded.clear();

        for name in &self.declared_order {
            let idx = self.graph.add_node(name.clone());
            self.node_index.insert(name.clone(), idx);
        }

        for name in self.declared_order.clone() {
            let entry = &self.steps[&name];
            for dep in &entry.raw_depends_on {
                if dep == "none" || dep == "nothing" {
                    continue;
                }
                // `StepName::new` fails for any reserved name (including
                // "optional", which can never be a declared step or group),
                // so an `Err` here is itself proof the dependency is unknown
                // — reuse that `Result` instead of re-deriving it and
                // unwrapping, which would panic on exactly this input.
                let known = StepName::new(dep.clone())
                    .map(|n| self.groups.contains_key(&n) || self.steps.contains_key(&n))
                    .unwrap_or(false);
                if !known {
                    return Err(FlowError::UnknownDependency {
                        name: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }

            let expanded = self.expand_dependencies(&entry.raw_depends_on);
            for dep in &expanded {
                if !self.steps.contains_key(dep) {
                    return Err(FlowError::UnknownDependency {
                        name: name.to_string(),
                        dependency: dep.to_string(),
                    });
                }
                let dep_idx = self.node_index[dep];
                let this_idx = self.node_index[&name];
                self.graph.add_edge(dep_idx, this_idx, ());
            }
            self.expanded.insert(name.clone(), expanded);
        }

        self.validate_acyclic()?;
        Ok(())
    }

    fn validate_acyclic(&self) -> Result<(), FlowError> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            let steps = self.find_cycle_members(cycle.node_id());
            FlowError::CyclicDependency { steps }
        })
    }

    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        let mut in_cycle = vec![self.graph[start].to_string()];
        let mut visited = HashSet::new();

        depth_first_search(&self.graph, Some(start), |event| {
            if let DfsEvent::Discover(node, _) = event {
                let name = self.graph[node].to_string();
                if visited.contains(&name) {
                    in_cycle.push(name);
                    return petgraph::visit::Control::Break(());
                }
                visited.insert(name.clone());
                in_cycle.push(name);
            }
            petgraph::visit::Control::Continue
        });

        in_cycle
    }

    /// The *static* (pre-activation) dependency set for `name`, after group
    /// expansion. Used by the scheduler to compute `active_deps`.
    pub fn static_depends_on(&self, name: &StepName) -> HashSet<StepName> {
        self.expanded.get(name).cloned().unwrap_or_default()
    }

    /// Longest-path-level partition: level = 1 + max(level of regular deps);
    /// nodes with empty regular deps are at level 0. Optional steps are
    /// excluded (the scheduler injects them on activation).
    pub fn parallel_order(&self) -> Vec<Vec<StepName>> {
        let mut level_of: HashMap<StepName, usize> = HashMap::new();
        let order = toposort(&self.graph, None).unwrap_or_default();

        for idx in &order {
            let name = &self.graph[*idx];
            if self.is_optional(name) {
                continue;
            }
            let mut level = 0usize;
            for dep_idx in self
                .graph
                .neighbors_directed(*idx, petgraph::Direction::Incoming)
            {
                let dep_name = &self.graph[dep_idx];
                if self.is_optional(dep_name) {
                    continue;
                }
                if let Some(&dep_level) = level_of.get(dep_name) {
                    level = level.max(dep_level + 1);
                }
            }
            level_of.insert(name.clone(), level);
        }

        let max_level = level_of.values().copied().max();
        let Some(max_level) = max_level else {
            return Vec::new();
        };

        let mut levels: Vec<Vec<StepName>> = vec![Vec::new(); max_level + 1];
        for name in &self.declared_order {
            if let Some(&level) = level_of.get(name) {
                levels[level].push(name.clone());
            }
        }
        levels
    }

    /// Any linear extension consistent with levels. Excludes optional steps.
    pub fn topological_order(&self) -> Result<Vec<StepName>, FlowError> {
        toposort(&self.graph, None)
            .map(|nodes| {
                nodes
                    .into_iter()
                    .map(|n| self.graph[n].clone())
                    .filter(|name| !self.is_optional(name))
                    .collect()
            })
            .map_err(|cycle| {
                let steps = self.find_cycle_members(cycle.node_id());
                FlowError::CyclicDependency { steps }
            })
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::step::step_fn;

    fn noop() -> StepFn {
        step_fn(|flow: Flow| async move { flow })
    }

    fn name(s: &str) -> StepName {
        StepName::new(s).unwrap()
    }

    #[test]
    fn diamond_parallel_order() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), DependsOn::None).unwrap();
        g.add_step(name("b"), noop(), vec!["a"].into()).unwrap();
        g.add_step(name("c"), noop(), vec!["a"].into()).unwrap();
        g.add_step(name("d"), noop(), vec!["b", "c"].into())
            .unwrap();
        g.finalize().unwrap();

        let levels = g.parallel_order();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![name("a")]);
        let mut level1 = levels[1].clone();
        level1.sort();
        assert_eq!(level1, vec![name("b"), name("c")]);
        assert_eq!(levels[2], vec![name("d")]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), vec!["b"].into()).unwrap();
        g.add_step(name("b"), noop(), vec!["c"].into()).unwrap();
        g.add_step(name("c"), noop(), vec!["a"].into()).unwrap();

        let err = g.finalize().unwrap_err();
        match err {
            FlowError::CyclicDependency { steps } => {
                assert_eq!(steps.len(), 3);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), vec!["nonexistent"].into())
            .unwrap();

        let err = g.finalize().unwrap_err();
        assert!(matches!(err, FlowError::UnknownDependency { .. }));
    }

    #[test]
    fn reserved_symbol_as_a_named_dependency_is_rejected_not_a_panic() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), vec!["optional"].into())
            .unwrap();

        let err = g.finalize().unwrap_err();
        assert!(matches!(err, FlowError::UnknownDependency { .. }));
    }

    #[test]
    fn group_name_colliding_with_an_existing_step_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_step(name("fanout"), noop(), DependsOn::None).unwrap();

        let err = g
            .add_parallel_group(name("fanout"), vec![name("fanout")], vec![])
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateStep { .. }));
    }

    #[test]
    fn step_name_colliding_with_an_existing_group_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), DependsOn::None).unwrap();
        g.add_parallel_group(name("fanout"), vec![name("a")], vec![])
            .unwrap();

        let err = g.add_step(name("fanout"), noop(), DependsOn::None).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateStep { .. }));
    }

    #[test]
    fn optional_steps_excluded_from_parallel_order() {
        let mut g = DependencyGraph::new();
        g.add_step(name("route"), noop(), DependsOn::None).unwrap();
        g.add_step(name("image"), noop(), DependsOn::Optional)
            .unwrap();
        g.finalize().unwrap();

        let levels = g.parallel_order();
        let flat: Vec<_> = levels.into_iter().flatten().collect();
        assert_eq!(flat, vec![name("route")]);
    }

    #[test]
    fn parallel_group_injects_dependency_onto_members() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), DependsOn::None).unwrap();
        g.add_step(name("b"), noop(), DependsOn::None).unwrap();
        g.add_step(name("c"), noop(), DependsOn::None).unwrap();
        g.add_parallel_group(name("fanout"), vec![name("b"), name("c")], vec!["a".into()])
            .unwrap();
        g.finalize().unwrap();

        assert_eq!(g.static_depends_on(&name("b")), HashSet::from([name("a")]));
        assert_eq!(g.static_depends_on(&name("c")), HashSet::from([name("a")]));
    }

    #[test]
    fn group_reference_in_depends_on_expands_to_members() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), noop(), DependsOn::None).unwrap();
        g.add_step(name("b"), noop(), DependsOn::None).unwrap();
        g.add_step(name("c"), noop(), DependsOn::None).unwrap();
        g.add_parallel_group(name("fanout"), vec![name("b"), name("c")], vec![])
            .unwrap();
        g.add_step(name("d"), noop(), vec!["fanout"].into())
            .unwrap();
        g.finalize().unwrap();

        assert_eq!(
            g.static_depends_on(&name("d")),
            HashSet::from([name("b"), name("c")])
        );
    }
}
