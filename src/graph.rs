//! Resolution of the package dependency graph.
//!
//! The graph tracks one node per known package and one labeled edge per
//! import relation. Edge labels carry the weakest import visibility a
//! downstream package uses towards an upstream one; labels are stored on the
//! reverse side and gate how far interface staleness propagates.

use crate::ast::Visibility;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

#[derive(Debug, Default)]
struct GraphInner {
    /// downstream package -> direct upstream packages
    dependencies: HashMap<String, HashSet<String>>,
    /// upstream package -> direct downstream packages
    dependents: HashMap<String, HashSet<String>>,
    /// upstream package -> { downstream package -> import visibility }
    dependent_edges: HashMap<String, HashMap<String, Visibility>>,
}

/// Directed graph of package dependencies with edge visibility.
///
/// One mutex guards the whole structure; every mutator holds it for the full
/// update so the reverse maps can never diverge from the forward map.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: Mutex<GraphInner>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces all outgoing edges of `package`.
    pub fn update_dependencies(&self, package: &str, upstreams: BTreeMap<String, Visibility>) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(old) = inner.dependencies.remove(package) {
            for dep in old {
                if let Some(set) = inner.dependents.get_mut(&dep) {
                    set.remove(package);
                }
                if let Some(edges) = inner.dependent_edges.get_mut(&dep) {
                    edges.remove(package);
                }
            }
        }

        let mut new_set = HashSet::with_capacity(upstreams.len());
        for (upstream, visibility) in upstreams {
            inner.dependents.entry(upstream.clone()).or_default().insert(package.to_string());
            inner
                .dependent_edges
                .entry(upstream.clone())
                .or_default()
                .insert(package.to_string(), visibility);
            new_set.insert(upstream);
        }
        inner.dependencies.insert(package.to_string(), new_set);
    }

    /// Removes a package and all edges touching it.
    pub fn remove_package(&self, package: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(ups) = inner.dependencies.remove(package) {
            for up in ups {
                if let Some(set) = inner.dependents.get_mut(&up) {
                    set.remove(package);
                }
                if let Some(edges) = inner.dependent_edges.get_mut(&up) {
                    edges.remove(package);
                }
            }
        }
        if let Some(downs) = inner.dependents.remove(package) {
            for down in downs {
                if let Some(set) = inner.dependencies.get_mut(&down) {
                    set.remove(package);
                }
            }
        }
        inner.dependent_edges.remove(package);
    }

    /// Renames a node in place, preserving every edge and label.
    pub fn rename_package(&self, old: &str, new: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(ups) = inner.dependencies.remove(old) {
            for up in &ups {
                if let Some(set) = inner.dependents.get_mut(up) {
                    set.remove(old);
                    set.insert(new.to_string());
                }
                if let Some(edges) = inner.dependent_edges.get_mut(up) {
                    if let Some(vis) = edges.remove(old) {
                        edges.insert(new.to_string(), vis);
                    }
                }
            }
            inner.dependencies.insert(new.to_string(), ups);
        }
        if let Some(downs) = inner.dependents.remove(old) {
            for down in &downs {
                if let Some(set) = inner.dependencies.get_mut(down) {
                    set.remove(old);
                    set.insert(new.to_string());
                }
            }
            inner.dependents.insert(new.to_string(), downs);
        }
        if let Some(edges) = inner.dependent_edges.remove(old) {
            inner.dependent_edges.insert(new.to_string(), edges);
        }
    }

    /// Direct upstream packages of `package`.
    pub fn dependencies(&self, package: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        inner.dependencies.get(package).cloned().unwrap_or_default()
    }

    /// Direct downstream packages of `package`.
    pub fn dependents(&self, package: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        inner.dependents.get(package).cloned().unwrap_or_default()
    }

    /// The visibility label of the edge `downstream -> upstream`, if present.
    pub fn edge(&self, upstream: &str, downstream: &str) -> Option<Visibility> {
        let inner = self.inner.lock().unwrap();
        inner.dependent_edges.get(upstream).and_then(|edges| edges.get(downstream)).copied()
    }

    /// All transitive upstream packages of `package`.
    pub fn all_dependencies(&self, package: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        let mut result = HashSet::new();
        let mut stack = vec![package.to_string()];
        let mut visited = HashSet::new();
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur.clone()) {
                continue;
            }
            if let Some(ups) = inner.dependencies.get(&cur) {
                for up in ups {
                    if result.insert(up.clone()) {
                        stack.push(up.clone());
                    }
                }
            }
        }
        result
    }

    /// All transitive downstream packages of `package`.
    pub fn all_dependents(&self, package: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        let mut result = HashSet::new();
        let mut stack = vec![package.to_string()];
        let mut visited = HashSet::new();
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur.clone()) {
                continue;
            }
            if let Some(downs) = inner.dependents.get(&cur) {
                for down in downs {
                    if result.insert(down.clone()) {
                        stack.push(down.clone());
                    }
                }
            }
        }
        result
    }

    /// Transitive dependents reachable while the traversed edges stay
    /// non-private: a private import consumes an interface without
    /// re-exporting any of it, so staleness stops spreading there.
    pub fn may_dependents(&self, package: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        let mut result = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, String)> = Vec::new();
        if let Some(downs) = inner.dependents.get(package) {
            for down in downs {
                stack.push((package.to_string(), down.clone()));
            }
        }
        while let Some((up, down)) = stack.pop() {
            if !visited.insert(down.clone()) {
                continue;
            }
            let Some(vis) =
                inner.dependent_edges.get(&up).and_then(|edges| edges.get(&down)).copied()
            else {
                continue;
            };
            result.insert(down.clone());
            if vis == Visibility::Private {
                continue;
            }
            if let Some(next) = inner.dependents.get(&down) {
                for dep in next {
                    stack.push((down.clone(), dep.clone()));
                }
            }
        }
        result
    }

    /// Returns a linear order consistent with the edges, upstream first, or
    /// `None` when a cycle exists. `reverse` flips the order.
    pub fn topological_sort(&self, reverse: bool) -> Option<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut result = Vec::new();

        let mut nodes: Vec<&String> = inner.dependencies.keys().collect();
        nodes.sort();
        for node in nodes {
            if !visit(&inner, node, &mut visited, &mut in_stack, &mut result) {
                trace!("return empty for cyclic graph");
                return None;
            }
        }

        fn visit(
            inner: &GraphInner,
            node: &str,
            visited: &mut HashSet<String>,
            in_stack: &mut HashSet<String>,
            result: &mut Vec<String>,
        ) -> bool {
            if in_stack.contains(node) {
                return false;
            }
            if visited.contains(node) {
                return true;
            }
            visited.insert(node.to_string());
            in_stack.insert(node.to_string());
            if let Some(ups) = inner.dependencies.get(node) {
                let mut ups: Vec<&String> = ups.iter().collect();
                ups.sort();
                for up in ups {
                    // A self-edge is reported by find_cycles, not here.
                    if up == node {
                        continue;
                    }
                    if !visit(inner, up, visited, in_stack, result) {
                        return false;
                    }
                }
            }
            in_stack.remove(node);
            result.push(node.to_string());
            true
        }

        if reverse {
            result.reverse();
        }
        Some(result)
    }

    /// Restriction of the topological order to `selected`, preserving
    /// relative order. Packages unknown to the graph are dropped.
    pub fn partial_topological_sort(
        &self,
        selected: &HashSet<String>,
        reverse: bool,
    ) -> Vec<String> {
        match self.topological_sort(reverse) {
            Some(full) => full.into_iter().filter(|node| selected.contains(node)).collect(),
            None => Vec::new(),
        }
    }

    /// All simple cycles among the current packages: Tarjan SCCs of size
    /// greater than one, plus self-edges. Never fails.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut state = TarjanState::default();
        let mut cycles = Vec::new();

        let mut nodes: Vec<&String> = inner.dependencies.keys().collect();
        nodes.sort();
        for node in nodes {
            if !state.index.contains_key(node.as_str()) {
                strong_connect(&inner, node, &mut state, &mut cycles);
            }
        }
        cycles
    }
}

#[derive(Default)]
struct TarjanState {
    index: HashMap<String, usize>,
    low: HashMap<String, usize>,
    on_stack: HashSet<String>,
    stack: Vec<String>,
    counter: usize,
}

fn strong_connect(
    inner: &GraphInner,
    node: &str,
    state: &mut TarjanState,
    cycles: &mut Vec<Vec<String>>,
) {
    state.index.insert(node.to_string(), state.counter);
    state.low.insert(node.to_string(), state.counter);
    state.counter += 1;
    state.stack.push(node.to_string());
    state.on_stack.insert(node.to_string());

    let mut self_edge = false;
    if let Some(ups) = inner.dependencies.get(node) {
        let mut ups: Vec<&String> = ups.iter().collect();
        ups.sort();
        for up in ups {
            if up == node {
                self_edge = true;
                continue;
            }
            if !state.index.contains_key(up.as_str()) {
                strong_connect(inner, up, state, cycles);
                let low = state.low[up.as_str()].min(state.low[node]);
                state.low.insert(node.to_string(), low);
            } else if state.on_stack.contains(up.as_str()) {
                let low = state.index[up.as_str()].min(state.low[node]);
                state.low.insert(node.to_string(), low);
            }
        }
    }

    if state.low[node] == state.index[node] {
        let mut component = Vec::new();
        while let Some(member) = state.stack.pop() {
            state.on_stack.remove(&member);
            let done = member == node;
            component.push(member);
            if done {
                break;
            }
        }
        if component.len() > 1 {
            component.sort();
            cycles.push(component);
        } else if self_edge {
            cycles.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, Visibility)]) -> BTreeMap<String, Visibility> {
        pairs.iter().map(|(name, vis)| (name.to_string(), *vis)).collect()
    }

    fn diamond() -> DependencyGraph {
        // d -> b -> a, d -> c -> a
        let graph = DependencyGraph::new();
        graph.update_dependencies("a", edges(&[]));
        graph.update_dependencies("b", edges(&[("a", Visibility::Public)]));
        graph.update_dependencies("c", edges(&[("a", Visibility::Private)]));
        graph.update_dependencies("d", edges(&[("b", Visibility::Public), ("c", Visibility::Public)]));
        graph
    }

    #[test]
    fn topological_sort_orders_upstream_first() {
        let graph = diamond();
        let order = graph.topological_sort(false).unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn partial_sort_preserves_relative_order() {
        let graph = diamond();
        let selected: HashSet<String> = ["d", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(graph.partial_topological_sort(&selected, false), vec!["a", "d"]);
        assert_eq!(graph.partial_topological_sort(&selected, true), vec!["d", "a"]);
    }

    #[test]
    fn transitive_closures() {
        let graph = diamond();
        assert_eq!(graph.all_dependencies("d").len(), 3);
        assert_eq!(graph.all_dependents("a").len(), 3);
        assert_eq!(graph.dependents("a").len(), 2);
    }

    #[test]
    fn may_dependents_stop_at_private_edges() {
        let graph = diamond();
        let may = graph.may_dependents("a");
        // b re-exports a, so d may observe a through b; c imports a privately,
        // c itself is affected but the traversal stops there.
        assert!(may.contains("b"));
        assert!(may.contains("c"));
        assert!(may.contains("d"));

        let graph = DependencyGraph::new();
        graph.update_dependencies("a", edges(&[]));
        graph.update_dependencies("b", edges(&[("a", Visibility::Private)]));
        graph.update_dependencies("c", edges(&[("b", Visibility::Public)]));
        let may = graph.may_dependents("a");
        assert!(may.contains("b"));
        assert!(!may.contains("c"));
    }

    #[test]
    fn cycle_detection_reports_sccs() {
        let graph = diamond();
        assert!(graph.find_cycles().is_empty());
        assert!(graph.topological_sort(false).is_some());

        graph.update_dependencies("a", edges(&[("d", Visibility::Public)]));
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        let mut members = cycles[0].clone();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c", "d"]);
        assert!(graph.topological_sort(false).is_none());
    }

    #[test]
    fn self_import_is_a_cycle() {
        let graph = DependencyGraph::new();
        graph.update_dependencies("a", edges(&[("a", Visibility::Public)]));
        assert_eq!(graph.find_cycles(), vec![vec!["a".to_string()]]);
    }

    #[test]
    fn update_replaces_old_edges() {
        let graph = diamond();
        graph.update_dependencies("d", edges(&[("b", Visibility::Public)]));
        assert!(!graph.dependents("c").contains("d"));
        assert_eq!(graph.edge("c", "d"), None);
        assert_eq!(graph.edge("b", "d"), Some(Visibility::Public));
    }

    #[test]
    fn rename_preserves_edges() {
        let graph = diamond();
        graph.rename_package("a", "a2");
        assert!(graph.dependencies("b").contains("a2"));
        assert_eq!(graph.edge("a2", "b"), Some(Visibility::Public));
        assert!(graph.dependencies("b").len() == 1);
        assert!(graph.all_dependents("a2").contains("d"));
    }
}
