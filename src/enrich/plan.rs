//! Execution order for named artifacts
//!
//! Kahn's algorithm over `name -> dependencies`; whenever several items are
//! ready the alphabetically smallest runs first. Unknown dependencies and
//! cycles are reported before anything is ordered.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use crate::error::{ExportError, Result};

/// Order `items` so that every item comes after its dependencies.
///
/// Fails with [`ExportError::MissingDependency`] naming the first item (in
/// name order) that depends on an unregistered name, or with
/// [`ExportError::CycleDetected`] listing the members of every cycle.
pub fn execution_order<K>(items: &BTreeMap<K, Vec<K>>) -> Result<Vec<K>>
where
    K: Ord + Clone + Display,
{
    for (item, deps) in items {
        if let Some(missing) = deps.iter().find(|d| !items.contains_key(*d)) {
            return Err(ExportError::MissingDependency {
                item: item.to_string(),
                dependency: missing.to_string(),
            });
        }
    }

    let mut in_degree: BTreeMap<&K, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&K, Vec<&K>> = BTreeMap::new();
    for (item, deps) in items {
        let distinct: BTreeSet<&K> = deps.iter().collect();
        in_degree.insert(item, distinct.len());
        for dep in distinct {
            dependents.entry(dep).or_default().push(item);
        }
    }

    let mut ready: BTreeSet<&K> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(item, _)| *item)
        .collect();
    let mut order = Vec::with_capacity(items.len());

    while let Some(item) = ready.pop_first() {
        order.push(item.clone());
        for dependent in dependents.get(item).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(*dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < items.len() {
        let placed: BTreeSet<&K> = order.iter().collect();
        let remaining: Vec<&K> = items.keys().filter(|k| !placed.contains(k)).collect();
        return Err(ExportError::CycleDetected {
            members: cycle_members(items, &remaining),
        });
    }

    Ok(order)
}

/// Names on a cycle among `remaining`, sorted. Items blocked only because
/// they depend on a cycle are left out.
fn cycle_members<K>(items: &BTreeMap<K, Vec<K>>, remaining: &[&K]) -> Vec<String>
where
    K: Ord + Clone + Display,
{
    let mut graph = DiGraph::<&K, ()>::with_capacity(remaining.len(), remaining.len() * 2);
    let node_indices: BTreeMap<&K, _> = remaining
        .iter()
        .map(|item| (*item, graph.add_node(*item)))
        .collect();

    for item in remaining {
        for dep in items.get(*item).into_iter().flatten() {
            if let (Some(&from), Some(&to)) = (node_indices.get(*item), node_indices.get(dep)) {
                graph.update_edge(from, to, ());
            }
        }
    }

    let mut members: Vec<String> = kosaraju_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .filter_map(|idx| graph.node_weight(idx).map(|k| k.to_string()))
        .collect();

    if members.is_empty() {
        members = remaining.iter().map(|k| k.to_string()).collect();
    }
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries.iter()
            .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_diamond() {
        let order = execution_order(&items(&[("A", &[]), ("B", &["A"]), ("C", &["A"]), ("D", &["B", "C"])])).unwrap();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_alphabetical_without_dependencies() {
        let order = execution_order(&items(&[("zeta", &[]), ("alpha", &[]), ("mid", &[])])).unwrap();
        assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_ready_items_tie_break_by_name() {
        let order = execution_order(&items(&[("b", &[]), ("a", &["c"]), ("c", &[])])).unwrap();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_self_cycle() {
        let err = execution_order(&items(&[("A", &["A"])])).unwrap_err();
        match err {
            ExportError::CycleDetected { members } => assert_eq!(members, vec!["A"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_three_cycle_excludes_blocked_dependents() {
        let err = execution_order(&items(&[
            ("A", &["C"]),
            ("B", &["A"]),
            ("C", &["B"]),
            ("D", &["A"]),
            ("E", &[]),
        ]))
        .unwrap_err();
        match err {
            ExportError::CycleDetected { members } => assert_eq!(members, vec!["A", "B", "C"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_dependency_names_both() {
        let err = execution_order(&items(&[("A", &[]), ("B", &["X"])])).unwrap_err();
        match err {
            ExportError::MissingDependency { item, dependency } => {
                assert_eq!(item, "B");
                assert_eq!(dependency, "X");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_dependency_counted_once() {
        let order = execution_order(&items(&[("A", &[]), ("B", &["A", "A"])])).unwrap();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_empty() {
        let order = execution_order(&BTreeMap::<String, Vec<String>>::new()).unwrap();
        assert!(order.is_empty());
    }
}
