//! # Dependency Analyzer (C4)
//!
//! Builds the dependency graph over a set of [`FieldConfig`]s, rejects
//! cycles, and partitions fetched fields into a single [`Plan::parallel_group`]
//! of mutually-independent fetches plus zero or more [`SequentialChain`]s for
//! fetched fields that parameterize off another fetched field's result. Each
//! chain is itself broken into waves, so two fetches that both depend on the
//! same upstream field but not on each other still fetch concurrently.
//! Calculated fields are never scheduled alongside fetches — they're
//! appended to [`Plan::calculated_order`], evaluated once every fetch has
//! landed (§4.4).
//!
//! Pure: the same `configs` and `available` set always produce a
//! bit-identical plan (ties broken by field name), and the analyzer performs
//! no I/O.

use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::field::{FieldConfig, FieldName};
use crate::value::Value;

/// A run of fetched fields connected by a dependency edge, organized into
/// waves: every field in one wave is independent of every other field in
/// that same wave and may be fetched concurrently, but a wave never starts
/// until the previous one has fully landed (§4.4 — "fields with no
/// outstanding dependencies form the first parallel group; remaining fields
/// whose dependencies are all satisfied after the previous group form the
/// next"). Distinct chains may execute concurrently with each other and
/// with [`Plan::parallel_group`] (§5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialChain {
    pub waves: Vec<Vec<FieldName>>,
}

/// The resolution plan produced by the analyzer: structure only, no fetched
/// values.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Fetched fields with no dependency on another not-yet-available
    /// fetched field — safe to dispatch concurrently.
    pub parallel_group: Vec<FieldName>,
    /// Fetched fields that depend, directly or transitively, on another
    /// fetched field's result.
    pub chains: Vec<SequentialChain>,
    /// Calculated fields in an order that respects all their dependencies.
    pub calculated_order: Vec<FieldName>,
    /// Default values for statically-supplied fields (seeded before any
    /// fetch or calculation runs).
    pub static_defaults: HashMap<FieldName, Value>,
}

struct Graph<'a> {
    configs: HashMap<&'a FieldName, &'a FieldConfig>,
    order: Vec<&'a FieldName>,
}

impl<'a> Graph<'a> {
    fn new(configs: &'a [FieldConfig]) -> Self {
        let mut order: Vec<&FieldName> = configs.iter().map(|c| &c.name).collect();
        order.sort();
        Graph { configs: configs.iter().map(|c| (&c.name, c)).collect(), order }
    }

    fn deps_of(&self, name: &FieldName) -> Vec<FieldName> {
        self.configs
            .get(name)
            .map(|cfg| cfg.all_dependencies())
            .unwrap_or_default()
    }
}

/// Build the resolution plan for `configs`. `available` names fields whose
/// value is already supplied by the caller's execution context — they gate
/// neither the dependency graph nor the parallel partition.
pub fn build_plan(configs: &[FieldConfig], available: &HashSet<FieldName>) -> Result<Plan, EngineError> {
    let graph = Graph::new(configs);

    detect_cycle(&graph)?;
    let topo = topological_order(&graph)?;

    let mut plan = Plan::default();

    for cfg in configs {
        if cfg.is_static() {
            if let Some(default) = &cfg.default_value {
                plan.static_defaults.insert(cfg.name.clone(), default.clone());
            }
        }
    }

    let fetched: HashSet<&FieldName> =
        configs.iter().filter(|c| c.is_fetched()).map(|c| &c.name).collect();

    // Restrict the dependency graph to edges between two fetched fields that
    // the caller hasn't already supplied; everything else is resolved
    // before any fetch is dispatched and so creates no scheduling edge.
    let fetched_edge = |from: &FieldName| -> Vec<FieldName> {
        graph
            .deps_of(from)
            .into_iter()
            .filter(|d| fetched.contains(d) && !available.contains(d))
            .collect()
    };

    let mut visited: HashSet<FieldName> = HashSet::new();
    let mut fetched_sorted: Vec<&FieldName> = fetched.iter().copied().collect();
    fetched_sorted.sort();

    for &name in &fetched_sorted {
        if visited.contains(name) {
            continue;
        }
        let component = weakly_connected_component(name, &fetched, &fetched_edge);
        for member in &component {
            visited.insert(member.clone());
        }
        if component.len() == 1 && fetched_edge(&component[0]).is_empty() {
            plan.parallel_group.push(component[0].clone());
        } else {
            let waves = topo_waves_subset(&component, &fetched_edge);
            plan.chains.push(SequentialChain { waves });
        }
    }
    plan.parallel_group.sort();

    plan.calculated_order = topo
        .into_iter()
        .filter(|name| graph.configs.get(name).is_some_and(|c| c.is_calculated))
        .collect();

    Ok(plan)
}

fn weakly_connected_component(
    start: &FieldName,
    fetched: &HashSet<&FieldName>,
    edges_of: &impl Fn(&FieldName) -> Vec<FieldName>,
) -> Vec<FieldName> {
    // Reverse edges: who depends on `name` (among fetched fields).
    let mut reverse: HashMap<FieldName, Vec<FieldName>> = HashMap::new();
    for &f in fetched {
        for d in edges_of(f) {
            reverse.entry(d).or_default().push(f.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut stack = vec![start.clone()];
    let mut component = Vec::new();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        component.push(node.clone());
        for dep in edges_of(&node) {
            stack.push(dep);
        }
        for dependent in reverse.get(&node).into_iter().flatten() {
            stack.push(dependent.clone());
        }
    }
    component.sort();
    component
}

/// Partitions `subset` into waves by Kahn's algorithm, layer by layer: wave 0
/// is every field with no in-subset dependency, wave 1 is every field whose
/// dependencies are all satisfied once wave 0 lands, and so on. Two fields in
/// the same wave are never directly or transitively dependent on each other.
fn topo_waves_subset(
    subset: &[FieldName],
    edges_of: &impl Fn(&FieldName) -> Vec<FieldName>,
) -> Vec<Vec<FieldName>> {
    let subset_set: HashSet<&FieldName> = subset.iter().collect();
    let mut in_degree: HashMap<FieldName, usize> = subset.iter().map(|f| (f.clone(), 0)).collect();
    let mut forward: HashMap<FieldName, Vec<FieldName>> = HashMap::new();

    for f in subset {
        for d in edges_of(f) {
            if subset_set.contains(&d) {
                forward.entry(d.clone()).or_default().push(f.clone());
                *in_degree.get_mut(f).expect("f in subset") += 1;
            }
        }
    }

    let mut waves = Vec::new();
    let mut current: Vec<FieldName> =
        in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(f, _)| f.clone()).collect();
    current.sort();

    while !current.is_empty() {
        let mut next: HashSet<FieldName> = HashSet::new();
        for node in &current {
            if let Some(dependents) = forward.get(node) {
                for dependent in dependents {
                    let deg = in_degree.get_mut(dependent).expect("tracked degree");
                    *deg -= 1;
                    if *deg == 0 {
                        next.insert(dependent.clone());
                    }
                }
            }
        }
        waves.push(std::mem::take(&mut current));
        current = next.into_iter().collect();
        current.sort();
    }
    waves
}

/// Kahn's algorithm over the full field graph, ties broken lexicographically
/// for determinism (property #9).
fn topological_order(graph: &Graph) -> Result<Vec<FieldName>, EngineError> {
    let mut in_degree: HashMap<FieldName, usize> =
        graph.order.iter().map(|f| ((*f).clone(), 0)).collect();
    let mut forward: HashMap<FieldName, Vec<FieldName>> = HashMap::new();

    for &name in &graph.order {
        for dep in graph.deps_of(name) {
            if graph.configs.contains_key(&dep) {
                forward.entry(dep).or_default().push(name.clone());
                *in_degree.get_mut(name).expect("tracked") += 1;
            }
        }
    }

    let mut ready: Vec<FieldName> =
        in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(f, _)| f.clone()).collect();
    ready.sort();

    let mut ordered = Vec::new();
    while let Some(next) = ready.pop() {
        ordered.push(next.clone());
        if let Some(dependents) = forward.get(&next) {
            let mut newly_ready = Vec::new();
            for dependent in dependents {
                let deg = in_degree.get_mut(dependent).expect("tracked");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(dependent.clone());
                }
            }
            newly_ready.sort();
            ready.extend(newly_ready);
            ready.sort();
        }
    }

    if ordered.len() != graph.order.len() {
        // Kahn's algorithm stalled: a cycle exists. `detect_cycle` ran first
        // and would already have returned a named cycle, so this is
        // unreachable in practice; kept as a defensive fallback.
        return Err(EngineError::CircularDependency(vec![]));
    }
    Ok(ordered)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS with a three-color mark; on a back-edge, reports the elementary
/// cycle found.
fn detect_cycle(graph: &Graph) -> Result<(), EngineError> {
    let mut color: HashMap<FieldName, Color> =
        graph.order.iter().map(|f| ((*f).clone(), Color::White)).collect();
    let mut stack: Vec<FieldName> = Vec::new();

    for &start in &graph.order {
        if color.get(start) == Some(&Color::White) {
            if let Some(cycle) = visit(start, graph, &mut color, &mut stack) {
                return Err(EngineError::CircularDependency(cycle));
            }
        }
    }
    Ok(())
}

fn visit(
    node: &FieldName,
    graph: &Graph,
    color: &mut HashMap<FieldName, Color>,
    stack: &mut Vec<FieldName>,
) -> Option<Vec<FieldName>> {
    color.insert(node.clone(), Color::Gray);
    stack.push(node.clone());

    for dep in graph.deps_of(node) {
        if !graph.configs.contains_key(&dep) {
            continue; // dangling dependency: surfaced separately by validation
        }
        match color.get(&dep) {
            Some(Color::White) => {
                if let Some(cycle) = visit(&dep, graph, color, stack) {
                    return Some(cycle);
                }
            }
            Some(Color::Gray) => {
                let start = stack.iter().position(|f| f == &dep).unwrap_or(0);
                let mut cycle: Vec<FieldName> = stack[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            _ => {}
        }
    }

    stack.pop();
    color.insert(node.clone(), Color::Black);
    None
}
