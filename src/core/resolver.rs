//! Dependency ordering for components and template resources.
//!
//! Both graphs are sorted with Kahn's algorithm. Components break ties by
//! declaration order so the result matches the fixed composition order;
//! resources break ties alphabetically for deterministic output.

use super::error::{Error, Result};
use super::template::Template;
use super::types::{Component, FeatureToggles};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Order the active components so each follows everything it consumes.
/// Edges to inactive optional components are dropped.
pub fn build_component_order(features: &FeatureToggles) -> Result<Vec<Component>> {
    let active: Vec<Component> = Component::ALL
        .into_iter()
        .filter(|c| features.is_active(*c))
        .collect();

    let mut in_degree: HashMap<Component, usize> = active.iter().map(|c| (*c, 0)).collect();
    let mut dependents: HashMap<Component, Vec<Component>> = HashMap::new();

    for component in &active {
        for dep in component.dependencies() {
            if !features.is_active(*dep) {
                if dep.is_optional() {
                    continue;
                }
                return Err(Error::declaration(format!(
                    "{} requires {}, which is not active",
                    component, dep
                )));
            }
            dependents.entry(*dep).or_default().push(*component);
            *in_degree.entry(*component).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<Component> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(c, _)| *c)
        .collect();
    let mut order = Vec::with_capacity(active.len());

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for next in dependents.get(&current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    if order.len() != active.len() {
        return Err(Error::declaration("component dependency cycle"));
    }
    Ok(order)
}

/// Topological order of template resources over references and
/// `DependsOn`, alphabetical tie-breaking.
pub fn build_resource_order(template: &Template) -> Result<Vec<String>> {
    let resource_ids: Vec<String> = template.resources.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &resource_ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for id in &resource_ids {
        for dep in template.references_of(id) {
            if dep == *id {
                return Err(Error::declaration(format!("resource '{}' references itself", id)));
            }
            let Some(dependents) = adjacency.get_mut(&dep) else {
                return Err(Error::declaration(format!(
                    "resource '{}' references unknown '{}'",
                    id, dep
                )));
            };
            dependents.push(id.clone());
            if let Some(degree) = in_degree.get_mut(id) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    queue.extend(zero_degree);

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(neighbors) = adjacency.get(&current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor.clone());
                    }
                }
            }
        }
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != resource_ids.len() {
        let ordered: HashSet<_> = order.iter().collect();
        let mut cycle_members: Vec<&str> = resource_ids
            .iter()
            .filter(|id| !ordered.contains(id))
            .map(|s| s.as_str())
            .collect();
        cycle_members.sort();
        return Err(Error::declaration(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        )));
    }

    Ok(order)
}
