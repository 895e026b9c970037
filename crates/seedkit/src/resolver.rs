//! Dependency ordering of seed units.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ManagerError;
use crate::registry::Registry;

/// Returns `requested` plus everything it transitively depends on, in an
/// order where every unit follows its dependencies.
///
/// Ready units are processed in waves sorted by `(priority, name)`; units
/// made ready by a wave join the next one.
pub fn resolve_order(registry: &Registry, requested: &[String]) -> Result<Vec<String>, ManagerError> {
    let nodes = expand(registry, requested)?;

    let mut in_degree: BTreeMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in &nodes {
        let Some(unit) = registry.get(name) else {
            continue;
        };
        for dependency in &unit.metadata().dependencies {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(name.as_str());
            *in_degree.entry(name.as_str()).or_default() += 1;
        }
    }

    let priority = |name: &str| {
        registry
            .get(name)
            .map(|unit| unit.metadata().priority)
            .unwrap_or_default()
    };

    let mut order = Vec::with_capacity(nodes.len());
    let mut wave: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    while !wave.is_empty() {
        wave.sort_by_key(|name| (priority(*name), *name));
        let mut next = Vec::new();
        for name in wave {
            order.push(name.to_string());
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        wave = next;
    }

    if order.len() < nodes.len() {
        let remaining: BTreeSet<&str> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name)
            .collect();
        return Err(ManagerError::CircularDependency(on_cycle(&remaining, &dependents)));
    }
    Ok(order)
}

/// Transitive closure of `requested` over declared dependencies.
fn expand(registry: &Registry, requested: &[String]) -> Result<BTreeSet<String>, ManagerError> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<String> = requested.to_vec();
    while let Some(name) = stack.pop() {
        if seen.contains(&name) {
            continue;
        }
        let unit = registry
            .get(&name)
            .ok_or_else(|| ManagerError::UnknownUnit(name.clone()))?;
        for dependency in &unit.metadata().dependencies {
            if !registry.contains(dependency) {
                return Err(ManagerError::UnknownDependency {
                    unit: name.clone(),
                    dependency: dependency.clone(),
                });
            }
            stack.push(dependency.clone());
        }
        seen.insert(name);
    }
    Ok(seen)
}

/// Prunes `remaining` down to nodes that sit on a cycle: repeatedly drops
/// nodes with no dependent left inside the set, since those only hang off a
/// cycle.
fn on_cycle(remaining: &BTreeSet<&str>, dependents: &BTreeMap<&str, Vec<&str>>) -> Vec<String> {
    let mut cycle: BTreeSet<&str> = remaining.clone();
    loop {
        let leaves: Vec<&str> = cycle
            .iter()
            .copied()
            .filter(|name| {
                !dependents
                    .get(name)
                    .into_iter()
                    .flatten()
                    .any(|dependent| cycle.contains(dependent))
            })
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            cycle.remove(leaf);
        }
    }
    cycle.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeedError;
    use crate::models::SeedMetadata;
    use crate::unit::{SeedContext, SeedUnit};
    use async_trait::async_trait;

    struct Noop(SeedMetadata);

    #[async_trait]
    impl SeedUnit for Noop {
        fn metadata(&self) -> &SeedMetadata {
            &self.0
        }

        async fn run(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
            Ok(())
        }
    }

    fn registry(units: Vec<SeedMetadata>) -> Registry {
        let mut registry = Registry::new();
        for meta in units {
            registry.register(Noop(meta)).unwrap();
        }
        registry
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dependencies_before_dependents() {
        let registry = registry(vec![
            SeedMetadata::new("A").depends_on(["C"]).priority(10),
            SeedMetadata::new("B").depends_on(["A"]).priority(5),
            SeedMetadata::new("C").priority(20),
        ]);

        let order = resolve_order(&registry, &names(&["A", "B", "C"])).unwrap();
        assert_eq!(order, names(&["C", "A", "B"]));
    }

    #[test]
    fn test_priority_orders_independent_units() {
        let registry = registry(vec![
            SeedMetadata::new("A").priority(10),
            SeedMetadata::new("B").depends_on(["A"]).priority(20),
            SeedMetadata::new("C").priority(5),
        ]);

        let order = resolve_order(&registry, &names(&["A", "B", "C"])).unwrap();
        assert_eq!(order, names(&["C", "A", "B"]));
    }

    #[test]
    fn test_priority_breaks_ties_then_name() {
        let registry = registry(vec![
            SeedMetadata::new("Zeta").priority(1),
            SeedMetadata::new("Alpha").priority(50),
            SeedMetadata::new("Beta").priority(50),
        ]);

        let order = resolve_order(&registry, &names(&["Beta", "Alpha", "Zeta"])).unwrap();
        assert_eq!(order, names(&["Zeta", "Alpha", "Beta"]));
    }

    #[test]
    fn test_newly_ready_units_wait_for_next_wave() {
        let registry = registry(vec![
            SeedMetadata::new("Base").priority(50),
            SeedMetadata::new("Child").depends_on(["Base"]).priority(1),
            SeedMetadata::new("Other").priority(60),
        ]);

        let order = resolve_order(&registry, &names(&["Base", "Child", "Other"])).unwrap();
        assert_eq!(order, names(&["Base", "Other", "Child"]));
    }

    #[test]
    fn test_request_pulls_in_transitive_dependencies() {
        let registry = registry(vec![
            SeedMetadata::new("Roles"),
            SeedMetadata::new("Users").depends_on(["Roles"]),
            SeedMetadata::new("Memberships").depends_on(["Users"]),
            SeedMetadata::new("Unrelated"),
        ]);

        let order = resolve_order(&registry, &names(&["Memberships"])).unwrap();
        assert_eq!(order, names(&["Roles", "Users", "Memberships"]));
    }

    #[test]
    fn test_cycle_names_only_its_members() {
        let registry = registry(vec![
            SeedMetadata::new("X").depends_on(["Y"]),
            SeedMetadata::new("Y").depends_on(["X"]),
            SeedMetadata::new("Downstream").depends_on(["X"]),
            SeedMetadata::new("Free"),
        ]);

        let err = resolve_order(&registry, &names(&["X", "Y", "Downstream", "Free"])).unwrap_err();
        match err {
            ManagerError::CircularDependency(members) => assert_eq!(members, names(&["X", "Y"])),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency_is_fatal() {
        let registry = registry(vec![SeedMetadata::new("A").depends_on(["Ghost"])]);

        let err = resolve_order(&registry, &names(&["A"])).unwrap_err();
        assert!(matches!(
            err,
            ManagerError::UnknownDependency { ref unit, ref dependency }
                if unit == "A" && dependency == "Ghost"
        ));
    }

    #[test]
    fn test_unknown_requested_unit() {
        let registry = registry(vec![SeedMetadata::new("A")]);
        let err = resolve_order(&registry, &names(&["Nope"])).unwrap_err();
        assert!(matches!(err, ManagerError::UnknownUnit(name) if name == "Nope"));
    }
}
