//! Deployment graph and apply-order resolution.
//!
//! Units are stored in insertion order and edges as adjacency lists of
//! indices. Resolution uses Kahn's algorithm with the lowest insertion index
//! taken first among ready units, so the order is deterministic.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::plan::ApplyOrder;
use crate::provisioner::ApplyRequest;
use crate::{DeployableUnit, Error, Result, SecretHandle, UnitId};

/// `from` may only be applied after `to` has completed successfully.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: UnitId,
    pub to: UnitId,
}

/// All units and edges of one deployment run.
#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    units: Vec<DeployableUnit>,
    index: HashMap<UnitId, usize>,
    /// `dependencies[i]`: units `i` waits for, in declaration order.
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: units waiting for `i`.
    dependents: Vec<Vec<usize>>,
    /// `bindings[i]`: producers whose secrets unit `i` consumes.
    bindings: Vec<Vec<usize>>,
}

impl DeploymentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit.
    pub fn add_unit(&mut self, unit: DeployableUnit) -> Result<()> {
        if self.index.contains_key(&unit.id) {
            return Err(Error::DuplicateUnit(unit.id));
        }
        let idx = self.units.len();
        self.index.insert(unit.id.clone(), idx);
        self.units.push(unit);
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        self.bindings.push(Vec::new());
        Ok(())
    }

    /// Register that `from` must be applied after `to`.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = self.require(from)?;
        let to_idx = self.require(to)?;
        if !self.dependencies[from_idx].contains(&to_idx) {
            self.dependencies[from_idx].push(to_idx);
            self.dependents[to_idx].push(from_idx);
        }
        Ok(())
    }

    /// Let `consumer` read the secret produced by `producer`.
    ///
    /// Adds the dependency `consumer -> producer` so the secret exists before
    /// the consumer is applied.
    pub fn bind_secret(&mut self, consumer: &str, producer: &str) -> Result<&SecretHandle> {
        let consumer_idx = self.require(consumer)?;
        let producer_idx = self.require(producer)?;
        let Some(handle) = self.units[producer_idx].produces.as_ref() else {
            return Err(Error::SecretNotProduced {
                consumer: self.units[consumer_idx].id.clone(),
                producer: self.units[producer_idx].id.clone(),
            });
        };

        if !self.dependencies[consumer_idx].contains(&producer_idx) {
            self.dependencies[consumer_idx].push(producer_idx);
            self.dependents[producer_idx].push(consumer_idx);
        }
        if !self.bindings[consumer_idx].contains(&producer_idx) {
            self.bindings[consumer_idx].push(producer_idx);
        }
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn unit(&self, id: &str) -> Option<&DeployableUnit> {
        self.index.get(id).map(|&idx| &self.units[idx])
    }

    /// Units in insertion order.
    pub fn units(&self) -> impl Iterator<Item = &DeployableUnit> {
        self.units.iter()
    }

    /// Direct dependencies of a unit.
    pub fn dependencies_of(&self, id: &str) -> Result<Vec<&UnitId>> {
        let idx = self.require(id)?;
        Ok(self.dependencies[idx]
            .iter()
            .map(|&d| &self.units[d].id)
            .collect())
    }

    /// Every unit that depends on `id`, directly or transitively.
    pub fn transitive_dependents(&self, id: &str) -> Result<Vec<&UnitId>> {
        let root = self.require(id)?;
        let mut seen = vec![false; self.units.len()];
        let mut stack = vec![root];
        let mut found = Vec::new();
        while let Some(idx) = stack.pop() {
            for &dependent in &self.dependents[idx] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    found.push(dependent);
                    stack.push(dependent);
                }
            }
        }
        found.sort_unstable();
        Ok(found.into_iter().map(|idx| &self.units[idx].id).collect())
    }

    /// All edges, grouped by dependent unit in insertion order.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(from, deps)| {
                deps.iter().map(move |&to| DependencyEdge {
                    from: self.units[from].id.clone(),
                    to: self.units[to].id.clone(),
                })
            })
            .collect()
    }

    /// Secrets a unit consumes, in binding order.
    pub fn consumed_secrets(&self, id: &str) -> Result<Vec<&SecretHandle>> {
        let idx = self.require(id)?;
        Ok(self.bindings[idx]
            .iter()
            .filter_map(|&p| self.units[p].produces.as_ref())
            .collect())
    }

    /// Owned request handed to a provisioner for one unit.
    pub fn apply_request(&self, id: &str) -> Result<ApplyRequest> {
        let idx = self.require(id)?;
        Ok(self.apply_request_at(idx))
    }

    /// Compute an order in which every unit follows all of its dependencies.
    pub fn resolve_order(&self) -> Result<ApplyOrder<'_>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut sequence = Vec::with_capacity(self.units.len());
        while let Some(Reverse(idx)) = ready.pop() {
            sequence.push(idx);
            for &dependent in &self.dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if sequence.len() < self.units.len() {
            return Err(Error::CycleDetected {
                units: self.find_cycle(&in_degree),
            });
        }

        Ok(ApplyOrder::new(self, sequence))
    }

    /// Extract one cycle from the units Kahn's algorithm could not release.
    ///
    /// Every leftover unit still has a leftover dependency, so following
    /// dependencies from any leftover unit must revisit a unit.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<UnitId> {
        let Some(start) = in_degree.iter().position(|&d| d > 0) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&at) = position.get(&current) {
                return path[at..]
                    .iter()
                    .map(|&idx| self.units[idx].id.clone())
                    .collect();
            }
            position.insert(current, path.len());
            path.push(current);
            match self.dependencies[current]
                .iter()
                .copied()
                .find(|&dep| in_degree[dep] > 0)
            {
                Some(next) => current = next,
                None => {
                    return path
                        .iter()
                        .map(|&idx| self.units[idx].id.clone())
                        .collect();
                }
            }
        }
    }

    fn require(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownUnit(UnitId::from(id)))
    }

    // Index-level access for schedulers working off an `ApplyOrder`.

    pub fn unit_at(&self, idx: usize) -> &DeployableUnit {
        &self.units[idx]
    }

    pub fn dependency_indices(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    pub fn dependent_indices(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    pub fn apply_request_at(&self, idx: usize) -> ApplyRequest {
        ApplyRequest {
            unit: self.units[idx].clone(),
            secrets: self.bindings[idx]
                .iter()
                .filter_map(|&p| self.units[p].produces.clone())
                .collect(),
        }
    }
}
