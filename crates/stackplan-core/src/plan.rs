//! Apply planning: resolved orders, per-unit state and run reports.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DeployableUnit, DeploymentGraph, ResourceId, UnitId};

/// How a run reacts to failures and how much it may do at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Keep applying units unrelated to a failed unit. When false the run
    /// halts on the first failure.
    pub continue_independent_branches: bool,
    /// Maximum number of units applied concurrently. 1 means sequential.
    pub max_parallel: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            continue_independent_branches: false,
            max_parallel: 1,
        }
    }
}

impl ApplyOptions {
    pub fn continue_independent_branches(mut self, enabled: bool) -> Self {
        self.continue_independent_branches = enabled;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }
}

/// Why a unit was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SkipReason {
    /// A dependency failed or was itself skipped.
    #[display("dependency '{dependency}' did not succeed")]
    DependencyFailed { dependency: UnitId },
    /// The run stopped after a failure elsewhere.
    #[display("run halted after '{failed}' failed")]
    Halted { failed: UnitId },
}

/// State of a unit during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Pending,
    Running,
    Applied,
    Failed { message: String },
    Skipped { reason: SkipReason },
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Applied | UnitState::Failed { .. } | UnitState::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitState::Applied)
    }
}

/// Final record of one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: UnitId,
    pub state: UnitState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of an apply run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub run_id: ResourceId,
    pub success: bool,
    /// Outcomes in resolved order.
    pub outcomes: Vec<UnitOutcome>,
}

impl ApplyReport {
    pub fn state(&self, id: &str) -> Option<&UnitState> {
        self.outcomes
            .iter()
            .find(|o| o.unit.as_str() == id)
            .map(|o| &o.state)
    }

    pub fn applied(&self) -> Vec<&UnitId> {
        self.with_state(|s| matches!(s, UnitState::Applied))
    }

    pub fn failed(&self) -> Vec<&UnitId> {
        self.with_state(|s| matches!(s, UnitState::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&UnitId> {
        self.with_state(|s| matches!(s, UnitState::Skipped { .. }))
    }

    fn with_state(&self, pred: impl Fn(&UnitState) -> bool) -> Vec<&UnitId> {
        self.outcomes
            .iter()
            .filter(|o| pred(&o.state))
            .map(|o| &o.unit)
            .collect()
    }
}

/// Mutable per-run bookkeeping, indexed like the graph.
#[derive(Debug)]
pub struct ApplyLedger {
    outcomes: Vec<UnitOutcome>,
}

impl ApplyLedger {
    pub fn new(graph: &DeploymentGraph) -> Self {
        Self {
            outcomes: graph
                .units()
                .map(|u| UnitOutcome {
                    unit: u.id.clone(),
                    state: UnitState::Pending,
                    started_at: None,
                    finished_at: None,
                })
                .collect(),
        }
    }

    pub fn state(&self, idx: usize) -> &UnitState {
        &self.outcomes[idx].state
    }

    pub fn start(&mut self, idx: usize) {
        let outcome = &mut self.outcomes[idx];
        outcome.state = UnitState::Running;
        outcome.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, idx: usize) {
        self.finish(idx, UnitState::Applied);
    }

    pub fn fail(&mut self, idx: usize, message: impl Into<String>) {
        self.finish(
            idx,
            UnitState::Failed {
                message: message.into(),
            },
        );
    }

    pub fn skip(&mut self, idx: usize, reason: SkipReason) {
        self.outcomes[idx].state = UnitState::Skipped { reason };
    }

    /// First dependency of `idx` that has not succeeded, if any.
    pub fn blocking_dependency(&self, graph: &DeploymentGraph, idx: usize) -> Option<usize> {
        graph
            .dependency_indices(idx)
            .iter()
            .copied()
            .find(|&dep| !self.outcomes[dep].state.is_success())
    }

    /// Close the run. Units still pending are reported as halted by
    /// `halted_by` when one is given.
    pub fn into_report(
        mut self,
        run_id: ResourceId,
        sequence: &[usize],
        halted_by: Option<&UnitId>,
    ) -> ApplyReport {
        if let Some(failed) = halted_by {
            for outcome in &mut self.outcomes {
                if !outcome.state.is_terminal() {
                    outcome.state = UnitState::Skipped {
                        reason: SkipReason::Halted {
                            failed: failed.clone(),
                        },
                    };
                }
            }
        }
        let success = self.outcomes.iter().all(|o| o.state.is_success());
        let mut slots: Vec<Option<UnitOutcome>> = self.outcomes.into_iter().map(Some).collect();
        let outcomes = sequence
            .iter()
            .filter_map(|&idx| slots[idx].take())
            .collect();
        ApplyReport {
            run_id,
            success,
            outcomes,
        }
    }

    fn finish(&mut self, idx: usize, state: UnitState) {
        let outcome = &mut self.outcomes[idx];
        outcome.state = state;
        outcome.finished_at = Some(Utc::now());
    }
}

/// A dependency-respecting sequence over the units of a graph.
#[derive(Debug, Clone)]
pub struct ApplyOrder<'g> {
    graph: &'g DeploymentGraph,
    sequence: Vec<usize>,
}

impl<'g> ApplyOrder<'g> {
    pub(crate) fn new(graph: &'g DeploymentGraph, sequence: Vec<usize>) -> Self {
        Self { graph, sequence }
    }

    pub fn graph(&self) -> &'g DeploymentGraph {
        self.graph
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Graph indices in apply order.
    pub fn indices(&self) -> &[usize] {
        &self.sequence
    }

    pub fn units(&self) -> impl Iterator<Item = &'g DeployableUnit> + '_ {
        self.sequence.iter().map(|&idx| self.graph.unit_at(idx))
    }

    pub fn ids(&self) -> Vec<&'g UnitId> {
        self.units().map(|u| &u.id).collect()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.units().position(|u| u.id.as_str() == id)
    }

    /// Apply every unit in order with `apply_fn`.
    ///
    /// A unit is only applied once all of its dependencies were applied, so a
    /// failure never reaches its transitive dependents. Without
    /// `continue_independent_branches` the first failure ends the run.
    pub fn apply<F, E>(&self, options: &ApplyOptions, mut apply_fn: F) -> ApplyReport
    where
        F: FnMut(&DeployableUnit) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut ledger = ApplyLedger::new(self.graph);
        let mut halted_by: Option<UnitId> = None;

        for &idx in &self.sequence {
            if halted_by.is_some() {
                break;
            }
            let unit = self.graph.unit_at(idx);

            if let Some(dep) = ledger.blocking_dependency(self.graph, idx) {
                ledger.skip(
                    idx,
                    SkipReason::DependencyFailed {
                        dependency: self.graph.unit_at(dep).id.clone(),
                    },
                );
                continue;
            }

            ledger.start(idx);
            match apply_fn(unit) {
                Ok(()) => ledger.succeed(idx),
                Err(e) => {
                    ledger.fail(idx, e.to_string());
                    if !options.continue_independent_branches {
                        halted_by = Some(unit.id.clone());
                    }
                }
            }
        }

        ledger.into_report(ResourceId::new(), &self.sequence, halted_by.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CloudResource, UnitPayload};
    use serde_json::Value;

    fn graph_of(ids: &[&str], edges: &[(&str, &str)]) -> DeploymentGraph {
        let mut graph = DeploymentGraph::new();
        for id in ids {
            graph
                .add_unit(DeployableUnit::new(
                    *id,
                    UnitPayload::Cloud(CloudResource::new("test", Value::Null)),
                ))
                .unwrap();
        }
        for (from, to) in edges {
            graph.add_dependency(from, to).unwrap();
        }
        graph
    }

    /// a <- b <- c, and d independent of all of them.
    fn chain_with_side_branch() -> DeploymentGraph {
        graph_of(&["a", "b", "c", "d"], &[("b", "a"), ("c", "b")])
    }

    #[test]
    fn test_apply_all_in_order() {
        let graph = chain_with_side_branch();
        let order = graph.resolve_order().unwrap();
        let mut seen = Vec::new();
        let report = order.apply(&ApplyOptions::default(), |u| {
            seen.push(u.id.to_string());
            Ok::<_, String>(())
        });

        assert!(report.success);
        assert_eq!(seen, vec!["a", "b", "c", "d"]);
        assert_eq!(report.applied().len(), 4);
        let outcome = &report.outcomes[0];
        assert!(outcome.started_at.is_some() && outcome.finished_at.is_some());
    }

    #[test]
    fn test_failure_halts_run_by_default() {
        let graph = chain_with_side_branch();
        let order = graph.resolve_order().unwrap();
        let mut seen = Vec::new();
        let report = order.apply(&ApplyOptions::default(), |u| {
            seen.push(u.id.to_string());
            if u.id.as_str() == "b" {
                Err("boom")
            } else {
                Ok(())
            }
        });

        assert!(!report.success);
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(
            report.state("b"),
            Some(&UnitState::Failed {
                message: "boom".to_string()
            })
        );
        let halted = UnitState::Skipped {
            reason: SkipReason::Halted {
                failed: UnitId::from("b"),
            },
        };
        assert_eq!(report.state("c"), Some(&halted));
        assert_eq!(report.state("d"), Some(&halted));
    }

    #[test]
    fn test_failure_skips_dependents_when_continuing() {
        let graph = chain_with_side_branch();
        let order = graph.resolve_order().unwrap();
        let mut seen = Vec::new();
        let options = ApplyOptions::default().continue_independent_branches(true);
        let report = order.apply(&options, |u| {
            seen.push(u.id.to_string());
            if u.id.as_str() == "a" {
                Err("boom")
            } else {
                Ok(())
            }
        });

        assert_eq!(seen, vec!["a", "d"]);
        assert_eq!(report.failed(), vec![&UnitId::from("a")]);
        assert_eq!(report.applied(), vec![&UnitId::from("d")]);
        assert_eq!(
            report.state("c"),
            Some(&UnitState::Skipped {
                reason: SkipReason::DependencyFailed {
                    dependency: UnitId::from("b")
                }
            })
        );
    }

    #[test]
    fn test_no_transitive_dependent_applied_after_failure() {
        let graph = graph_of(
            &["net", "cluster", "db", "grant", "job", "addon"],
            &[
                ("cluster", "net"),
                ("db", "net"),
                ("grant", "db"),
                ("job", "grant"),
                ("job", "cluster"),
                ("addon", "cluster"),
            ],
        );
        let order = graph.resolve_order().unwrap();
        let options = ApplyOptions::default().continue_independent_branches(true);
        let mut seen = Vec::new();
        order.apply(&options, |u| {
            seen.push(u.id.to_string());
            if u.id.as_str() == "db" { Err("down") } else { Ok(()) }
        });

        let dependents: Vec<String> = graph
            .transitive_dependents("db")
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        let failed_at = seen.iter().position(|s| s == "db").unwrap();
        for applied in &seen[failed_at + 1..] {
            assert!(!dependents.contains(applied), "{applied} depends on db");
        }
        assert!(seen.contains(&"addon".to_string()));
    }

    #[test]
    fn test_max_parallel_is_at_least_one() {
        assert_eq!(ApplyOptions::default().with_max_parallel(0).max_parallel, 1);
        assert_eq!(ApplyOptions::default().with_max_parallel(4).max_parallel, 4);
    }
}
