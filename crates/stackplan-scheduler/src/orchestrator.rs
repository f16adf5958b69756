//! Stack orchestrator - applies deployment units in dependency order.

use serde::{Deserialize, Serialize};
use stackplan_core::{
    ApplyLedger, ApplyOptions, ApplyReceipt, ApplyReport, DeploymentGraph, Error, Provisioner,
    ResourceId, Result, SkipReason, UnitId, ValidationWarning,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Event emitted during an apply run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeploymentEvent {
    RunStarted { run_id: ResourceId, units: usize },
    UnitStarted { unit: UnitId },
    UnitApplied { unit: UnitId, receipt: ApplyReceipt },
    UnitFailed { unit: UnitId, message: String },
    UnitSkipped { unit: UnitId, reason: SkipReason },
    RunCompleted { success: bool },
}

/// Orchestrates the application of a deployment graph.
pub struct StackOrchestrator {
    provisioner: Arc<dyn Provisioner>,
    options: ApplyOptions,
}

impl StackOrchestrator {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            options: ApplyOptions::default(),
        }
    }

    /// Create an orchestrator with explicit failure and parallelism options.
    pub fn with_options(provisioner: Arc<dyn Provisioner>, options: ApplyOptions) -> Self {
        Self {
            provisioner,
            options,
        }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Validate every unit with the provisioner, in apply order.
    pub async fn validate(&self, graph: &DeploymentGraph) -> Result<Vec<ValidationWarning>> {
        let order = graph.resolve_order()?;
        let mut warnings = Vec::new();
        for unit in order.units() {
            if !self.provisioner.supports(unit.kind()) {
                return Err(Error::Unsupported(format!(
                    "provisioner '{}' cannot apply {} unit '{}'",
                    self.provisioner.name(),
                    unit.kind(),
                    unit.id
                )));
            }
            warnings.extend(self.provisioner.validate(unit).await?);
        }
        Ok(warnings)
    }

    /// Apply a graph, returning a channel of events and a handle to get the final report.
    ///
    /// The order is resolved before anything is spawned, so a cycle is
    /// reported here and no unit reaches the provisioner.
    pub fn execute(
        &self,
        graph: Arc<DeploymentGraph>,
    ) -> Result<(
        mpsc::Receiver<DeploymentEvent>,
        tokio::task::JoinHandle<ApplyReport>,
    )> {
        let sequence = graph.resolve_order()?.indices().to_vec();

        let (tx, rx) = mpsc::channel(100);
        let provisioner = self.provisioner.clone();
        let options = self.options.clone();

        let handle = tokio::spawn(async move {
            Self::execute_inner(provisioner, graph, sequence, options, tx).await
        });

        Ok((rx, handle))
    }

    /// Internal execution logic
    async fn execute_inner(
        provisioner: Arc<dyn Provisioner>,
        graph: Arc<DeploymentGraph>,
        sequence: Vec<usize>,
        options: ApplyOptions,
        tx: mpsc::Sender<DeploymentEvent>,
    ) -> ApplyReport {
        let run_id = ResourceId::new();
        let max_parallel = options.max_parallel.max(1);
        let mut ledger = ApplyLedger::new(&graph);

        // Position in the resolved order doubles as scheduling priority
        let mut position = vec![0; graph.len()];
        for (pos, &idx) in sequence.iter().enumerate() {
            position[idx] = pos;
        }

        // Dependencies still outstanding per unit
        let mut outstanding: Vec<usize> = (0..graph.len())
            .map(|idx| graph.dependency_indices(idx).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = sequence
            .iter()
            .filter(|&&idx| outstanding[idx] == 0)
            .map(|&idx| Reverse((position[idx], idx)))
            .collect();

        let mut in_flight: JoinSet<Result<ApplyReceipt>> = JoinSet::new();
        // Unit index per running task, so a panicked task still resolves to its unit
        let mut running: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut halted_by: Option<UnitId> = None;

        info!(%run_id, units = graph.len(), max_parallel, "Starting apply run");
        let _ = tx
            .send(DeploymentEvent::RunStarted {
                run_id,
                units: graph.len(),
            })
            .await;

        loop {
            while halted_by.is_none() && in_flight.len() < max_parallel {
                let Some(Reverse((_, idx))) = ready.pop() else {
                    break;
                };
                let request = graph.apply_request_at(idx);
                let unit = request.unit.id.clone();

                info!(unit = %unit, kind = %request.unit.kind(), "Applying unit");
                ledger.start(idx);
                let _ = tx.send(DeploymentEvent::UnitStarted { unit }).await;

                let provisioner = provisioner.clone();
                let task = in_flight.spawn(async move { provisioner.apply(request).await });
                running.insert(task.id(), idx);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            let (task_id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let message = if e.is_panic() {
                        "provisioner panicked".to_string()
                    } else {
                        format!("apply task did not complete: {e}")
                    };
                    (e.id(), Err(Error::Internal(message)))
                }
            };
            let Some(idx) = running.remove(&task_id) else {
                error!(task = %task_id, "Finished task was not tracked");
                continue;
            };
            let unit = graph.unit_at(idx).id.clone();

            match result {
                Ok(receipt) => {
                    info!(unit = %unit, backend = %receipt.backend, "Unit applied");
                    ledger.succeed(idx);
                    let _ = tx
                        .send(DeploymentEvent::UnitApplied {
                            unit: unit.clone(),
                            receipt,
                        })
                        .await;

                    for &dependent in graph.dependent_indices(idx) {
                        outstanding[dependent] -= 1;
                        if outstanding[dependent] == 0 {
                            ready.push(Reverse((position[dependent], dependent)));
                        }
                    }
                }
                Err(e) => {
                    error!(unit = %unit, error = %e, "Unit failed");
                    ledger.fail(idx, e.to_string());
                    let _ = tx
                        .send(DeploymentEvent::UnitFailed {
                            unit: unit.clone(),
                            message: e.to_string(),
                        })
                        .await;

                    for (skipped, reason) in Self::skip_dependents(&graph, &mut ledger, idx, &position)
                    {
                        let _ = tx
                            .send(DeploymentEvent::UnitSkipped {
                                unit: graph.unit_at(skipped).id.clone(),
                                reason,
                            })
                            .await;
                    }

                    if !options.continue_independent_branches && halted_by.is_none() {
                        warn!(unit = %unit, "Halting run after failure");
                        halted_by = Some(unit);
                    }
                }
            }
        }

        if let Some(failed) = &halted_by {
            for &idx in &sequence {
                if !ledger.state(idx).is_terminal() {
                    let _ = tx
                        .send(DeploymentEvent::UnitSkipped {
                            unit: graph.unit_at(idx).id.clone(),
                            reason: SkipReason::Halted {
                                failed: failed.clone(),
                            },
                        })
                        .await;
                }
            }
        }

        let report = ledger.into_report(run_id, &sequence, halted_by.as_ref());
        info!(%run_id, success = report.success, "Apply run finished");
        let _ = tx
            .send(DeploymentEvent::RunCompleted {
                success: report.success,
            })
            .await;

        report
    }

    /// Mark every transitive dependent of a failed unit as skipped.
    ///
    /// Skipped units never reach zero outstanding dependencies, so they are
    /// never released; marking them only records why.
    fn skip_dependents(
        graph: &DeploymentGraph,
        ledger: &mut ApplyLedger,
        failed: usize,
        position: &[usize],
    ) -> Vec<(usize, SkipReason)> {
        let mut skipped = Vec::new();
        let mut queue = VecDeque::from([failed]);
        while let Some(current) = queue.pop_front() {
            for &dependent in graph.dependent_indices(current) {
                if ledger.state(dependent).is_terminal() {
                    continue;
                }
                let reason = SkipReason::DependencyFailed {
                    dependency: graph.unit_at(current).id.clone(),
                };
                info!(unit = %graph.unit_at(dependent).id, %reason, "Skipping unit");
                ledger.skip(dependent, reason.clone());
                skipped.push((dependent, reason));
                queue.push_back(dependent);
            }
        }
        skipped.sort_by_key(|(idx, _)| position[*idx]);
        skipped
    }
}
