//! The per-partition execution driver.
//!
//! A driver owns exactly one claimed feed partition for its lifetime and
//! turns the claim into a running tuple pipeline: pull the next tuple,
//! hand it to the root operator, forward everything it emits, repeat.
//! Tuple handling is strictly sequential, which is what gives the
//! per-partition ordering guarantee.
//!
//! A driver never self-terminates except at true end of stream: it is
//! stopped cooperatively by the scheduler's reconcile step (or process
//! shutdown) through its stop signal, checked between tuples and raced
//! against the blocking partition read.

#[cfg(test)]
mod mod_test;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::feed::FeedPartition;
use crate::operator::OperatorTree;
use crate::tuple::Tuple;

/// The terminal outcome of one driver.
#[derive(Debug)]
pub enum DriverOutcome {
    /// The driver was stopped through its stop signal.
    Stopped,
    /// The feed partition reported no more input.
    EndOfStream,
    /// Operator handling or the partition read failed.
    ///
    /// The partition is poisoned for this driver instance; the scheduler
    /// releases it for re-claim rather than retrying here.
    Failed(anyhow::Error),
}

/// A driver's exit report, surfaced to the scheduler.
#[derive(Debug)]
pub struct DriverExit {
    /// The name of the plan the driver was executing.
    pub plan: Arc<String>,
    /// The feed partition the driver owned.
    pub partition: String,
    /// The terminal outcome.
    pub outcome: DriverOutcome,
}

/// A driver for one claimed (feed partition, operator tree) pair.
pub struct Driver {
    /// The name of the plan being executed.
    plan: Arc<String>,
    /// The id of the owned partition.
    partition_id: String,
    /// The open partition reader.
    partition: Box<dyn FeedPartition>,
    /// The operator tree built from the plan's root operator descriptor.
    tree: OperatorTree,
    /// The cooperative stop signal, flipped to `true` by the scheduler.
    stop_rx: watch::Receiver<bool>,
    /// The channel used to report this driver's exit.
    exits_tx: mpsc::Sender<DriverExit>,
}

impl Driver {
    /// Create a new instance.
    pub fn new(
        plan: Arc<String>, partition_id: String, partition: Box<dyn FeedPartition>, tree: OperatorTree, stop_rx: watch::Receiver<bool>,
        exits_tx: mpsc::Sender<DriverExit>,
    ) -> Self {
        Self { plan, partition_id, partition, tree, stop_rx, exits_tx }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!(plan = %self.plan, partition = %self.partition_id, "driver started");
        let outcome = self.drive().await;
        match &outcome {
            DriverOutcome::Stopped => tracing::debug!(plan = %self.plan, partition = %self.partition_id, "driver stopped"),
            DriverOutcome::EndOfStream => tracing::info!(plan = %self.plan, partition = %self.partition_id, "driver reached end of stream"),
            DriverOutcome::Failed(err) => tracing::error!(error = ?err, plan = %self.plan, partition = %self.partition_id, "driver failed"),
        }
        let exit = DriverExit {
            plan: self.plan.clone(),
            partition: self.partition_id.clone(),
            outcome,
        };
        let _ = self.exits_tx.send(exit).await;
    }

    /// Run the tuple loop to its terminal outcome.
    async fn drive(&mut self) -> DriverOutcome {
        // Operator initialization is synchronous and must complete before
        // any tuple is processed.
        if let Err(err) = self.tree.initialize() {
            return DriverOutcome::Failed(err.context("error initializing operator tree"));
        }

        let mut slot = Tuple::new();
        loop {
            if *self.stop_rx.borrow() {
                return DriverOutcome::Stopped;
            }
            slot.clear();
            tokio::select! {
                res = self.partition.next(&mut slot) => match res {
                    Ok(true) => {
                        if let Err(err) = self.tree.dispatch(&slot) {
                            return DriverOutcome::Failed(err.context("error handling tuple"));
                        }
                    }
                    Ok(false) => return DriverOutcome::EndOfStream,
                    Err(err) => return DriverOutcome::Failed(err.context("error reading from feed partition")),
                },
                // A closed stop channel means the scheduler is gone; treat
                // it the same as an explicit stop.
                _ = self.stop_rx.changed() => return DriverOutcome::Stopped,
            }
        }
    }
}
