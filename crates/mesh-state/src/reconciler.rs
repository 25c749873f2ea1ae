//! Flooding counter reconciliation.
//!
//! Each flooding tick a node commits its own new events into the round and
//! broadcasts `{baseline, internal}` per metric in a FLOODING_HELLO. Peers on
//! the same baseline add that contribution to their `external` part; a peer
//! on a higher baseline is adopted and the round restarts. Once a node has
//! heard from every alive peer it closes the round at
//! `baseline + internal + external` and broadcasts a FLOODING_CONFIRMATION,
//! which receivers fold in by keeping the larger of their own total and the
//! confirmed value.
//!
//! This converges to the true sum once every alive node has completed one
//! hello/confirmation exchange without membership changing mid-round. It is
//! not linearizable: churn during a round can under-count.

use std::collections::{BTreeMap, BTreeSet};

use mesh_protocol::{
    FloodingConfirmation, FloodingHello, Metric, PeerAddress, WorkerReport, WorkerTotal,
};

use crate::registry::WorkerRegistry;
use crate::snapshot::{NetworkSnapshot, NodeValidations, StatsSnapshot};
use crate::stats::{Absorbed, StatsRound};

/// Result of [`StatsReconciler::try_finalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Finalize {
    /// Still waiting on reports from some alive peers.
    Pending,
    /// No alive peers: the round was closed locally.
    Local,
    /// Round closed; send this to every alive peer.
    Broadcast(FloodingConfirmation),
}

pub struct StatsReconciler {
    self_address: PeerAddress,
    metrics: BTreeMap<Metric, StatsRound>,
    /// This node's own validations, gossiped under `self_address`.
    own_validations: StatsRound,
    /// Peers whose hello was counted this round.
    reporters: BTreeSet<PeerAddress>,
}

impl StatsReconciler {
    pub fn new(self_address: PeerAddress) -> Self {
        Self {
            self_address,
            metrics: Metric::ALL.iter().map(|m| (*m, StatsRound::default())).collect(),
            own_validations: StatsRound::default(),
            reporters: BTreeSet::new(),
        }
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    pub fn round(&self, metric: Metric) -> &StatsRound {
        // Every metric is inserted in `new`.
        &self.metrics[&metric]
    }

    pub fn own_validations(&self) -> &StatsRound {
        &self.own_validations
    }

    /// Confirmed value of a metric.
    pub fn value(&self, metric: Metric) -> u64 {
        self.round(metric).baseline
    }

    /// Number of distinct peers counted in the current round.
    pub fn round_results(&self) -> usize {
        self.reporters.len()
    }

    fn round_mut(&mut self, metric: Metric) -> &mut StatsRound {
        self.metrics.entry(metric).or_default()
    }

    /// Note a local event; it joins the round at the next [`commit`](Self::commit).
    pub fn record(&mut self, metric: Metric, amount: u64) {
        self.round_mut(metric).record(amount);
    }

    /// Note candidates checked by this node, counted both cluster-wide and
    /// against this node's own per-worker total.
    pub fn record_validations(&mut self, amount: u64) {
        self.record(Metric::Validations, amount);
        self.own_validations.record(amount);
    }

    /// Start-of-tick: fold uncommitted local events into this round.
    pub fn commit(&mut self) {
        for round in self.metrics.values_mut() {
            round.commit();
        }
        self.own_validations.commit();
    }

    /// The hello broadcast after [`commit`](Self::commit).
    pub fn hello(&self, registry: &WorkerRegistry) -> FloodingHello {
        let mut worker_stats = vec![WorkerReport {
            address: self.self_address.clone(),
            validations: self.own_validations.baseline,
            internal_validations: self.own_validations.internal,
        }];
        worker_stats.extend(registry.workers().map(|w| WorkerReport {
            address: w.address.clone(),
            validations: w.validations.baseline,
            internal_validations: w.validations.internal,
        }));

        FloodingHello {
            reply_address: self.self_address.clone(),
            alive_nodes: registry.alive_addresses(),
            stats: self
                .metrics
                .iter()
                .map(|(metric, round)| (*metric, round.report()))
                .collect(),
            worker_stats,
        }
    }

    /// Fold in a peer's hello.
    pub fn absorb_report(&mut self, hello: &FloodingHello, registry: &mut WorkerRegistry) {
        let from = &hello.reply_address;
        let mut restarted = false;
        for (metric, report) in &hello.stats {
            if self.round_mut(*metric).absorb(from, *report) == Absorbed::Adopted {
                tracing::debug!(
                    peer = %from,
                    metric = %metric,
                    baseline = report.baseline,
                    "Adopted newer baseline, round restarted"
                );
                restarted = true;
            }
        }

        for report in &hello.worker_stats {
            let metric_report = mesh_protocol::MetricReport {
                baseline: report.validations,
                internal: report.internal_validations,
            };
            let round = if report.address == self.self_address {
                &mut self.own_validations
            } else {
                &mut registry.ensure(&report.address).validations
            };
            round.absorb(from, metric_report);
        }

        if restarted {
            self.reporters.clear();
        } else {
            self.reporters.insert(from.clone());
        }
    }

    /// Close the round once every alive peer has reported. A node with no
    /// alive peers closes it on its own.
    pub fn try_finalize(&mut self, registry: &mut WorkerRegistry) -> Finalize {
        let alive = registry.alive_addresses();
        if !alive.is_empty() && !alive.iter().all(|a| self.reporters.contains(a)) {
            return Finalize::Pending;
        }

        let stats: BTreeMap<Metric, u64> = self
            .metrics
            .iter_mut()
            .map(|(metric, round)| (*metric, round.finalize()))
            .collect();
        let mut worker_stats = vec![WorkerTotal {
            address: self.self_address.clone(),
            validations: self.own_validations.finalize(),
        }];
        for worker in registry.workers_mut() {
            worker_stats.push(WorkerTotal {
                address: worker.address.clone(),
                validations: worker.validations.finalize(),
            });
        }
        self.reporters.clear();

        if alive.is_empty() {
            return Finalize::Local;
        }
        tracing::debug!(peers = alive.len(), ?stats, "Flooding round closed");
        Finalize::Broadcast(FloodingConfirmation {
            reply_address: self.self_address.clone(),
            stats,
            worker_stats,
        })
    }

    /// Fold in a peer's round-closing confirmation.
    pub fn absorb_confirmation(
        &mut self,
        confirmation: &FloodingConfirmation,
        registry: &mut WorkerRegistry,
    ) {
        for (metric, confirmed) in &confirmation.stats {
            let mine = self.round_mut(*metric).confirm(*confirmed);
            if mine != *confirmed {
                tracing::warn!(
                    peer = %confirmation.reply_address,
                    metric = %metric,
                    mine,
                    confirmed,
                    "Confirmed value diverges from local total"
                );
            }
        }
        for total in &confirmation.worker_stats {
            let round = if total.address == self.self_address {
                &mut self.own_validations
            } else {
                &mut registry.ensure(&total.address).validations
            };
            round.confirm(total.validations);
        }
        self.reporters.clear();
    }

    pub fn stats_snapshot(&self, registry: &WorkerRegistry) -> StatsSnapshot {
        let all = self
            .metrics
            .iter()
            .map(|(metric, round)| (*metric, round.baseline))
            .collect();
        let mut nodes = vec![NodeValidations {
            address: self.self_address.clone(),
            validations: self.own_validations.baseline,
        }];
        nodes.extend(registry.workers().map(|w| NodeValidations {
            address: w.address.clone(),
            validations: w.validations.baseline,
        }));
        StatsSnapshot::new(all, nodes)
    }

    pub fn network_snapshot(&self, registry: &WorkerRegistry) -> NetworkSnapshot {
        let mut peers = BTreeMap::new();
        peers.insert(self.self_address.clone(), registry.alive_addresses());
        for worker in registry.workers().filter(|w| w.alive) {
            peers.insert(worker.address.clone(), worker.known_peers.clone());
        }
        NetworkSnapshot { peers }
    }
}
