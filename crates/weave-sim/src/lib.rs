//! weave-sim library.
//!
//! Deterministic simulation of many replicas exchanging atoms over a
//! fault-injecting network. A run is fully determined by its
//! [`SimulationConfig`]; the same seed replays the same trace.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod replica;
pub mod rng;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use weave_core::config::ReplicaConfig;
use weave_core::{Atom, AtomId, Ingested, WeaveError};

use crate::network::{FaultConfig, NetworkMessage, SimulatedNetwork};
use crate::oracle::{ConvergenceOracle, ConvergenceReport};
use crate::replica::{EmitRates, ReplicaIndex, ReplicaState, SimulatedReplica};
use crate::rng::DeterministicRng;

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub replica_count: usize,
    pub rounds: u64,
    /// Peers each new atom is sent to.
    pub fanout: usize,
    /// Chance an emitted atom starts a new root.
    pub root_rate_percent: u8,
    /// Chance an emitted child is a priority tombstone.
    pub tombstone_rate_percent: u8,
    pub fault: FaultConfig,
    pub replica: ReplicaConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            replica_count: 3,
            rounds: 16,
            fanout: 2,
            root_rate_percent: 5,
            tombstone_rate_percent: 10,
            fault: FaultConfig::default(),
            replica: ReplicaConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            bail!("replica_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.fanout >= self.replica_count && self.replica_count > 1 {
            bail!(
                "fanout {} must be below replica_count {}",
                self.fanout,
                self.replica_count
            );
        }
        if self.root_rate_percent > 100 || self.tombstone_rate_percent > 100 {
            bail!("emit rates must be percentages (0-100)");
        }
        let bad = self.fault.out_of_range();
        if !bad.is_empty() {
            bail!("fault rates must be percentages (0-100): {}", bad.join(", "));
        }
        Ok(())
    }

    const fn emit_rates(&self) -> EmitRates {
        EmitRates {
            root_percent: self.root_rate_percent,
            tombstone_percent: self.tombstone_rate_percent,
        }
    }
}

/// One step of a simulation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Round the step happened in; the final drain uses `rounds`.
    pub round: u64,
    pub kind: TraceEventKind,
}

/// What happened in a [`TraceEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    /// A replica authored an atom.
    Emit { replica: ReplicaIndex, atom: Atom },
    /// A replica sent an atom to a peer.
    Send {
        from: ReplicaIndex,
        to: ReplicaIndex,
        atom: AtomId,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u8,
    },
    /// A replica received an atom.
    Deliver {
        from: ReplicaIndex,
        to: ReplicaIndex,
        atom: AtomId,
        outcome: DeliveryOutcome,
    },
    /// The network shuffled this round's deliveries.
    Reorder { messages: usize },
    /// A replica was isolated or reconnected.
    Partition { replica: ReplicaIndex, isolated: bool },
    /// A replica refused an atom.
    Reject {
        replica: ReplicaIndex,
        atom: AtomId,
        error: String,
    },
    /// Final anti-entropy exchange of full sequences.
    Sync {
        from: ReplicaIndex,
        to: ReplicaIndex,
        woven: usize,
    },
}

/// Serializable summary of [`Ingested`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Woven { position: usize, released: usize },
    Duplicate,
    Deferred,
}

impl From<&Ingested> for DeliveryOutcome {
    fn from(ingested: &Ingested) -> Self {
        match ingested {
            Ingested::Inserted { position, released } => Self::Woven {
                position: *position,
                released: released.len(),
            },
            Ingested::Duplicate => Self::Duplicate,
            Ingested::Deferred => Self::Deferred,
        }
    }
}

/// Output of [`Simulator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    /// Every replica's state after the final drain.
    pub states: Vec<ReplicaState>,
    pub convergence: ConvergenceReport,
    /// Whether any fault fired or any atom had to wait in a pending buffer.
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    /// Every emitted atom, in emission order.
    #[must_use]
    pub fn emitted_atoms(&self) -> Vec<Atom> {
        self.trace
            .iter()
            .filter_map(|event| match &event.kind {
                TraceEventKind::Emit { atom, .. } => Some(atom.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Drives replicas and the network through a fixed number of rounds.
#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    network: SimulatedNetwork,
    replicas: Vec<SimulatedReplica>,
    trace: Vec<TraceEvent>,
    interesting: bool,
}

impl Simulator {
    /// Build a simulator with fresh replicas.
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let replicas = (0..config.replica_count)
            .map(|id| SimulatedReplica::new(id, config.replica.clone()))
            .collect();
        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            network: SimulatedNetwork::new(config.fault),
            replicas,
            trace: Vec::new(),
            interesting: false,
            config,
        })
    }

    /// Run every round, then drain the network and exchange full sequences
    /// so every replica ends up holding every atom.
    ///
    /// # Errors
    ///
    /// Reserved for internal failures; replica rejections are traced, not
    /// returned.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.toggle_partition(round);
            for id in 0..self.replicas.len() {
                self.emit_and_send(id, round);
            }
            self.deliver_round(round);
        }
        self.final_drain(self.config.rounds);

        let states: Vec<ReplicaState> = self.replicas.iter().map(SimulatedReplica::snapshot).collect();
        let convergence = ConvergenceOracle::evaluate(&states);
        if !convergence.converged {
            warn!(seed = self.config.seed, divergent = ?convergence.divergent_replicas, "replicas diverged");
        }

        Ok(SimulationResult {
            trace: std::mem::take(&mut self.trace),
            states,
            convergence,
            interesting_state_reached: self.interesting,
        })
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    fn reject(&mut self, round: u64, replica: ReplicaIndex, atom: AtomId, err: &WeaveError) {
        debug!(replica, %atom, code = %err.code(), "atom rejected");
        self.interesting = true;
        self.record(
            round,
            TraceEventKind::Reject {
                replica,
                atom,
                error: err.to_string(),
            },
        );
    }

    fn toggle_partition(&mut self, round: u64) {
        if self.replicas.len() < 2 || !self.rng.hit_rate_percent(self.config.fault.partition_rate_percent) {
            return;
        }
        let replica = self.rng.next_index(self.replicas.len());
        let isolated = !self.network.is_partitioned(replica);
        self.network.set_partitioned(replica, isolated);
        self.interesting = true;
        self.record(round, TraceEventKind::Partition { replica, isolated });
    }

    fn emit_and_send(&mut self, from: ReplicaIndex, round: u64) {
        let rates = self.config.emit_rates();
        let atom = match self.replicas[from].emit(&mut self.rng, rates) {
            Ok(atom) => atom,
            Err(err) => {
                warn!(replica = from, error = %err, "local emit rejected");
                self.interesting = true;
                return;
            }
        };
        self.record(
            round,
            TraceEventKind::Emit {
                replica: from,
                atom: atom.clone(),
            },
        );

        let mut peers: Vec<ReplicaIndex> = (0..self.replicas.len()).filter(|&to| to != from).collect();
        self.rng.shuffle(&mut peers);
        peers.truncate(self.config.fanout);

        for to in peers {
            let message = NetworkMessage {
                from,
                to,
                atom: atom.clone(),
            };
            let sent = self.network.send(message, round, &mut self.rng);
            self.interesting |= sent.dropped || sent.duplicated;
            self.record(
                round,
                TraceEventKind::Send {
                    from,
                    to,
                    atom: atom.id().clone(),
                    dropped: sent.dropped,
                    duplicated: sent.duplicated,
                    delay_rounds: sent.delay_rounds,
                },
            );
        }
    }

    fn deliver_round(&mut self, round: u64) {
        let outcome = self.network.deliver_ready(round, &mut self.rng);
        if outcome.reordered {
            self.interesting = true;
            self.record(
                round,
                TraceEventKind::Reorder {
                    messages: outcome.delivered.len(),
                },
            );
        }
        for message in outcome.delivered {
            self.deliver(round, message);
        }
    }

    fn deliver(&mut self, round: u64, message: NetworkMessage) {
        let NetworkMessage { from, to, atom } = message;
        let atom_id = atom.id().clone();
        match self.replicas[to].receive(atom) {
            Ok(ingested) => {
                let outcome = DeliveryOutcome::from(&ingested);
                self.interesting |= outcome == DeliveryOutcome::Deferred;
                self.record(
                    round,
                    TraceEventKind::Deliver {
                        from,
                        to,
                        atom: atom_id,
                        outcome,
                    },
                );
            }
            Err(err) => self.reject(round, to, atom_id, &err),
        }
    }

    fn final_drain(&mut self, round: u64) {
        self.network.heal();
        for message in self.network.drain() {
            self.deliver(round, message);
        }

        // Replica 0 collects everything first, so one pass reaches everyone.
        let count = self.replicas.len();
        for to in 0..count {
            for from in (0..count).filter(|&from| from != to) {
                let sequence = self.replicas[from].sequence();
                let report = self.replicas[to].sync_from(sequence);
                for err in &report.rejected {
                    warn!(replica = to, error = %err, "sync rejected atom");
                    self.interesting = true;
                }
                if report.woven > 0 {
                    self.record(
                        round,
                        TraceEventKind::Sync {
                            from,
                            to,
                            woven: report.woven,
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            fault: FaultConfig::none(),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_replicas_rejected() {
        let config = SimulationConfig {
            replica_count: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn fanout_must_leave_room_for_sender() {
        let config = SimulationConfig {
            replica_count: 3,
            fanout: 3,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_fault_percent_rejected() {
        let config = SimulationConfig {
            fault: FaultConfig {
                reorder_rate_percent: 150,
                ..FaultConfig::default()
            },
            ..SimulationConfig::default()
        };
        let err = config.validate().expect_err("should fail");
        assert!(err.to_string().contains("reorder_rate_percent"));
    }

    #[test]
    fn every_replica_emits_each_round() {
        let config = quiet_config(1);
        let expected = config.rounds * config.replica_count as u64;
        let result = Simulator::new(config).expect("valid").run().expect("run");
        assert_eq!(result.emitted_atoms().len() as u64, expected);
    }

    #[test]
    fn quiet_network_converges() {
        let result = Simulator::new(quiet_config(2)).expect("valid").run().expect("run");
        assert!(result.convergence.converged);
        assert_eq!(result.convergence.canonical_len, result.emitted_atoms().len());
    }

    #[test]
    fn lossy_network_still_converges_after_drain() {
        let config = SimulationConfig {
            seed: 3,
            replica_count: 4,
            fanout: 1,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 40,
                duplicate_rate_percent: 20,
                reorder_rate_percent: 50,
                partition_rate_percent: 30,
            },
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("valid").run().expect("run");
        assert!(result.interesting_state_reached);
        assert!(result.convergence.converged);
        assert!(result.states.iter().all(|state| state.pending == 0));
        assert!(
            result
                .trace
                .iter()
                .any(|event| matches!(event.kind, TraceEventKind::Sync { .. }))
        );
    }

    #[test]
    fn single_replica_runs_alone() {
        let config = SimulationConfig {
            replica_count: 1,
            fanout: 0,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("valid").run().expect("run");
        assert_eq!(result.states.len(), 1);
        assert!(result.convergence.converged);
    }

    #[test]
    fn same_seed_same_trace() {
        let config = SimulationConfig {
            seed: 11,
            ..SimulationConfig::default()
        };
        let first = Simulator::new(config.clone()).expect("valid").run().expect("run");
        let second = Simulator::new(config).expect("valid").run().expect("run");
        assert_eq!(first, second);
    }

    #[test]
    fn delivery_outcome_from_ingested() {
        assert_eq!(
            DeliveryOutcome::from(&Ingested::Inserted {
                position: 4,
                released: Vec::new(),
            }),
            DeliveryOutcome::Woven {
                position: 4,
                released: 0,
            }
        );
        assert_eq!(DeliveryOutcome::from(&Ingested::Deferred), DeliveryOutcome::Deferred);
    }
}
