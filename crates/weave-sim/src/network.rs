use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use weave_core::Atom;

use crate::replica::ReplicaIndex;
use crate::rng::DeterministicRng;

/// Fault injection configuration for simulated network delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of sends dropped.
    pub drop_rate_percent: u8,
    /// Percentage of sends duplicated.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of reordering ready messages at each tick.
    pub reorder_rate_percent: u8,
    /// Percentage chance per round to toggle a random network partition.
    pub partition_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
        }
    }
}

impl FaultConfig {
    /// No faults at all: every send arrives exactly once, next round at the latest.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
        }
    }

    /// Percentages above 100, listed by field name.
    #[must_use]
    pub fn out_of_range(&self) -> Vec<&'static str> {
        [
            ("drop_rate_percent", self.drop_rate_percent),
            ("duplicate_rate_percent", self.duplicate_rate_percent),
            ("reorder_rate_percent", self.reorder_rate_percent),
            ("partition_rate_percent", self.partition_rate_percent),
        ]
        .into_iter()
        .filter(|(_, percent)| *percent > 100)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Message carried by the simulated network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Sender.
    pub from: ReplicaIndex,
    /// Receiver.
    pub to: ReplicaIndex,
    /// Atom being replicated.
    pub atom: Atom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlight {
    deliver_at_round: u64,
    message: NetworkMessage,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Message dropped before enqueue.
    pub dropped: bool,
    /// Message was duplicated.
    pub duplicated: bool,
    /// Delay assigned for primary enqueue.
    pub delay_rounds: u8,
}

impl SendOutcome {
    const DROPPED: Self = Self {
        dropped: true,
        duplicated: false,
        delay_rounds: 0,
    };
}

/// Result of delivering all ready messages for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    /// Messages delivered this tick.
    pub delivered: Vec<NetworkMessage>,
    /// Whether delivery order was shuffled.
    pub reordered: bool,
}

/// Deterministic fault-injecting network model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    in_flight: Vec<InFlight>,
    partitioned: BTreeSet<ReplicaIndex>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    /// Create a new network with fault injection.
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            in_flight: Vec::new(),
            partitioned: BTreeSet::new(),
            fault,
        }
    }

    /// Return configured fault options.
    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Isolate or reconnect a replica.
    pub fn set_partitioned(&mut self, replica: ReplicaIndex, isolated: bool) {
        if isolated {
            self.partitioned.insert(replica);
        } else {
            self.partitioned.remove(&replica);
        }
    }

    /// Test whether a replica is currently partitioned.
    #[must_use]
    pub fn is_partitioned(&self, replica: ReplicaIndex) -> bool {
        self.partitioned.contains(&replica)
    }

    /// Reconnect every replica.
    pub fn heal(&mut self) {
        self.partitioned.clear();
    }

    /// Number of queued in-flight messages.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Send a message with fault injection.
    #[must_use]
    pub fn send(
        &mut self,
        message: NetworkMessage,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if self.is_partitioned(message.from) || self.is_partitioned(message.to) {
            return SendOutcome::DROPPED;
        }

        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome::DROPPED;
        }

        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.in_flight.push(InFlight {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.in_flight.push(InFlight {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Deliver all messages whose delivery round has arrived.
    #[must_use]
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, future): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|in_flight| in_flight.deliver_at_round <= round);
        self.in_flight = future;

        let mut delivered: Vec<NetworkMessage> =
            ready.into_iter().map(|in_flight| in_flight.message).collect();

        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut delivered);
        }

        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Hand over everything still in flight, regardless of delivery round.
    #[must_use]
    pub fn drain(&mut self) -> Vec<NetworkMessage> {
        self.in_flight
            .drain(..)
            .map(|in_flight| in_flight.message)
            .collect()
    }
}
