use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;
use crate::types::{EpochTime, PublicKey, RuntimeId};

/// The functional kind of a committee.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CommitteeKind {
    ComputeExecutor,
    ComputeTxnScheduler,
    ComputeMerge,
    Storage,
}

impl CommitteeKind {
    /// All kinds elected at an epoch transition, in election order.
    pub const ALL: [CommitteeKind; 4] = [
        CommitteeKind::ComputeExecutor,
        CommitteeKind::ComputeTxnScheduler,
        CommitteeKind::ComputeMerge,
        CommitteeKind::Storage,
    ];

    /// Whether the first elected member acts as the committee leader.
    pub fn needs_leader(self) -> bool {
        matches!(self, CommitteeKind::ComputeTxnScheduler)
    }

    /// Stable single-byte state key component.
    pub fn as_key_byte(self) -> u8 {
        match self {
            CommitteeKind::ComputeExecutor => 0,
            CommitteeKind::ComputeTxnScheduler => 1,
            CommitteeKind::ComputeMerge => 2,
            CommitteeKind::Storage => 3,
        }
    }
}

impl std::fmt::Display for CommitteeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommitteeKind::ComputeExecutor => "executor",
            CommitteeKind::ComputeTxnScheduler => "txn_scheduler",
            CommitteeKind::ComputeMerge => "merge",
            CommitteeKind::Storage => "storage",
        };
        write!(f, "{name}")
    }
}

/// Role of a node inside a committee.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    BackupWorker,
    Leader,
}

/// A single committee member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeNode {
    pub role: Role,
    pub public_key: PublicKey,
}

/// An elected committee for one (kind, runtime) pair, valid for one epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    pub kind: CommitteeKind,
    pub runtime_id: RuntimeId,
    pub members: Vec<CommitteeNode>,
    pub valid_for: EpochTime,
}

/// Scheduler consensus parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerParameters {
    #[serde(default)]
    pub min_validators: usize,
    #[serde(default)]
    pub max_validators: usize,
    #[serde(default)]
    pub max_validators_per_entity: usize,
    /// Factor for the per-epoch reward to entities with any elected node.
    #[serde(default)]
    pub reward_factor_epoch_election_any: Quantity,
    /// Skip entity stake checks and assign flat voting power.
    #[serde(default)]
    pub debug_bypass_stake: bool,
    /// Keep the validator set from genesis instead of electing one.
    #[serde(default)]
    pub debug_static_validators: bool,
}
