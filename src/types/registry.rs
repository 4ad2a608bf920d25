use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EpochTime, PublicKey, RuntimeId};

/// Bitmask of roles a node has registered for.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RolesMask(pub u32);

pub const ROLE_COMPUTE_WORKER: RolesMask = RolesMask(1 << 0);
pub const ROLE_STORAGE_WORKER: RolesMask = RolesMask(1 << 1);
pub const ROLE_KEY_MANAGER: RolesMask = RolesMask(1 << 2);
pub const ROLE_VALIDATOR: RolesMask = RolesMask(1 << 3);

impl RolesMask {
    pub fn union(self, other: RolesMask) -> RolesMask {
        RolesMask(self.0 | other.0)
    }

    pub fn contains(self, role: RolesMask) -> bool {
        self.0 & role.0 == role.0
    }
}

/// Supported trusted execution environments.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TeeHardware {
    #[default]
    Invalid,
    IntelSgx,
}

/// TEE capability advertised by a node for one runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTee {
    pub hardware: TeeHardware,
    /// Attestations are only acceptable while this timestamp is in the
    /// future.
    pub attestation_expiry: u64,
}

impl CapabilityTee {
    pub fn verify(&self, now: u64) -> bool {
        now < self.attestation_expiry
    }
}

/// Per-runtime registration entry of a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRuntime {
    pub id: RuntimeId,
    #[serde(default)]
    pub tee: Option<CapabilityTee>,
}

/// A registered node descriptor, as supplied by the registry snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: PublicKey,
    pub entity_id: PublicKey,
    pub consensus_id: PublicKey,
    pub expiration: EpochTime,
    pub roles: RolesMask,
    #[serde(default)]
    pub runtimes: Vec<NodeRuntime>,
}

impl Node {
    pub fn has_role(&self, role: RolesMask) -> bool {
        self.roles.contains(role)
    }

    pub fn is_expired(&self, epoch: EpochTime) -> bool {
        self.expiration <= epoch
    }

    pub fn runtime(&self, id: &RuntimeId) -> Option<&NodeRuntime> {
        self.runtimes.iter().find(|rt| rt.id == *id)
    }
}

/// Dynamic node status maintained by the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub frozen: bool,
}

/// Group sizing for a committee backed by workers and backup workers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParameters {
    #[serde(default)]
    pub group_size: u64,
    #[serde(default)]
    pub group_backup_size: u64,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Compute,
    KeyManager,
}

/// A registered runtime descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub id: RuntimeId,
    #[serde(default)]
    pub kind: RuntimeKind,
    #[serde(default)]
    pub tee_hardware: TeeHardware,
    #[serde(default)]
    pub executor: GroupParameters,
    #[serde(default)]
    pub merge: GroupParameters,
    #[serde(default)]
    pub txn_scheduler: GroupParameters,
    #[serde(default)]
    pub storage: GroupParameters,
}

impl Runtime {
    pub fn is_compute(&self) -> bool {
        self.kind == RuntimeKind::Compute
    }
}

/// Read-only registry view used for an election pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub entities: Vec<PublicKey>,
    #[serde(default)]
    pub runtimes: Vec<Runtime>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub statuses: BTreeMap<PublicKey, NodeStatus>,
}

impl RegistrySnapshot {
    pub fn node_status(&self, id: &PublicKey) -> NodeStatus {
        self.statuses.get(id).cloned().unwrap_or_default()
    }
}
