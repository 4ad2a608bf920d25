use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use kestrel_core::address::Address;
use kestrel_core::app::{BlockInputs, Mux, ValidatorUpdate};
use kestrel_core::drbg::Drbg;
use kestrel_core::epochtime::EpochTimeParameters;
use kestrel_core::genesis::{
    ConsensusEngineParameters, ConsensusGenesis, EpochTimeGenesis, Genesis, RegistryGenesis,
    SchedulerGenesis, StakingGenesis,
};
use kestrel_core::quantity::Quantity;
use kestrel_core::state::scheduler::SchedulerState;
use kestrel_core::state::MemoryStore;
use kestrel_core::types::committee::{CommitteeKind, Role, SchedulerParameters};
use kestrel_core::types::registry::{
    GroupParameters, Node, NodeStatus, Runtime, RuntimeKind, TeeHardware, ROLE_COMPUTE_WORKER,
    ROLE_STORAGE_WORKER, ROLE_VALIDATOR,
};
use kestrel_core::types::staking::{Account, Delegation, SharePool, StakingParameters};
use kestrel_core::types::{PublicKey, RuntimeId};

const GENESIS_TIME: u64 = 1_700_000_000;
const EPOCH_INTERVAL: u64 = 100;

fn runtime_id() -> RuntimeId {
    RuntimeId([0x11; 32])
}

fn compute_runtime(worker_size: u64, backup_size: u64) -> Runtime {
    Runtime {
        id: runtime_id(),
        kind: RuntimeKind::Compute,
        tee_hardware: TeeHardware::Invalid,
        executor: GroupParameters {
            group_size: worker_size,
            group_backup_size: backup_size,
        },
        merge: GroupParameters {
            group_size: 1,
            group_backup_size: 0,
        },
        txn_scheduler: GroupParameters {
            group_size: 1,
            group_backup_size: 0,
        },
        storage: GroupParameters {
            group_size: 1,
            group_backup_size: 0,
        },
    }
}

fn node(tag: u8, entity: u8, roles: kestrel_core::types::registry::RolesMask) -> Node {
    Node {
        id: PublicKey([tag; 32]),
        entity_id: PublicKey([entity; 32]),
        consensus_id: PublicKey([tag ^ 0xff; 32]),
        expiration: u64::MAX,
        roles,
        runtimes: vec![kestrel_core::types::registry::NodeRuntime {
            id: runtime_id(),
            tee: None,
        }],
    }
}

fn election_genesis(
    registry: RegistryGenesis,
    scheduler: SchedulerParameters,
    stakes: &[(PublicKey, u64)],
) -> Genesis {
    let mut ledger = BTreeMap::new();
    let mut delegations: BTreeMap<Address, BTreeMap<Address, Delegation>> = BTreeMap::new();
    let mut total_supply = Quantity::zero();
    for (entity, stake) in stakes {
        let address = Address::from_public_key(entity);
        let mut account = Account::default();
        account.escrow.active = SharePool {
            balance: Quantity::from_u64(*stake),
            total_shares: Quantity::from_u64(*stake),
        };
        total_supply.add(&account.escrow.active.balance);
        ledger.insert(address, account);
        delegations.insert(
            address,
            BTreeMap::from([(
                address,
                Delegation {
                    shares: Quantity::from_u64(*stake),
                },
            )]),
        );
    }

    Genesis {
        chain_id: "kestrel-elections".to_string(),
        time: DateTime::<Utc>::from_timestamp(GENESIS_TIME as i64, 0).unwrap(),
        halt_epoch: u64::MAX,
        registry,
        staking: StakingGenesis {
            params: StakingParameters::default(),
            total_supply,
            ledger,
            delegations,
            ..Default::default()
        },
        scheduler: SchedulerGenesis { params: scheduler },
        epochtime: EpochTimeGenesis {
            params: EpochTimeParameters {
                interval: EPOCH_INTERVAL,
            },
        },
        consensus: ConsensusGenesis {
            backend: "test".to_string(),
            params: ConsensusEngineParameters {
                max_tx_size: 1 << 16,
                ..Default::default()
            },
        },
    }
}

fn beacon() -> Vec<u8> {
    vec![0u8; 64]
}

/// Runs the first post-bootstrap block (the one that elects for epoch 1) and
/// returns the validator updates.
fn run_election_block(mux: &mut Mux<MemoryStore>, registry: &RegistryGenesis) -> Vec<ValidatorUpdate> {
    mux.begin_block(BlockInputs {
        height: 1,
        now: GENESIS_TIME + EPOCH_INTERVAL,
        beacon: beacon(),
        registry: kestrel_core::types::registry::RegistrySnapshot {
            entities: registry.entities.clone(),
            runtimes: registry.runtimes.clone(),
            nodes: registry.nodes.clone(),
            statuses: BTreeMap::new(),
        },
        ..Default::default()
    })
    .unwrap();
    let updates = mux.end_block().unwrap();
    mux.commit().unwrap();
    updates
}

#[test]
fn committee_election_is_deterministic() {
    let registry = RegistryGenesis {
        entities: vec![PublicKey([10; 32]), PublicKey([11; 32]), PublicKey([12; 32])],
        runtimes: vec![compute_runtime(2, 1)],
        nodes: vec![
            node(1, 10, ROLE_COMPUTE_WORKER.union(ROLE_STORAGE_WORKER)),
            node(2, 11, ROLE_COMPUTE_WORKER.union(ROLE_STORAGE_WORKER)),
            node(3, 12, ROLE_COMPUTE_WORKER.union(ROLE_STORAGE_WORKER)),
        ],
    };
    let params = SchedulerParameters {
        debug_bypass_stake: true,
        debug_static_validators: true,
        ..Default::default()
    };
    let genesis = election_genesis(registry.clone(), params, &[]);

    let elect = || {
        let mut mux = Mux::new(MemoryStore::new(), &genesis).unwrap();
        run_election_block(&mut mux, &registry);
        let snapshot = mux.snapshot_at(1).unwrap();
        let state = SchedulerState::new(&*snapshot);
        state
            .committee(CommitteeKind::ComputeExecutor, &runtime_id())
            .unwrap()
            .expect("executor committee must be elected")
    };

    let first = elect();
    let second = elect();
    assert_eq!(first, second, "election must be a pure function");

    assert_eq!(first.valid_for, 1);
    assert_eq!(first.members.len(), 3);
    let roles: Vec<Role> = first.members.iter().map(|member| member.role).collect();
    assert_eq!(roles, vec![Role::Worker, Role::Worker, Role::BackupWorker]);

    // All three nodes are used exactly once.
    let mut member_keys: Vec<PublicKey> = first
        .members
        .iter()
        .map(|member| member.public_key)
        .collect();
    member_keys.sort();
    assert_eq!(
        member_keys,
        vec![PublicKey([1; 32]), PublicKey([2; 32]), PublicKey([3; 32])]
    );
}

#[test]
fn txn_scheduler_committee_gets_a_leader() {
    let registry = RegistryGenesis {
        entities: vec![PublicKey([10; 32])],
        runtimes: vec![compute_runtime(1, 0)],
        nodes: vec![node(1, 10, ROLE_COMPUTE_WORKER)],
    };
    let params = SchedulerParameters {
        debug_bypass_stake: true,
        debug_static_validators: true,
        ..Default::default()
    };
    let genesis = election_genesis(registry.clone(), params, &[]);
    let mut mux = Mux::new(MemoryStore::new(), &genesis).unwrap();
    run_election_block(&mut mux, &registry);

    let snapshot = mux.snapshot_at(1).unwrap();
    let state = SchedulerState::new(&*snapshot);
    let committee = state
        .committee(CommitteeKind::ComputeTxnScheduler, &runtime_id())
        .unwrap()
        .unwrap();
    assert_eq!(committee.members.len(), 1);
    assert_eq!(committee.members[0].role, Role::Leader);
}

#[test]
fn underfull_committee_is_dropped() {
    let registry = RegistryGenesis {
        entities: vec![PublicKey([10; 32])],
        runtimes: vec![compute_runtime(5, 2)],
        nodes: vec![node(1, 10, ROLE_COMPUTE_WORKER)],
    };
    let params = SchedulerParameters {
        debug_bypass_stake: true,
        debug_static_validators: true,
        ..Default::default()
    };
    let genesis = election_genesis(registry.clone(), params, &[]);
    let mut mux = Mux::new(MemoryStore::new(), &genesis).unwrap();
    run_election_block(&mut mux, &registry);

    let snapshot = mux.snapshot_at(1).unwrap();
    let state = SchedulerState::new(&*snapshot);
    assert_eq!(
        state
            .committee(CommitteeKind::ComputeExecutor, &runtime_id())
            .unwrap(),
        None,
        "underfull committees are dropped, not padded"
    );
}

#[test]
fn frozen_and_expired_nodes_are_filtered() {
    let mut registry = RegistryGenesis {
        entities: vec![PublicKey([10; 32]), PublicKey([11; 32]), PublicKey([12; 32])],
        runtimes: vec![compute_runtime(1, 0)],
        nodes: vec![
            node(1, 10, ROLE_COMPUTE_WORKER),
            node(2, 11, ROLE_COMPUTE_WORKER),
            node(3, 12, ROLE_COMPUTE_WORKER),
        ],
    };
    // Node 2 expired before epoch 1.
    registry.nodes[1].expiration = 1;
    let params = SchedulerParameters {
        debug_bypass_stake: true,
        debug_static_validators: true,
        ..Default::default()
    };
    let genesis = election_genesis(registry.clone(), params, &[]);
    let mut mux = Mux::new(MemoryStore::new(), &genesis).unwrap();

    mux.begin_block(BlockInputs {
        height: 1,
        now: GENESIS_TIME + EPOCH_INTERVAL,
        beacon: beacon(),
        registry: kestrel_core::types::registry::RegistrySnapshot {
            entities: registry.entities.clone(),
            runtimes: registry.runtimes.clone(),
            nodes: registry.nodes.clone(),
            // Node 3 is frozen.
            statuses: BTreeMap::from([(PublicKey([3; 32]), NodeStatus { frozen: true })]),
        },
        ..Default::default()
    })
    .unwrap();
    mux.end_block().unwrap();
    mux.commit().unwrap();

    let snapshot = mux.snapshot_at(1).unwrap();
    let state = SchedulerState::new(&*snapshot);
    let committee = state
        .committee(CommitteeKind::ComputeExecutor, &runtime_id())
        .unwrap()
        .unwrap();
    assert_eq!(committee.members.len(), 1);
    assert_eq!(committee.members[0].public_key, PublicKey([1; 32]));
}

#[test]
fn validator_election_weights_by_sqrt_stake() {
    let entity_a = PublicKey([10; 32]);
    let entity_b = PublicKey([11; 32]);
    let mut registry = RegistryGenesis {
        entities: vec![entity_a, entity_b],
        runtimes: Vec::new(),
        nodes: vec![
            node(1, 10, ROLE_VALIDATOR),
            node(2, 11, ROLE_VALIDATOR),
        ],
    };
    for node in &mut registry.nodes {
        node.runtimes.clear();
    }
    let params = SchedulerParameters {
        min_validators: 1,
        max_validators: 10,
        max_validators_per_entity: 1,
        ..Default::default()
    };
    let genesis = election_genesis(
        registry.clone(),
        params,
        &[(entity_a, 10_000), (entity_b, 400)],
    );
    let mut mux = Mux::new(MemoryStore::new(), &genesis).unwrap();
    let mut updates = run_election_block(&mut mux, &registry);

    updates.sort_by_key(|update| update.public_key);
    let mut expected = vec![
        ValidatorUpdate {
            public_key: PublicKey([1 ^ 0xff; 32]),
            power: 100,
        },
        ValidatorUpdate {
            public_key: PublicKey([2 ^ 0xff; 32]),
            power: 20,
        },
    ];
    expected.sort_by_key(|update| update.public_key);
    assert_eq!(updates, expected);

    // Re-running the same election produces no further updates.
    mux.begin_block(BlockInputs {
        height: 2,
        now: GENESIS_TIME + 2 * EPOCH_INTERVAL,
        beacon: beacon(),
        registry: kestrel_core::types::registry::RegistrySnapshot {
            entities: registry.entities.clone(),
            runtimes: registry.runtimes.clone(),
            nodes: registry.nodes.clone(),
            statuses: BTreeMap::new(),
        },
        ..Default::default()
    })
    .unwrap();
    let updates = mux.end_block().unwrap();
    mux.commit().unwrap();
    assert!(updates.is_empty());
}

#[test]
fn insufficient_validators_is_fatal() {
    let mut registry = RegistryGenesis {
        entities: vec![PublicKey([10; 32])],
        runtimes: Vec::new(),
        nodes: vec![node(1, 10, ROLE_VALIDATOR)],
    };
    registry.nodes[0].runtimes.clear();
    let params = SchedulerParameters {
        min_validators: 3,
        max_validators: 10,
        max_validators_per_entity: 1,
        debug_bypass_stake: true,
        ..Default::default()
    };
    let genesis = election_genesis(registry.clone(), params, &[]);
    let mut mux = Mux::new(MemoryStore::new(), &genesis).unwrap();

    let result = mux.begin_block(BlockInputs {
        height: 1,
        now: GENESIS_TIME + EPOCH_INTERVAL,
        beacon: beacon(),
        registry: kestrel_core::types::registry::RegistrySnapshot {
            entities: registry.entities.clone(),
            runtimes: registry.runtimes.clone(),
            nodes: registry.nodes.clone(),
            statuses: BTreeMap::new(),
        },
        ..Default::default()
    });
    assert!(result.is_err());
    assert!(result.unwrap_err().is_fatal());
}

#[test]
fn drbg_permutation_is_reproducible_and_complete() {
    let mut a = Drbg::new(&beacon(), runtime_id().as_bytes(), b"EkS-ABCI-Compute");
    let mut b = Drbg::new(&beacon(), runtime_id().as_bytes(), b"EkS-ABCI-Compute");
    let perm_a = a.perm(100);
    let perm_b = b.perm(100);
    assert_eq!(perm_a, perm_b);

    let mut seen = vec![false; 100];
    for index in perm_a {
        assert!(!seen[index]);
        seen[index] = true;
    }
    assert!(seen.into_iter().all(|used| used));
}
