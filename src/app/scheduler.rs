use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::app::{BlockInputs, Context, ValidatorUpdate};
use crate::drbg::Drbg;
use crate::errors::{CoreError, CoreResult};
use crate::events::{ElectedEvent, Event};
use crate::quantity::Quantity;
use crate::state::scheduler::{SchedulerState, ValidatorSet};
use crate::state::staking::{StakeAccumulatorCache, StakingState};
use crate::types::committee::{
    Committee, CommitteeKind, CommitteeNode, Role, SchedulerParameters,
};
use crate::types::registry::{
    Node, Runtime, TeeHardware, ROLE_COMPUTE_WORKER, ROLE_STORAGE_WORKER, ROLE_VALIDATOR,
};
use crate::types::{EpochTime, PublicKey};

pub const APP_NAME: &str = "scheduler";

const RNG_CONTEXT_EXECUTOR: &[u8] = b"EkS-ABCI-Compute";
const RNG_CONTEXT_STORAGE: &[u8] = b"EkS-ABCI-Storage";
const RNG_CONTEXT_TXN_SCHEDULER: &[u8] = b"EkS-ABCI-TransactionScheduler";
const RNG_CONTEXT_MERGE: &[u8] = b"EkS-ABCI-Merge";
const RNG_CONTEXT_VALIDATORS: &[u8] = b"EkS-ABCI-Validators";
const RNG_CONTEXT_ENTITIES: &[u8] = b"EkS-ABCI-Entities";

/// Consensus voting power derived from an escrow balance:
/// `floor(sqrt(tokens))`, saturated into `[1, i64::MAX]`.
pub fn voting_power_from_tokens(tokens: &Quantity) -> i64 {
    match tokens.floor_sqrt().to_u64() {
        Some(value) => value.clamp(1, i64::MAX as u64) as i64,
        None => i64::MAX,
    }
}

struct EntityStake {
    claims_ok: bool,
    balance: Quantity,
}

type EntityStakeMap = BTreeMap<PublicKey, EntityStake>;

/// The committee scheduler application.
pub struct SchedulerApp;

impl SchedulerApp {
    /// Runs the per-epoch elections. Triggered by an epoch transition or by
    /// stake having been slashed in the previous block.
    pub fn begin_block(
        &self,
        ctx: &mut Context<'_>,
        inputs: &BlockInputs,
        base_epoch: EpochTime,
    ) -> CoreResult<()> {
        let slashed = ctx.last_block_events.iter().any(Event::is_take_escrow);
        if !(ctx.epoch_changed || slashed) {
            return Ok(());
        }
        // The base epoch has neither usable entropy nor node registrations.
        if ctx.epoch == base_epoch {
            info!(epoch = ctx.epoch, "system in bootstrap period, skipping election");
            return Ok(());
        }

        let params = SchedulerState::new(&*ctx.state).parameters()?;

        // Frozen and expired nodes cannot be scheduled.
        let nodes: Vec<&Node> = inputs
            .registry
            .nodes
            .iter()
            .filter(|node| {
                !inputs.registry.node_status(&node.id).frozen && !node.is_expired(ctx.epoch)
            })
            .collect();

        let stake_info = if params.debug_bypass_stake {
            None
        } else {
            Some(Self::collect_entity_stake(ctx, &nodes)?)
        };

        // Entities with any eligible node get the election reward, but only
        // when this is an actual epoch transition.
        let mut eligible: Option<BTreeSet<PublicKey>> =
            ctx.epoch_changed.then(BTreeSet::new);

        // Validators first: failing consensus is catastrophic, while a
        // missing committee is not.
        if !params.debug_static_validators {
            self.elect_validators(ctx, inputs, &params, &stake_info, &mut eligible, &nodes)?;
        }

        for kind in CommitteeKind::ALL {
            for runtime in &inputs.registry.runtimes {
                self.elect_committee(
                    ctx,
                    inputs,
                    &stake_info,
                    &mut eligible,
                    runtime,
                    &nodes,
                    kind,
                )?;
            }
        }
        ctx.events.push(Event::Elected(ElectedEvent {
            kinds: CommitteeKind::ALL.to_vec(),
        }));
        debug!(
            epoch = ctx.epoch,
            runtimes = inputs.registry.runtimes.len(),
            "finished electing committees"
        );

        if let Some(eligible) = eligible {
            let addresses: Vec<Address> =
                eligible.iter().map(Address::from_public_key).collect();
            let rewards = StakingState::new(&mut *ctx.state).add_rewards(
                ctx.epoch,
                &params.reward_factor_epoch_election_any,
                &addresses,
            )?;
            ctx.events.extend(rewards);
        }
        Ok(())
    }

    /// Diffs the pending validator set against the current one and emits the
    /// updates the consensus engine expects.
    pub fn end_block(&self, ctx: &mut Context<'_>) -> CoreResult<Vec<ValidatorUpdate>> {
        let pending = {
            let state = SchedulerState::new(&*ctx.state);
            match state.pending_validators()? {
                Some(pending) => pending,
                None => return Ok(Vec::new()),
            }
        };
        let current = SchedulerState::new(&*ctx.state).current_validators()?;

        let mut state = SchedulerState::new(&mut *ctx.state);
        state.clear_pending_validators();
        state.set_current_validators(&pending)?;

        Ok(diff_validators(&current, &pending))
    }

    /// One-block stake snapshot for every entity with a filtered-in node.
    fn collect_entity_stake(ctx: &Context<'_>, nodes: &[&Node]) -> CoreResult<EntityStakeMap> {
        let staking = StakingState::new(&*ctx.state);
        let mut cache = StakeAccumulatorCache::new(&staking)?;
        let mut info = EntityStakeMap::new();
        for node in nodes {
            if info.contains_key(&node.entity_id) {
                continue;
            }
            let address = Address::from_public_key(&node.entity_id);
            let claims_ok = cache.check_stake_claims(&address).is_ok();
            let balance = cache.escrow_balance(&address)?;
            info.insert(node.entity_id, EntityStake { claims_ok, balance });
        }
        Ok(info)
    }

    fn entity_stake_ok(stake_info: &Option<EntityStakeMap>, entity_id: &PublicKey) -> bool {
        match stake_info {
            None => true,
            Some(info) => info
                .get(entity_id)
                .map(|entry| entry.claims_ok)
                .unwrap_or(false),
        }
    }

    fn elect_validators(
        &self,
        ctx: &mut Context<'_>,
        inputs: &BlockInputs,
        params: &SchedulerParameters,
        stake_info: &Option<EntityStakeMap>,
        eligible: &mut Option<BTreeSet<PublicKey>>,
        nodes: &[&Node],
    ) -> CoreResult<()> {
        let mut node_list: Vec<&Node> = Vec::new();
        let mut entities: BTreeSet<PublicKey> = BTreeSet::new();
        for node in nodes {
            if !node.has_role(ROLE_VALIDATOR) {
                continue;
            }
            if !Self::entity_stake_ok(stake_info, &node.entity_id) {
                continue;
            }
            node_list.push(*node);
            entities.insert(node.entity_id);
        }

        // Entities ordered by descending escrow balance. Starting from the
        // lexicographic order, a beacon-driven shuffle followed by a stable
        // sort makes the tie-breaks deterministically random.
        let mut sorted_entities: Vec<PublicKey> = entities.into_iter().collect();
        let mut drbg = Drbg::new(&inputs.beacon, b"", RNG_CONTEXT_ENTITIES);
        drbg.shuffle(&mut sorted_entities);
        if let Some(info) = stake_info {
            sorted_entities.sort_by(|a, b| info[b].balance.cmp(&info[a].balance));
        }

        // Shuffle the node list; entities with several nodes get them in
        // deterministically random order.
        let mut drbg = Drbg::new(&inputs.beacon, b"", RNG_CONTEXT_VALIDATORS);
        let idxs = drbg.perm(node_list.len());
        let mut entity_nodes: BTreeMap<PublicKey, Vec<&Node>> = BTreeMap::new();
        for idx in idxs {
            let node = node_list[idx];
            entity_nodes.entry(node.entity_id).or_default().push(node);
        }

        let mut new_validators = ValidatorSet::new();
        'elect: for entity_id in &sorted_entities {
            let Some(entity_node_list) = entity_nodes.get(entity_id) else {
                continue;
            };
            for node in entity_node_list.iter().take(params.max_validators_per_entity) {
                if let Some(eligible) = eligible.as_mut() {
                    eligible.insert(node.entity_id);
                }
                let power = match stake_info {
                    // Simplified no-stake deployments get flat voting power.
                    None => 1,
                    Some(info) => voting_power_from_tokens(&info[entity_id].balance),
                };
                new_validators.insert(node.consensus_id, power);
                if new_validators.len() >= params.max_validators {
                    break 'elect;
                }
            }
        }

        if new_validators.is_empty() {
            return Err(CoreError::NoValidators);
        }
        if new_validators.len() < params.min_validators {
            return Err(CoreError::InsufficientValidators);
        }

        SchedulerState::new(&mut *ctx.state).set_pending_validators(&new_validators)
    }

    #[allow(clippy::too_many_arguments)]
    fn elect_committee(
        &self,
        ctx: &mut Context<'_>,
        inputs: &BlockInputs,
        stake_info: &Option<EntityStakeMap>,
        eligible: &mut Option<BTreeSet<PublicKey>>,
        runtime: &Runtime,
        nodes: &[&Node],
        kind: CommitteeKind,
    ) -> CoreResult<()> {
        // Only generic compute runtimes elect the full set of committees.
        if !runtime.is_compute() && kind != CommitteeKind::ComputeExecutor {
            return Ok(());
        }

        let (rng_ctx, worker_size, backup_size) = match kind {
            CommitteeKind::ComputeExecutor => (
                RNG_CONTEXT_EXECUTOR,
                runtime.executor.group_size,
                runtime.executor.group_backup_size,
            ),
            CommitteeKind::ComputeTxnScheduler => {
                (RNG_CONTEXT_TXN_SCHEDULER, runtime.txn_scheduler.group_size, 0)
            }
            CommitteeKind::ComputeMerge => (
                RNG_CONTEXT_MERGE,
                runtime.merge.group_size,
                runtime.merge.group_backup_size,
            ),
            CommitteeKind::Storage => (RNG_CONTEXT_STORAGE, runtime.storage.group_size, 0),
        };

        let mut node_list: Vec<&Node> = Vec::new();
        for node in nodes {
            if !Self::entity_stake_ok(stake_info, &node.entity_id) {
                continue;
            }
            if Self::is_suitable(ctx.now, node, runtime, kind) {
                node_list.push(*node);
                if let Some(eligible) = eligible.as_mut() {
                    eligible.insert(node.entity_id);
                }
            }
        }

        if worker_size == 0 {
            error!(%kind, runtime_id = %runtime.id, "empty committee not allowed");
            SchedulerState::new(&mut *ctx.state).drop_committee(kind, &runtime.id);
            return Ok(());
        }
        let wanted = (worker_size + backup_size) as usize;
        if wanted > node_list.len() {
            error!(
                %kind,
                runtime_id = %runtime.id,
                worker_size,
                backup_size,
                available = node_list.len(),
                "committee size exceeds available nodes"
            );
            SchedulerState::new(&mut *ctx.state).drop_committee(kind, &runtime.id);
            return Ok(());
        }

        let mut drbg = Drbg::new(&inputs.beacon, runtime.id.as_bytes(), rng_ctx);
        let idxs = drbg.perm(node_list.len());
        let needs_leader = kind.needs_leader();
        let mut members = Vec::with_capacity(wanted);
        for (i, idx) in idxs.into_iter().take(wanted).enumerate() {
            let role = if i == 0 && needs_leader {
                Role::Leader
            } else if i >= worker_size as usize {
                Role::BackupWorker
            } else {
                Role::Worker
            };
            members.push(CommitteeNode {
                role,
                public_key: node_list[idx].id,
            });
        }

        SchedulerState::new(&mut *ctx.state).set_committee(&Committee {
            kind,
            runtime_id: runtime.id,
            members,
            valid_for: ctx.epoch,
        })
    }

    fn is_suitable(now: u64, node: &Node, runtime: &Runtime, kind: CommitteeKind) -> bool {
        match kind {
            CommitteeKind::ComputeExecutor => {
                if !node.has_role(ROLE_COMPUTE_WORKER) {
                    return false;
                }
                let Some(node_runtime) = node.runtime(&runtime.id) else {
                    return false;
                };
                match runtime.tee_hardware {
                    TeeHardware::Invalid => node_runtime.tee.is_none(),
                    required => match &node_runtime.tee {
                        None => false,
                        Some(tee) if tee.hardware != required => false,
                        Some(tee) => {
                            if !tee.verify(now) {
                                warn!(
                                    node = %node.id,
                                    runtime_id = %runtime.id,
                                    time_stamp = now,
                                    "failed to verify node TEE attestation"
                                );
                                return false;
                            }
                            true
                        }
                    },
                }
            }
            CommitteeKind::ComputeTxnScheduler | CommitteeKind::ComputeMerge => {
                node.has_role(ROLE_COMPUTE_WORKER) && node.runtime(&runtime.id).is_some()
            }
            CommitteeKind::Storage => {
                node.has_role(ROLE_STORAGE_WORKER) && node.runtime(&runtime.id).is_some()
            }
        }
    }
}

/// Difference between two validator sets as consensus updates: removals get
/// power zero, unchanged entries are omitted.
fn diff_validators(current: &ValidatorSet, pending: &ValidatorSet) -> Vec<ValidatorUpdate> {
    let mut updates = Vec::new();
    for public_key in current.keys() {
        if !pending.contains_key(public_key) {
            debug!(id = %public_key, "removing existing validator from validator set");
            updates.push(ValidatorUpdate {
                public_key: *public_key,
                power: 0,
            });
        }
    }
    for (public_key, power) in pending {
        if current.get(public_key) == Some(power) {
            continue;
        }
        debug!(id = %public_key, power, "upserting validator to validator set");
        updates.push(ValidatorUpdate {
            public_key: *public_key,
            power: *power,
        });
    }
    updates
}
