pub mod scheduler;
pub mod staking;

use std::sync::Arc;

use tracing::info;

use crate::epochtime;
use crate::errors::{CoreError, CoreResult};
use crate::events::{Event, EventBus};
use crate::genesis::Genesis;
use crate::quantity::Quantity;
use crate::state::{Overlay, StateRead, StateStore};
use crate::timer;
use crate::types::registry::RegistrySnapshot;
use crate::types::staking::SlashReason;
use crate::types::transaction::SignedTransaction;
use crate::types::{EpochTime, PublicKey};

use self::scheduler::SchedulerApp;
use self::staking::StakingApp;

/// A validator that signed the previous block, with its voting power.
#[derive(Clone, Debug)]
pub struct Voter {
    pub entity_id: PublicKey,
    pub power: i64,
}

/// Consensus evidence delivered with a block.
#[derive(Clone, Debug)]
pub struct Evidence {
    pub reason: SlashReason,
    pub entity_id: PublicKey,
}

/// Per-block inputs supplied by the consensus engine and the read-only
/// collaborator subsystems.
#[derive(Clone, Debug, Default)]
pub struct BlockInputs {
    pub height: u64,
    /// Proposed block timestamp; the only time source on the hot path.
    pub now: u64,
    /// Entity of this block's proposer.
    pub proposer: Option<PublicKey>,
    /// Entities whose validators signed the previous block.
    pub signers: Vec<Voter>,
    pub evidence: Vec<Evidence>,
    /// Per-epoch random beacon.
    pub beacon: Vec<u8>,
    /// Registry snapshot for this height.
    pub registry: RegistrySnapshot,
}

/// Mutable execution context threaded through one block.
pub struct Context<'a> {
    pub height: u64,
    pub now: u64,
    pub epoch: EpochTime,
    pub epoch_changed: bool,
    pub state: &'a mut Overlay,
    pub events: &'a mut Vec<Event>,
    pub fee_accumulator: &'a mut Quantity,
    pub last_block_events: &'a [Event],
}

/// A single validator-set change to hand to the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub public_key: PublicKey,
    pub power: i64,
}

struct BlockState {
    overlay: Overlay,
    events: Vec<Event>,
    fee_accumulator: Quantity,
    inputs: BlockInputs,
    epoch: EpochTime,
    epoch_changed: bool,
}

/// Deterministic application multiplexer.
///
/// Owns the state store and drives the staking and scheduler applications
/// through the consensus-supplied `begin_block`/`deliver_tx`/`end_block`/
/// `commit` cycle. Strictly single-threaded; queries run against committed
/// snapshots instead.
pub struct Mux<S> {
    store: S,
    bus: Arc<EventBus>,
    staking: StakingApp,
    scheduler: SchedulerApp,
    base_epoch: EpochTime,
    halt_epoch: EpochTime,
    last_block_events: Vec<Event>,
    block: Option<BlockState>,
}

const EVENT_BUS_CAPACITY: usize = 1024;

impl<S: StateStore> Mux<S> {
    /// Initializes the chain from a genesis document.
    pub fn new(mut store: S, genesis: &Genesis) -> CoreResult<Self> {
        genesis.sanity_check()?;
        let mut overlay = Overlay::new(store.head());
        genesis.init_state(&mut overlay)?;
        store.apply(overlay.into_pending());
        store.commit(0);
        Ok(Self {
            store,
            bus: Arc::new(EventBus::new(EVENT_BUS_CAPACITY)),
            staking: StakingApp,
            scheduler: SchedulerApp,
            base_epoch: 0,
            halt_epoch: genesis.halt_epoch,
            last_block_events: Vec::new(),
            block: None,
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn begin_block(&mut self, inputs: BlockInputs) -> CoreResult<()> {
        if self.block.is_some() {
            return Err(CoreError::StateCorruption(
                "begin_block while a block is already open".into(),
            ));
        }

        let mut overlay = Overlay::new(self.store.head());
        let previous_epoch = epochtime::current_epoch(&overlay)?;

        // Fire expired timers before anything else observes the epoch.
        for fired in timer::expired(&overlay, inputs.now)? {
            match fired.app.as_str() {
                epochtime::APP_NAME => {
                    let epoch = epochtime::on_timer(&mut overlay, inputs.now, inputs.height)?;
                    info!(epoch, height = inputs.height, "epoch transition");
                }
                other => {
                    return Err(CoreError::StateCorruption(format!(
                        "timer for unknown application: {other}"
                    )));
                }
            }
        }

        let epoch = epochtime::current_epoch(&overlay)?;
        let epoch_changed = epoch != previous_epoch;
        if epoch >= self.halt_epoch {
            return Err(CoreError::Halted);
        }

        let mut events = Vec::new();
        let mut fee_accumulator = Quantity::zero();
        let mut ctx = Context {
            height: inputs.height,
            now: inputs.now,
            epoch,
            epoch_changed,
            state: &mut overlay,
            events: &mut events,
            fee_accumulator: &mut fee_accumulator,
            last_block_events: &self.last_block_events,
        };

        self.scheduler
            .begin_block(&mut ctx, &inputs, self.base_epoch)?;
        self.staking.begin_block(&mut ctx, &inputs)?;

        self.block = Some(BlockState {
            overlay,
            events,
            fee_accumulator,
            inputs,
            epoch,
            epoch_changed,
        });
        Ok(())
    }

    /// Applies a single transaction. Failed transactions leave no trace in
    /// the state beyond the fee/nonce rules of the error table.
    pub fn deliver_tx(&mut self, raw: &[u8]) -> CoreResult<()> {
        let block = self
            .block
            .as_mut()
            .ok_or_else(|| CoreError::StateCorruption("deliver_tx outside a block".into()))?;

        let engine_params = crate::genesis::consensus_parameters(&block.overlay)?;
        if raw.len() as u64 > engine_params.max_tx_size {
            return Err(CoreError::InvalidArgument);
        }
        let signed: SignedTransaction =
            bincode::deserialize(raw).map_err(|_| CoreError::InvalidArgument)?;
        // Signature failures reject the transaction before any fee moves.
        signed.verify()?;

        let mut ctx = Context {
            height: block.inputs.height,
            now: block.inputs.now,
            epoch: block.epoch,
            epoch_changed: block.epoch_changed,
            state: &mut block.overlay,
            events: &mut block.events,
            fee_accumulator: &mut block.fee_accumulator,
            last_block_events: &self.last_block_events,
        };

        let auth_checkpoint = ctx.state.checkpoint();
        if let Err(err) = StakingApp::authenticate_and_pay_fees(
            &mut ctx,
            &signed,
            raw.len() as u64,
            &engine_params.gas_costs,
        ) {
            ctx.state.rollback(auth_checkpoint);
            return Err(err);
        }

        // The fee and nonce stay applied even when the method body fails.
        let body_checkpoint = ctx.state.checkpoint();
        let events_mark = ctx.events.len();
        if let Err(err) = StakingApp::execute(&mut ctx, &signed) {
            ctx.state.rollback(body_checkpoint);
            ctx.events.truncate(events_mark);
            return Err(err);
        }
        Ok(())
    }

    pub fn end_block(&mut self) -> CoreResult<Vec<ValidatorUpdate>> {
        let block = self
            .block
            .as_mut()
            .ok_or_else(|| CoreError::StateCorruption("end_block outside a block".into()))?;

        let mut ctx = Context {
            height: block.inputs.height,
            now: block.inputs.now,
            epoch: block.epoch,
            epoch_changed: block.epoch_changed,
            state: &mut block.overlay,
            events: &mut block.events,
            fee_accumulator: &mut block.fee_accumulator,
            last_block_events: &self.last_block_events,
        };

        self.staking.end_block(&mut ctx)?;
        self.scheduler.end_block(&mut ctx)
    }

    /// Commits the open block, publishing its events and returning the new
    /// state root.
    pub fn commit(&mut self) -> CoreResult<[u8; 32]> {
        let block = self
            .block
            .take()
            .ok_or_else(|| CoreError::StateCorruption("commit outside a block".into()))?;

        self.store.apply(block.overlay.into_pending());
        let root = self.store.commit(block.inputs.height);
        self.bus
            .publish_block(block.inputs.height, block.events.clone());
        self.last_block_events = block.events;
        Ok(root)
    }

    /// Immutable snapshot for serving queries at a committed height.
    pub fn snapshot_at(&self, height: u64) -> Option<Arc<dyn StateRead + Send + Sync>> {
        self.store.snapshot_at(height)
    }

    pub fn latest_height(&self) -> Option<u64> {
        self.store.latest_version()
    }
}
