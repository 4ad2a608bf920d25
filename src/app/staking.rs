use tracing::{debug, warn};

use crate::address::{fee_accumulator_address, Address};
use crate::app::{BlockInputs, Context};
use crate::errors::{CoreError, CoreResult};
use crate::events::{
    AddEscrowEvent, BurnEvent, EscrowEvent, Event, ReclaimEscrowEvent, TransferEvent,
};
use crate::quantity::Quantity;
use crate::state::staking::StakingState;
use crate::types::staking::{
    AmendCommissionSchedule, Burn, DebondingDelegation, Escrow, ReclaimEscrow, Transfer,
};
use crate::types::transaction::{
    GasCosts, SignedTransaction, GAS_OP_ADD_ESCROW, GAS_OP_AMEND_COMMISSION_SCHEDULE,
    GAS_OP_BURN, GAS_OP_RECLAIM_ESCROW, GAS_OP_TRANSFER, GAS_OP_TX_BYTE, METHOD_ADD_ESCROW,
    METHOD_AMEND_COMMISSION_SCHEDULE, METHOD_BURN, METHOD_RECLAIM_ESCROW, METHOD_TRANSFER,
};

pub const APP_NAME: &str = "staking";

/// The staking ledger application.
pub struct StakingApp;

impl StakingApp {
    pub fn begin_block(&self, ctx: &mut Context<'_>, inputs: &BlockInputs) -> CoreResult<()> {
        if ctx.epoch_changed {
            self.reward_epoch_signing(ctx)?;
            self.process_debonding(ctx)?;
        }
        self.disburse_fees(ctx, inputs)?;
        self.update_epoch_signing(ctx, inputs)?;
        self.process_evidence(ctx, inputs)?;
        Ok(())
    }

    /// Moves the fees accumulated by this block's transactions into the
    /// `last_block_fees` global, to be disbursed at the next block.
    pub fn end_block(&self, ctx: &mut Context<'_>) -> CoreResult<()> {
        let fees = std::mem::take(ctx.fee_accumulator);
        if fees.is_zero() {
            return Ok(());
        }
        let mut state = StakingState::new(&mut *ctx.state);
        let mut last = state.last_block_fees()?;
        last.add(&fees);
        state.set_last_block_fees(&last)
    }

    /// Nonce authentication and fee deduction, applied before the method
    /// body. The whole step rolls back on failure.
    pub fn authenticate_and_pay_fees(
        ctx: &mut Context<'_>,
        signed: &SignedTransaction,
        tx_size: u64,
        engine_gas_costs: &GasCosts,
    ) -> CoreResult<()> {
        let signer = signed.signer_address();
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        let mut account = state.account(&signer)?;

        if signed.content.nonce != account.general.nonce {
            return Err(CoreError::InvalidArgument);
        }

        let tx_byte_cost = engine_gas_costs.get(GAS_OP_TX_BYTE).copied().unwrap_or(0);
        let op_cost = gas_op_for_method(&signed.content.method)
            .and_then(|op| params.gas_costs.get(op).copied())
            .unwrap_or(0);
        let required_gas = op_cost.saturating_add(tx_byte_cost.saturating_mul(tx_size));
        if signed.content.fee.gas < required_gas {
            return Err(CoreError::InvalidArgument);
        }

        account.general.balance.sub(&signed.content.fee.amount)?;
        account.general.nonce += 1;
        state.set_account(&signer, &account)?;
        ctx.fee_accumulator.add(&signed.content.fee.amount);
        Ok(())
    }

    /// Dispatches a transaction's method body.
    pub fn execute(ctx: &mut Context<'_>, signed: &SignedTransaction) -> CoreResult<()> {
        let signer = signed.signer_address();
        match signed.content.method.as_str() {
            METHOD_TRANSFER => Self::transfer(ctx, &signer, signed.content.decode_body()?),
            METHOD_BURN => Self::burn(ctx, &signer, signed.content.decode_body()?),
            METHOD_ADD_ESCROW => Self::add_escrow(ctx, &signer, signed.content.decode_body()?),
            METHOD_RECLAIM_ESCROW => {
                Self::reclaim_escrow(ctx, &signer, signed.content.decode_body()?)
            }
            METHOD_AMEND_COMMISSION_SCHEDULE => {
                Self::amend_commission_schedule(ctx, &signer, signed.content.decode_body()?)
            }
            _ => Err(CoreError::InvalidArgument),
        }
    }

    fn transfer(ctx: &mut Context<'_>, signer: &Address, body: Transfer) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        if params.disable_transfers && !params.undisable_transfers_from.contains(signer) {
            return Err(CoreError::Forbidden);
        }

        if body.to == *signer {
            // Self-transfer only has to prove the balance exists.
            let account = state.account(signer)?;
            if account.general.balance < body.tokens {
                return Err(CoreError::InsufficientBalance);
            }
        } else {
            let mut from = state.account(signer)?;
            from.general.balance.sub(&body.tokens)?;
            let mut to = state.account(&body.to)?;
            to.general.balance.add(&body.tokens);
            state.set_account(signer, &from)?;
            state.set_account(&body.to, &to)?;
        }

        ctx.events.push(Event::Transfer(TransferEvent {
            from: *signer,
            to: body.to,
            tokens: body.tokens,
        }));
        Ok(())
    }

    fn burn(ctx: &mut Context<'_>, signer: &Address, body: Burn) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let mut account = state.account(signer)?;
        account.general.balance.sub(&body.tokens)?;
        let mut supply = state.total_supply()?;
        supply.sub(&body.tokens)?;
        state.set_account(signer, &account)?;
        state.set_total_supply(&supply)?;

        ctx.events.push(Event::Burn(BurnEvent {
            owner: *signer,
            tokens: body.tokens,
        }));
        Ok(())
    }

    fn add_escrow(ctx: &mut Context<'_>, signer: &Address, body: Escrow) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        if params.disable_delegation {
            return Err(CoreError::Forbidden);
        }

        let escrow_addr = body.account;
        let mut delegation = state.delegation(signer, &escrow_addr)?;
        // Dust delegations are rejected at creation time only; topping up an
        // existing delegation has no minimum.
        if delegation.shares.is_zero() && body.tokens < params.min_delegation {
            return Err(CoreError::InvalidArgument);
        }

        if escrow_addr == *signer {
            let mut account = state.account(signer)?;
            account.escrow.active.deposit(
                &mut delegation.shares,
                &mut account.general.balance,
                &body.tokens,
            )?;
            state.set_account(signer, &account)?;
        } else {
            let mut from = state.account(signer)?;
            let mut to = state.account(&escrow_addr)?;
            to.escrow.active.deposit(
                &mut delegation.shares,
                &mut from.general.balance,
                &body.tokens,
            )?;
            state.set_account(signer, &from)?;
            state.set_account(&escrow_addr, &to)?;
        }
        state.set_delegation(signer, &escrow_addr, &delegation)?;

        ctx.events.push(Event::Escrow(EscrowEvent::Add(AddEscrowEvent {
            owner: *signer,
            escrow: escrow_addr,
            tokens: body.tokens,
        })));
        Ok(())
    }

    fn reclaim_escrow(
        ctx: &mut Context<'_>,
        signer: &Address,
        body: ReclaimEscrow,
    ) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        if params.disable_delegation {
            return Err(CoreError::Forbidden);
        }
        if body.shares.is_zero() {
            return Err(CoreError::InvalidArgument);
        }

        let escrow_addr = body.account;
        let mut delegation = state.delegation(signer, &escrow_addr)?;
        let mut account = state.account(&escrow_addr)?;

        // Burn active shares, move the tokens into the debonding pool and
        // record the debonding-pool shares for later withdrawal.
        let mut tokens = Quantity::zero();
        account
            .escrow
            .active
            .withdraw(&mut tokens, &mut delegation.shares, &body.shares)?;
        let amount = tokens.clone();
        let mut debonding_shares = Quantity::zero();
        account
            .escrow
            .debonding
            .deposit(&mut debonding_shares, &mut tokens, &amount)?;

        state.set_account(&escrow_addr, &account)?;
        state.set_delegation(signer, &escrow_addr, &delegation)?;
        state.add_debonding(
            signer,
            &escrow_addr,
            &DebondingDelegation {
                shares: debonding_shares,
                debond_end_epoch: ctx.epoch + params.debonding_interval,
            },
        )?;
        Ok(())
    }

    fn amend_commission_schedule(
        ctx: &mut Context<'_>,
        signer: &Address,
        body: AmendCommissionSchedule,
    ) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        let mut account = state.account(signer)?;
        account.escrow.commission_schedule.amend(
            &body.amendment,
            &params.commission_schedule_rules,
            ctx.epoch,
        )?;
        state.set_account(signer, &account)
    }

    /// Epoch-signing rewards for the epoch that just ended.
    fn reward_epoch_signing(&self, ctx: &mut Context<'_>) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        if params.signing_reward_threshold_denominator == 0 {
            state.clear_epoch_signing();
            return Ok(());
        }

        let signing = state.epoch_signing()?;
        state.clear_epoch_signing();
        if signing.total == 0 {
            return Ok(());
        }

        let eligible = signing.eligible_entities(
            params.signing_reward_threshold_numerator,
            params.signing_reward_threshold_denominator,
        );
        let rewards =
            state.add_rewards(ctx.epoch, &params.reward_factor_epoch_signed, &eligible)?;
        ctx.events.extend(rewards);
        Ok(())
    }

    /// Pays out debonding delegations whose debonding interval has elapsed,
    /// in the canonical queue order.
    fn process_debonding(&self, ctx: &mut Context<'_>) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        for (entry_epoch, delegator, escrow, seq) in state.expired_debondings(ctx.epoch)? {
            let entry = state
                .debonding_delegation(&delegator, &escrow, seq)?
                .ok_or_else(|| {
                    CoreError::StateCorruption("dangling debonding queue entry".into())
                })?;

            let mut escrow_account = state.account(&escrow)?;
            let mut tokens = Quantity::zero();
            let mut shares = entry.shares.clone();
            escrow_account
                .escrow
                .debonding
                .withdraw(&mut tokens, &mut shares, &entry.shares)?;
            state.set_account(&escrow, &escrow_account)?;

            // Load after the save above so a self-delegation observes the
            // updated pools.
            let mut delegator_account = state.account(&delegator)?;
            delegator_account.general.balance.add(&tokens);
            state.set_account(&delegator, &delegator_account)?;
            state.remove_debonding(entry_epoch, &delegator, &escrow, seq);

            debug!(%delegator, %escrow, tokens = %tokens, "released debonded stake");
            ctx.events
                .push(Event::Escrow(EscrowEvent::Reclaim(ReclaimEscrowEvent {
                    owner: delegator,
                    escrow,
                    tokens,
                })));
        }
        Ok(())
    }

    /// Splits the previous block's fees between its proposer, the validators
    /// that signed it, and this block's proposer.
    ///
    /// The fees of block N sit in `last_block_fees` until this runs at block
    /// N + 1, where all three recipients are known: N's proposer (recorded in
    /// the last-proposer slot), N's signers (from the commit info), and the
    /// next proposer relative to N, which is exactly this block's proposer.
    fn disburse_fees(&self, ctx: &mut Context<'_>, inputs: &BlockInputs) -> CoreResult<()> {
        let proposer_addr = inputs
            .proposer
            .as_ref()
            .map(Address::from_public_key);

        let mut state = StakingState::new(&mut *ctx.state);
        let last_fees = state.last_block_fees()?;
        if last_fees.is_zero() {
            state.set_last_proposer(&proposer_addr)?;
            return Ok(());
        }

        let params = state.parameters()?;
        let mut common_pool = state.common_pool()?;
        let mut events = Vec::new();

        let credit = |state: &mut StakingState<_>,
                          common_pool: &mut Quantity,
                          events: &mut Vec<Event>,
                          recipient: Option<Address>,
                          amount: &Quantity|
         -> CoreResult<()> {
            if amount.is_zero() {
                return Ok(());
            }
            match recipient {
                Some(address) => {
                    let mut account = state.account(&address)?;
                    account.general.balance.add(amount);
                    state.set_account(&address, &account)?;
                    events.push(Event::Transfer(TransferEvent {
                        from: fee_accumulator_address(),
                        to: address,
                        tokens: amount.clone(),
                    }));
                }
                None => common_pool.add(amount),
            }
            Ok(())
        };

        let mut weight_total = params.fee_split_weight_propose.clone();
        weight_total.add(&params.fee_split_weight_vote);
        weight_total.add(&params.fee_split_weight_next_propose);

        if weight_total.is_zero() {
            // Nothing to split against; sweep everything into the common
            // pool.
            common_pool.add(&last_fees);
        } else {
            let mut proposer_share = last_fees.clone();
            proposer_share.mul(&params.fee_split_weight_propose);
            proposer_share.quo(&weight_total)?;
            let previous_proposer = state.last_proposer()?;
            credit(
                &mut state,
                &mut common_pool,
                &mut events,
                previous_proposer,
                &proposer_share,
            )?;

            let mut vote_total = last_fees.clone();
            vote_total.mul(&params.fee_split_weight_vote);
            vote_total.quo(&weight_total)?;

            let total_power: u64 = inputs
                .signers
                .iter()
                .map(|voter| voter.power.max(0) as u64)
                .sum();
            let mut distributed = Quantity::zero();
            if total_power > 0 {
                let total_power = Quantity::from_u64(total_power);
                for voter in &inputs.signers {
                    let mut share = vote_total.clone();
                    share.mul(&Quantity::from_u64(voter.power.max(0) as u64));
                    share.quo(&total_power)?;
                    credit(
                        &mut state,
                        &mut common_pool,
                        &mut events,
                        Some(Address::from_public_key(&voter.entity_id)),
                        &share,
                    )?;
                    distributed.add(&share);
                }
            }

            // The next-propose share plus all rounding dust goes to this
            // block's proposer.
            let mut remainder = last_fees.clone();
            remainder.sub(&proposer_share)?;
            remainder.sub(&distributed)?;
            credit(
                &mut state,
                &mut common_pool,
                &mut events,
                proposer_addr,
                &remainder,
            )?;
        }

        state.set_last_block_fees(&Quantity::zero())?;
        state.set_common_pool(&common_pool)?;
        state.set_last_proposer(&proposer_addr)?;
        ctx.events.extend(events);
        Ok(())
    }

    fn update_epoch_signing(&self, ctx: &mut Context<'_>, inputs: &BlockInputs) -> CoreResult<()> {
        let mut state = StakingState::new(&mut *ctx.state);
        let mut signing = state.epoch_signing()?;
        let signers: Vec<Address> = inputs
            .signers
            .iter()
            .map(|voter| Address::from_public_key(&voter.entity_id))
            .collect();
        signing.update(&signers);
        state.set_epoch_signing(&signing)
    }

    /// Slashes escrow for consensus evidence delivered with the block.
    fn process_evidence(&self, ctx: &mut Context<'_>, inputs: &BlockInputs) -> CoreResult<()> {
        if inputs.evidence.is_empty() {
            return Ok(());
        }
        let mut state = StakingState::new(&mut *ctx.state);
        let params = state.parameters()?;
        for evidence in &inputs.evidence {
            let Some(slash) = params.slashing.get(&evidence.reason) else {
                continue;
            };
            if slash.amount.is_zero() {
                continue;
            }
            let address = Address::from_public_key(&evidence.entity_id);
            if let Some(event) = state.take_escrow(&address, &slash.amount)? {
                warn!(
                    offender = %address,
                    reason = ?evidence.reason,
                    tokens = %event.tokens,
                    "slashed stake for consensus evidence"
                );
                ctx.events.push(Event::Escrow(EscrowEvent::Take(event)));
            }
        }
        Ok(())
    }
}

fn gas_op_for_method(method: &str) -> Option<&'static str> {
    match method {
        METHOD_TRANSFER => Some(GAS_OP_TRANSFER),
        METHOD_BURN => Some(GAS_OP_BURN),
        METHOD_ADD_ESCROW => Some(GAS_OP_ADD_ESCROW),
        METHOD_RECLAIM_ESCROW => Some(GAS_OP_RECLAIM_ESCROW),
        METHOD_AMEND_COMMISSION_SCHEDULE => Some(GAS_OP_AMEND_COMMISSION_SCHEDULE),
        _ => None,
    }
}
