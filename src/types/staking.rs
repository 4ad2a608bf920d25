use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::commission::{CommissionSchedule, CommissionScheduleRules};
use crate::errors::{CoreError, CoreResult};
use crate::quantity::{self, Quantity};
use crate::types::transaction::GasCosts;
use crate::types::EpochTime;

/// A combined balance owned collectively through shares.
///
/// The exchange rate between shares and tokens drifts as the balance is
/// raised by rewards or lowered by slashing while the share count stays put.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePool {
    #[serde(default)]
    pub balance: Quantity,
    #[serde(default)]
    pub total_shares: Quantity,
}

impl SharePool {
    /// Number of shares minted for a deposit of `amount` tokens.
    fn shares_for_tokens(&self, amount: &Quantity) -> CoreResult<Quantity> {
        if self.total_shares.is_zero() {
            // No existing shares, exchange rate is 1:1.
            return Ok(amount.clone());
        }
        if self.balance.is_zero() {
            // The pool lost its entire balance through slashing; there is no
            // rate at which more shares could be minted.
            return Err(CoreError::InvalidArgument);
        }

        // shares = amount * total_shares / balance, multiply first.
        let mut shares = amount.clone();
        shares.mul(&self.total_shares);
        shares.quo(&self.balance)?;
        Ok(shares)
    }

    /// Moves tokens into the pool, minting shares for `share_dst`.
    ///
    /// On failure the pool and the affected balances may be left partially
    /// updated; callers apply this against a discardable overlay only.
    pub fn deposit(
        &mut self,
        share_dst: &mut Quantity,
        token_src: &mut Quantity,
        token_amount: &Quantity,
    ) -> CoreResult<()> {
        let shares = self.shares_for_tokens(token_amount)?;
        quantity::move_amount(&mut self.balance, token_src, token_amount)?;
        self.total_shares.add(&shares);
        share_dst.add(&shares);
        Ok(())
    }

    /// Number of tokens represented by `amount` shares.
    pub fn tokens_for_shares(&self, amount: &Quantity) -> CoreResult<Quantity> {
        if amount.is_zero() || self.balance.is_zero() || self.total_shares.is_zero() {
            return Ok(Quantity::zero());
        }

        // tokens = shares * balance / total_shares, multiply first.
        let mut tokens = amount.clone();
        tokens.mul(&self.balance);
        tokens.quo(&self.total_shares)?;
        Ok(tokens)
    }

    /// Moves tokens out of the pool, burning shares from `share_src`.
    ///
    /// Same transactionality caveat as [`SharePool::deposit`].
    pub fn withdraw(
        &mut self,
        token_dst: &mut Quantity,
        share_src: &mut Quantity,
        share_amount: &Quantity,
    ) -> CoreResult<()> {
        let tokens = self.tokens_for_shares(share_amount)?;
        share_src.sub(share_amount)?;
        self.total_shares.sub(share_amount)?;
        quantity::move_amount(token_dst, &mut self.balance, &tokens)?;
        Ok(())
    }
}

/// The kind of staking threshold an obligation refers to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    Entity,
    NodeValidator,
    NodeCompute,
    NodeStorage,
    NodeKeyManager,
    RuntimeCompute,
    RuntimeKeyManager,
}

/// A unique stake claim identifier.
pub type StakeClaim = String;

/// Per-escrow-account registry of named stake obligations.
///
/// Adding a new claim is only possible while the sum of every claim's
/// thresholds stays covered by the active escrow balance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeAccumulator {
    #[serde(default)]
    pub claims: BTreeMap<StakeClaim, Vec<ThresholdKind>>,
}

impl StakeAccumulator {
    /// Total obligation across all claims, optionally excluding one claim
    /// (used when a claim is being replaced, to avoid counting it twice).
    pub fn total_claims(
        &self,
        thresholds: &BTreeMap<ThresholdKind, Quantity>,
        exclude: Option<&StakeClaim>,
    ) -> Quantity {
        let mut total = Quantity::zero();
        for (id, kinds) in &self.claims {
            if exclude == Some(id) {
                continue;
            }
            for kind in kinds {
                if let Some(threshold) = thresholds.get(kind) {
                    total.add(threshold);
                }
            }
        }
        total
    }

    fn add_claim_unchecked(&mut self, claim: StakeClaim, thresholds: Vec<ThresholdKind>) {
        self.claims.insert(claim, thresholds);
    }

    /// Removes a claim. It is an error if the claim does not exist.
    pub fn remove_claim(&mut self, claim: &StakeClaim) -> CoreResult<()> {
        self.claims
            .remove(claim)
            .map(|_| ())
            .ok_or_else(|| CoreError::Transaction(format!("stake claim does not exist: {claim}")))
    }
}

/// A general-purpose account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralAccount {
    #[serde(default)]
    pub balance: Quantity,
    #[serde(default)]
    pub nonce: u64,
}

/// An escrow account, subject to delegation provisions and a debonding
/// period.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    #[serde(default)]
    pub active: SharePool,
    #[serde(default)]
    pub debonding: SharePool,
    #[serde(default)]
    pub commission_schedule: CommissionSchedule,
    #[serde(default)]
    pub stake_accumulator: StakeAccumulator,
}

impl EscrowAccount {
    /// Checks whether the active balance covers all registered claims.
    pub fn check_stake_claims(
        &self,
        thresholds: &BTreeMap<ThresholdKind, Quantity>,
    ) -> CoreResult<()> {
        let total = self.stake_accumulator.total_claims(thresholds, None);
        if self.active.balance < total {
            return Err(CoreError::InsufficientStake);
        }
        Ok(())
    }

    /// Adds (or replaces) a stake claim, verifying the combined obligation
    /// first. On failure the accumulator is left unchanged.
    pub fn add_stake_claim(
        &mut self,
        thresholds: &BTreeMap<ThresholdKind, Quantity>,
        claim: StakeClaim,
        kinds: Vec<ThresholdKind>,
    ) -> CoreResult<()> {
        let mut total = self
            .stake_accumulator
            .total_claims(thresholds, Some(&claim));
        for kind in &kinds {
            if let Some(threshold) = thresholds.get(kind) {
                total.add(threshold);
            }
        }
        if self.active.balance < total {
            return Err(CoreError::InsufficientStake);
        }
        self.stake_accumulator.add_claim_unchecked(claim, kinds);
        Ok(())
    }

    pub fn remove_stake_claim(&mut self, claim: &StakeClaim) -> CoreResult<()> {
        self.stake_accumulator.remove_claim(claim)
    }
}

/// An entry in the staking ledger. Holds both the general and the escrow
/// account; all-zero entries are equivalent to absent ones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub general: GeneralAccount,
    #[serde(default)]
    pub escrow: EscrowAccount,
}

/// An outstanding delegation of stake into an escrow account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub shares: Quantity,
}

/// A delegation undergoing debonding; the shares are debonding-pool shares.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebondingDelegation {
    pub shares: Quantity,
    pub debond_end_epoch: EpochTime,
}

/// Reasons for slashing an escrow account.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SlashReason {
    DoubleSigning,
}

/// Slashing terms for a single reason.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slash {
    pub amount: Quantity,
    pub freeze_interval: EpochTime,
}

/// Staking consensus parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingParameters {
    #[serde(default)]
    pub thresholds: BTreeMap<ThresholdKind, Quantity>,
    #[serde(default)]
    pub debonding_interval: EpochTime,
    #[serde(default)]
    pub commission_schedule_rules: CommissionScheduleRules,
    #[serde(default)]
    pub slashing: BTreeMap<SlashReason, Slash>,
    #[serde(default)]
    pub gas_costs: GasCosts,
    #[serde(default)]
    pub min_delegation: Quantity,
    #[serde(default)]
    pub disable_transfers: bool,
    #[serde(default)]
    pub disable_delegation: bool,
    #[serde(default)]
    pub undisable_transfers_from: BTreeSet<Address>,
    /// Proportion of block fees that goes to the previous block's proposer.
    #[serde(default)]
    pub fee_split_weight_propose: Quantity,
    /// Proportion of block fees shared by the validators that signed.
    #[serde(default)]
    pub fee_split_weight_vote: Quantity,
    /// Proportion of block fees deferred to the next block's proposer.
    #[serde(default)]
    pub fee_split_weight_next_propose: Quantity,
    /// Factor for the per-epoch reward to entities that signed at least a
    /// threshold fraction of the epoch's blocks.
    #[serde(default)]
    pub reward_factor_epoch_signed: Quantity,
    #[serde(default)]
    pub signing_reward_threshold_numerator: u64,
    #[serde(default)]
    pub signing_reward_threshold_denominator: u64,
}

/// Body of `staking.Transfer`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub to: Address,
    pub tokens: Quantity,
}

/// Body of `staking.Burn`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burn {
    pub tokens: Quantity,
}

/// Body of `staking.AddEscrow`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub account: Address,
    pub tokens: Quantity,
}

/// Body of `staking.ReclaimEscrow`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimEscrow {
    pub account: Address,
    pub shares: Quantity,
}

/// Body of `staking.AmendCommissionSchedule`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendCommissionSchedule {
    pub amendment: CommissionSchedule,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> BTreeMap<ThresholdKind, Quantity> {
        let mut map = BTreeMap::new();
        map.insert(ThresholdKind::Entity, Quantity::from_u64(100));
        map.insert(ThresholdKind::NodeCompute, Quantity::from_u64(900));
        map
    }

    #[test]
    fn deposit_into_empty_pool_is_one_to_one() {
        let mut pool = SharePool::default();
        let mut shares = Quantity::zero();
        let mut src = Quantity::from_u64(3000);
        pool.deposit(&mut shares, &mut src, &Quantity::from_u64(3000))
            .unwrap();
        assert_eq!(pool.balance, Quantity::from_u64(3000));
        assert_eq!(pool.total_shares, Quantity::from_u64(3000));
        assert_eq!(shares, Quantity::from_u64(3000));
        assert!(src.is_zero());
    }

    #[test]
    fn deposit_into_zeroed_pool_fails() {
        // A pool can end up with shares but no balance after slashing.
        let mut pool = SharePool {
            balance: Quantity::zero(),
            total_shares: Quantity::from_u64(1000),
        };
        let mut shares = Quantity::zero();
        let mut src = Quantity::from_u64(10);
        let err = pool
            .deposit(&mut shares, &mut src, &Quantity::from_u64(10))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument));
    }

    #[test]
    fn post_slash_deposit_mints_at_dropped_rate() {
        let mut pool = SharePool {
            balance: Quantity::from_u64(1500),
            total_shares: Quantity::from_u64(3000),
        };
        let mut shares = Quantity::zero();
        let mut src = Quantity::from_u64(1500);
        pool.deposit(&mut shares, &mut src, &Quantity::from_u64(1500))
            .unwrap();
        assert_eq!(shares, Quantity::from_u64(3000));
        assert_eq!(pool.balance, Quantity::from_u64(3000));
        assert_eq!(pool.total_shares, Quantity::from_u64(6000));

        let mut general = Quantity::zero();
        let mut all_shares = Quantity::from_u64(6000);
        pool.withdraw(&mut general, &mut all_shares, &Quantity::from_u64(6000))
            .unwrap();
        assert_eq!(general, Quantity::from_u64(3000));
        assert!(pool.balance.is_zero());
        assert!(pool.total_shares.is_zero());
    }

    #[test]
    fn stake_claims_enforce_total_obligation() {
        let mut escrow = EscrowAccount::default();
        escrow.active.balance = Quantity::from_u64(1000);

        escrow
            .add_stake_claim(
                &thresholds(),
                "node-X".to_string(),
                vec![ThresholdKind::Entity, ThresholdKind::NodeCompute],
            )
            .unwrap();

        let err = escrow
            .add_stake_claim(
                &thresholds(),
                "node-Y".to_string(),
                vec![ThresholdKind::Entity],
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStake));
        assert_eq!(escrow.stake_accumulator.claims.len(), 1);
        escrow.check_stake_claims(&thresholds()).unwrap();
    }

    #[test]
    fn replacing_a_claim_does_not_double_count() {
        let mut escrow = EscrowAccount::default();
        escrow.active.balance = Quantity::from_u64(1000);
        escrow
            .add_stake_claim(
                &thresholds(),
                "node-X".to_string(),
                vec![ThresholdKind::Entity, ThresholdKind::NodeCompute],
            )
            .unwrap();
        // Replacing the claim with a smaller set must succeed even though the
        // combined total with the old claim would not fit.
        escrow
            .add_stake_claim(
                &thresholds(),
                "node-X".to_string(),
                vec![ThresholdKind::Entity],
            )
            .unwrap();
        assert_eq!(
            escrow.stake_accumulator.claims.get("node-X"),
            Some(&vec![ThresholdKind::Entity])
        );
    }

    #[test]
    fn removing_a_missing_claim_is_an_error() {
        let mut accumulator = StakeAccumulator::default();
        assert!(accumulator.remove_claim(&"nope".to_string()).is_err());
    }
}
