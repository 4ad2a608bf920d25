use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{common_pool_address, Address, ADDRESS_SIZE};
use crate::commission::RATE_DENOMINATOR;
use crate::errors::{CoreError, CoreResult};
use crate::events::{AddEscrowEvent, EscrowEvent, Event, TakeEscrowEvent};
use crate::quantity::{self, Quantity};
use crate::state::{get_typed, set_typed, StateRead, StateWrite};
use crate::types::staking::{
    Account, DebondingDelegation, Delegation, StakingParameters, ThresholdKind,
};
use crate::types::EpochTime;

/// Reward factors are expressed in parts of this denominator.
pub const REWARD_AMOUNT_DENOMINATOR: u64 = 1_000_000_000;

const ACCOUNTS_PREFIX: &[u8] = b"staking/accounts/";
const DELEGATIONS_PREFIX: &[u8] = b"staking/delegations/";
const DEBONDING_PREFIX: &[u8] = b"staking/debonding/";
const DEBONDING_SEQ_PREFIX: &[u8] = b"staking/debonding_seq/";
const DEBONDING_QUEUE_PREFIX: &[u8] = b"staking/debonding_queue/";
const TOTAL_SUPPLY_KEY: &[u8] = b"staking/total_supply";
const COMMON_POOL_KEY: &[u8] = b"staking/common_pool";
const LAST_BLOCK_FEES_KEY: &[u8] = b"staking/last_block_fees";
const LAST_PROPOSER_KEY: &[u8] = b"staking/last_proposer";
const PARAMETERS_KEY: &[u8] = b"staking/parameters";
const EPOCH_SIGNING_KEY: &[u8] = b"staking/epoch_signing";

fn account_key(address: &Address) -> Vec<u8> {
    let mut key = ACCOUNTS_PREFIX.to_vec();
    key.extend_from_slice(address.as_bytes());
    key
}

fn delegation_key(delegator: &Address, escrow: &Address) -> Vec<u8> {
    let mut key = DELEGATIONS_PREFIX.to_vec();
    key.extend_from_slice(delegator.as_bytes());
    key.push(b'/');
    key.extend_from_slice(escrow.as_bytes());
    key
}

fn debonding_key(delegator: &Address, escrow: &Address, seq: u64) -> Vec<u8> {
    let mut key = DEBONDING_PREFIX.to_vec();
    key.extend_from_slice(delegator.as_bytes());
    key.push(b'/');
    key.extend_from_slice(escrow.as_bytes());
    key.push(b'/');
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn debonding_seq_key(delegator: &Address, escrow: &Address) -> Vec<u8> {
    let mut key = DEBONDING_SEQ_PREFIX.to_vec();
    key.extend_from_slice(delegator.as_bytes());
    key.push(b'/');
    key.extend_from_slice(escrow.as_bytes());
    key
}

fn debonding_queue_key(
    epoch: EpochTime,
    delegator: &Address,
    escrow: &Address,
    seq: u64,
) -> Vec<u8> {
    let mut key = DEBONDING_QUEUE_PREFIX.to_vec();
    key.extend_from_slice(&epoch.to_be_bytes());
    key.push(b'/');
    key.extend_from_slice(delegator.as_bytes());
    key.push(b'/');
    key.extend_from_slice(escrow.as_bytes());
    key.push(b'/');
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Upper bound for a prefix range scan: the prefix with its last byte
/// incremented.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return end;
        }
        end.pop();
    }
    end
}

/// Per-epoch block signing tally used for signing rewards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSigning {
    pub total: u64,
    pub by_entity: BTreeMap<Address, u64>,
}

impl EpochSigning {
    pub fn update(&mut self, signers: &[Address]) {
        self.total += 1;
        for signer in signers {
            *self.by_entity.entry(*signer).or_default() += 1;
        }
    }

    /// Entities that signed at least `numerator/denominator` of the epoch's
    /// blocks, in address order.
    pub fn eligible_entities(&self, numerator: u64, denominator: u64) -> Vec<Address> {
        self.by_entity
            .iter()
            .filter(|(_, signed)| **signed * denominator >= self.total * numerator)
            .map(|(address, _)| *address)
            .collect()
    }
}

/// Typed staking ledger view over a state tree.
pub struct StakingState<S> {
    state: S,
}

impl<S: StateRead> StakingState<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    /// Account lookup; absent accounts read as the all-zero default.
    pub fn account(&self, address: &Address) -> CoreResult<Account> {
        Ok(get_typed(&self.state, &account_key(address))?.unwrap_or_default())
    }

    /// Addresses of every account present in the ledger, in address order.
    pub fn addresses(&self) -> CoreResult<Vec<Address>> {
        self.state
            .range(ACCOUNTS_PREFIX, &prefix_end(ACCOUNTS_PREFIX))
            .into_iter()
            .map(|(key, _)| Address::from_bytes(&key[ACCOUNTS_PREFIX.len()..]))
            .collect()
    }

    pub fn total_supply(&self) -> CoreResult<Quantity> {
        Ok(get_typed(&self.state, TOTAL_SUPPLY_KEY)?.unwrap_or_default())
    }

    pub fn common_pool(&self) -> CoreResult<Quantity> {
        Ok(get_typed(&self.state, COMMON_POOL_KEY)?.unwrap_or_default())
    }

    pub fn last_block_fees(&self) -> CoreResult<Quantity> {
        Ok(get_typed(&self.state, LAST_BLOCK_FEES_KEY)?.unwrap_or_default())
    }

    pub fn last_proposer(&self) -> CoreResult<Option<Address>> {
        get_typed(&self.state, LAST_PROPOSER_KEY)
    }

    pub fn parameters(&self) -> CoreResult<StakingParameters> {
        get_typed(&self.state, PARAMETERS_KEY)?.ok_or_else(|| {
            CoreError::StateCorruption("missing staking consensus parameters".into())
        })
    }

    pub fn threshold(&self, kind: ThresholdKind) -> CoreResult<Quantity> {
        self.parameters()?
            .thresholds
            .get(&kind)
            .cloned()
            .ok_or(CoreError::InvalidThreshold)
    }

    pub fn delegation(&self, delegator: &Address, escrow: &Address) -> CoreResult<Delegation> {
        Ok(get_typed(&self.state, &delegation_key(delegator, escrow))?.unwrap_or_default())
    }

    /// All outstanding delegations of one delegator, keyed by escrow address.
    pub fn delegations_for(&self, delegator: &Address) -> CoreResult<BTreeMap<Address, Delegation>> {
        let mut prefix = DELEGATIONS_PREFIX.to_vec();
        prefix.extend_from_slice(delegator.as_bytes());
        prefix.push(b'/');
        let mut delegations = BTreeMap::new();
        for (key, value) in self.state.range(&prefix, &prefix_end(&prefix)) {
            let escrow = Address::from_bytes(&key[prefix.len()..])?;
            let delegation: Delegation = bincode::deserialize(&value).map_err(|err| {
                CoreError::StateCorruption(format!("undecodable delegation: {err}"))
            })?;
            delegations.insert(escrow, delegation);
        }
        Ok(delegations)
    }

    /// Every delegation in the ledger as `(delegator, escrow, delegation)`.
    pub fn all_delegations(&self) -> CoreResult<Vec<(Address, Address, Delegation)>> {
        let mut delegations = Vec::new();
        for (key, value) in self
            .state
            .range(DELEGATIONS_PREFIX, &prefix_end(DELEGATIONS_PREFIX))
        {
            let suffix = &key[DELEGATIONS_PREFIX.len()..];
            let delegator = Address::from_bytes(&suffix[..ADDRESS_SIZE])?;
            let escrow = Address::from_bytes(&suffix[ADDRESS_SIZE + 1..])?;
            let delegation: Delegation = bincode::deserialize(&value).map_err(|err| {
                CoreError::StateCorruption(format!("undecodable delegation: {err}"))
            })?;
            delegations.push((delegator, escrow, delegation));
        }
        Ok(delegations)
    }

    pub fn debonding_delegation(
        &self,
        delegator: &Address,
        escrow: &Address,
        seq: u64,
    ) -> CoreResult<Option<DebondingDelegation>> {
        get_typed(&self.state, &debonding_key(delegator, escrow, seq))
    }

    /// All debonding delegations of one delegator, keyed by escrow address.
    pub fn debonding_delegations_for(
        &self,
        delegator: &Address,
    ) -> CoreResult<BTreeMap<Address, Vec<DebondingDelegation>>> {
        let mut prefix = DEBONDING_PREFIX.to_vec();
        prefix.extend_from_slice(delegator.as_bytes());
        prefix.push(b'/');
        let mut delegations: BTreeMap<Address, Vec<DebondingDelegation>> = BTreeMap::new();
        for (key, value) in self.state.range(&prefix, &prefix_end(&prefix)) {
            let suffix = &key[prefix.len()..];
            let escrow = Address::from_bytes(&suffix[..ADDRESS_SIZE])?;
            let entry: DebondingDelegation = bincode::deserialize(&value).map_err(|err| {
                CoreError::StateCorruption(format!("undecodable debonding delegation: {err}"))
            })?;
            delegations.entry(escrow).or_default().push(entry);
        }
        Ok(delegations)
    }

    /// Debonding queue entries with `debond_end_epoch <= epoch`, in the
    /// canonical `(epoch, delegator, escrow, seq)` order.
    pub fn expired_debondings(
        &self,
        epoch: EpochTime,
    ) -> CoreResult<Vec<(EpochTime, Address, Address, u64)>> {
        let end = match epoch.checked_add(1) {
            Some(bound) => {
                let mut end = DEBONDING_QUEUE_PREFIX.to_vec();
                end.extend_from_slice(&bound.to_be_bytes());
                end
            }
            None => prefix_end(DEBONDING_QUEUE_PREFIX),
        };
        let mut expired = Vec::new();
        for (key, _) in self.state.range(DEBONDING_QUEUE_PREFIX, &end) {
            let suffix = &key[DEBONDING_QUEUE_PREFIX.len()..];
            let entry_epoch = EpochTime::from_be_bytes(
                suffix[..8]
                    .try_into()
                    .map_err(|_| CoreError::StateCorruption("malformed debonding key".into()))?,
            );
            let delegator = Address::from_bytes(&suffix[9..9 + ADDRESS_SIZE])?;
            let escrow = Address::from_bytes(&suffix[10 + ADDRESS_SIZE..10 + 2 * ADDRESS_SIZE])?;
            let seq = u64::from_be_bytes(
                suffix[11 + 2 * ADDRESS_SIZE..]
                    .try_into()
                    .map_err(|_| CoreError::StateCorruption("malformed debonding key".into()))?,
            );
            expired.push((entry_epoch, delegator, escrow, seq));
        }
        Ok(expired)
    }

    pub fn epoch_signing(&self) -> CoreResult<EpochSigning> {
        Ok(get_typed(&self.state, EPOCH_SIGNING_KEY)?.unwrap_or_default())
    }

    /// Dumps the whole staking ledger back into its genesis form.
    pub fn to_genesis(&self) -> CoreResult<crate::genesis::StakingGenesis> {
        let mut ledger = BTreeMap::new();
        for address in self.addresses()? {
            ledger.insert(address, self.account(&address)?);
        }

        let mut delegations: BTreeMap<Address, BTreeMap<Address, Delegation>> = BTreeMap::new();
        for (delegator, escrow, delegation) in self.all_delegations()? {
            delegations
                .entry(delegator)
                .or_default()
                .insert(escrow, delegation);
        }

        let mut debonding: BTreeMap<Address, BTreeMap<Address, Vec<DebondingDelegation>>> =
            BTreeMap::new();
        for (key, value) in self.state.range(DEBONDING_PREFIX, &prefix_end(DEBONDING_PREFIX)) {
            let suffix = &key[DEBONDING_PREFIX.len()..];
            let delegator = Address::from_bytes(&suffix[..ADDRESS_SIZE])?;
            let escrow = Address::from_bytes(&suffix[ADDRESS_SIZE + 1..2 * ADDRESS_SIZE + 1])?;
            let entry: DebondingDelegation = bincode::deserialize(&value).map_err(|err| {
                CoreError::StateCorruption(format!("undecodable debonding delegation: {err}"))
            })?;
            debonding
                .entry(delegator)
                .or_default()
                .entry(escrow)
                .or_default()
                .push(entry);
        }

        Ok(crate::genesis::StakingGenesis {
            params: self.parameters()?,
            total_supply: self.total_supply()?,
            common_pool: self.common_pool()?,
            last_block_fees: self.last_block_fees()?,
            ledger,
            delegations,
            debonding_delegations: debonding,
        })
    }
}

impl<S: StateWrite> StakingState<S> {
    pub fn set_account(&mut self, address: &Address, account: &Account) -> CoreResult<()> {
        set_typed(&mut self.state, account_key(address), account)
    }

    pub fn set_total_supply(&mut self, value: &Quantity) -> CoreResult<()> {
        set_typed(&mut self.state, TOTAL_SUPPLY_KEY.to_vec(), value)
    }

    pub fn set_common_pool(&mut self, value: &Quantity) -> CoreResult<()> {
        set_typed(&mut self.state, COMMON_POOL_KEY.to_vec(), value)
    }

    pub fn set_last_block_fees(&mut self, value: &Quantity) -> CoreResult<()> {
        set_typed(&mut self.state, LAST_BLOCK_FEES_KEY.to_vec(), value)
    }

    pub fn set_last_proposer(&mut self, proposer: &Option<Address>) -> CoreResult<()> {
        set_typed(&mut self.state, LAST_PROPOSER_KEY.to_vec(), proposer)
    }

    pub fn set_parameters(&mut self, parameters: &StakingParameters) -> CoreResult<()> {
        set_typed(&mut self.state, PARAMETERS_KEY.to_vec(), parameters)
    }

    /// Stores a delegation, deleting the record when the shares reach zero.
    pub fn set_delegation(
        &mut self,
        delegator: &Address,
        escrow: &Address,
        delegation: &Delegation,
    ) -> CoreResult<()> {
        let key = delegation_key(delegator, escrow);
        if delegation.shares.is_zero() {
            self.state.remove(&key);
            return Ok(());
        }
        set_typed(&mut self.state, key, delegation)
    }

    /// Records a new debonding delegation under a fresh sequence number and
    /// indexes it in the debonding queue.
    pub fn add_debonding(
        &mut self,
        delegator: &Address,
        escrow: &Address,
        entry: &DebondingDelegation,
    ) -> CoreResult<u64> {
        let seq_key = debonding_seq_key(delegator, escrow);
        let seq: u64 = get_typed(&self.state, &seq_key)?.unwrap_or_default();
        set_typed(&mut self.state, seq_key, &(seq + 1))?;
        set_typed(&mut self.state, debonding_key(delegator, escrow, seq), entry)?;
        self.state.set(
            debonding_queue_key(entry.debond_end_epoch, delegator, escrow, seq),
            Vec::new(),
        );
        Ok(seq)
    }

    pub fn remove_debonding(
        &mut self,
        epoch: EpochTime,
        delegator: &Address,
        escrow: &Address,
        seq: u64,
    ) {
        self.state.remove(&debonding_key(delegator, escrow, seq));
        self.state
            .remove(&debonding_queue_key(epoch, delegator, escrow, seq));
    }

    pub fn set_epoch_signing(&mut self, signing: &EpochSigning) -> CoreResult<()> {
        set_typed(&mut self.state, EPOCH_SIGNING_KEY.to_vec(), signing)
    }

    pub fn clear_epoch_signing(&mut self) {
        self.state.remove(EPOCH_SIGNING_KEY);
    }

    /// Distributes an epoch reward to the given accounts.
    ///
    /// `delta = factor * active_balance / 1e9`, capped at what the common
    /// pool still holds. The commission cut is deposited into the account's
    /// own delegation at the post-reward exchange rate; the rest appreciates
    /// the existing shares without minting.
    pub fn add_rewards(
        &mut self,
        epoch: EpochTime,
        factor: &Quantity,
        addresses: &[Address],
    ) -> CoreResult<Vec<Event>> {
        if factor.is_zero() {
            return Ok(Vec::new());
        }
        let denominator = Quantity::from_u64(REWARD_AMOUNT_DENOMINATOR);
        let mut common_pool = self.common_pool()?;
        let mut events = Vec::new();
        for address in addresses {
            let mut account = self.account(address)?;
            let mut delta = account.escrow.active.balance.clone();
            delta.mul(factor);
            delta.quo(&denominator)?;
            if delta > common_pool {
                delta = common_pool.clone();
            }
            if delta.is_zero() {
                continue;
            }

            let mut commission = Quantity::zero();
            if let Some(rate) = account.escrow.commission_schedule.current_rate(epoch) {
                commission = delta.clone();
                commission.mul(rate);
                commission.quo(&Quantity::from_u64(RATE_DENOMINATOR))?;
            }
            let mut remaining = delta.clone();
            remaining.sub(&commission)?;

            if !remaining.is_zero() {
                quantity::move_amount(
                    &mut account.escrow.active.balance,
                    &mut common_pool,
                    &remaining,
                )?;
            }
            if !commission.is_zero() {
                let mut delegation = self.delegation(address, address)?;
                account.escrow.active.deposit(
                    &mut delegation.shares,
                    &mut common_pool,
                    &commission,
                )?;
                self.set_delegation(address, address, &delegation)?;
            }
            self.set_account(address, &account)?;

            events.push(Event::Escrow(EscrowEvent::Add(AddEscrowEvent {
                owner: common_pool_address(),
                escrow: *address,
                tokens: delta,
            })));
        }
        self.set_common_pool(&common_pool)?;
        Ok(events)
    }

    /// Slashes an escrow account, removing `amount` pro-rata from the active
    /// and debonding pools without touching shares; the exchange rate drops.
    /// The slashed value moves to the common pool.
    pub fn take_escrow(
        &mut self,
        address: &Address,
        amount: &Quantity,
    ) -> CoreResult<Option<TakeEscrowEvent>> {
        let mut account = self.account(address)?;
        let mut total = account.escrow.active.balance.clone();
        total.add(&account.escrow.debonding.balance);
        if total.is_zero() {
            return Ok(None);
        }

        let mut slashed = amount.clone();
        if slashed > total {
            slashed = total.clone();
        }
        let mut from_debonding = slashed.clone();
        from_debonding.mul(&account.escrow.debonding.balance);
        from_debonding.quo(&total)?;
        let mut from_active = slashed.clone();
        from_active.sub(&from_debonding)?;

        let mut common_pool = self.common_pool()?;
        quantity::move_amount(
            &mut common_pool,
            &mut account.escrow.active.balance,
            &from_active,
        )?;
        quantity::move_amount(
            &mut common_pool,
            &mut account.escrow.debonding.balance,
            &from_debonding,
        )?;
        self.set_account(address, &account)?;
        self.set_common_pool(&common_pool)?;

        Ok(Some(TakeEscrowEvent {
            owner: *address,
            tokens: slashed,
        }))
    }
}

/// One-block memoization of stake claim checks and escrow balances, used by
/// the scheduler's filtering pass.
pub struct StakeAccumulatorCache<'a, S> {
    state: &'a StakingState<S>,
    thresholds: BTreeMap<ThresholdKind, Quantity>,
    balances: BTreeMap<Address, Quantity>,
    checks: BTreeMap<Address, bool>,
}

impl<'a, S: StateRead> StakeAccumulatorCache<'a, S> {
    pub fn new(state: &'a StakingState<S>) -> CoreResult<Self> {
        let thresholds = state.parameters()?.thresholds;
        Ok(Self {
            state,
            thresholds,
            balances: BTreeMap::new(),
            checks: BTreeMap::new(),
        })
    }

    pub fn check_stake_claims(&mut self, address: &Address) -> CoreResult<()> {
        if let Some(ok) = self.checks.get(address) {
            return if *ok {
                Ok(())
            } else {
                Err(CoreError::InsufficientStake)
            };
        }
        let account = self.state.account(address)?;
        let result = account.escrow.check_stake_claims(&self.thresholds);
        self.checks.insert(*address, result.is_ok());
        self.balances
            .insert(*address, account.escrow.active.balance);
        result
    }

    pub fn escrow_balance(&mut self, address: &Address) -> CoreResult<Quantity> {
        if let Some(balance) = self.balances.get(address) {
            return Ok(balance.clone());
        }
        let account = self.state.account(address)?;
        let balance = account.escrow.active.balance;
        self.balances.insert(*address, balance.clone());
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStore, Overlay};

    fn test_address(tag: u8) -> Address {
        Address::from_bytes(&[tag; ADDRESS_SIZE]).unwrap()
    }

    #[test]
    fn debonding_queue_orders_by_epoch_then_delegator() {
        let store = MemoryStore::new();
        let mut overlay = Overlay::new(store.head_snapshot());
        let mut state = StakingState::new(&mut overlay);

        let alice = test_address(1);
        let bob = test_address(2);
        let escrow = test_address(9);

        state
            .add_debonding(
                &bob,
                &escrow,
                &DebondingDelegation {
                    shares: Quantity::from_u64(10),
                    debond_end_epoch: 3,
                },
            )
            .unwrap();
        state
            .add_debonding(
                &alice,
                &escrow,
                &DebondingDelegation {
                    shares: Quantity::from_u64(10),
                    debond_end_epoch: 3,
                },
            )
            .unwrap();
        state
            .add_debonding(
                &bob,
                &escrow,
                &DebondingDelegation {
                    shares: Quantity::from_u64(10),
                    debond_end_epoch: 2,
                },
            )
            .unwrap();

        let expired = state.expired_debondings(3).unwrap();
        let order: Vec<(EpochTime, Address)> = expired
            .iter()
            .map(|(epoch, delegator, _, _)| (*epoch, *delegator))
            .collect();
        assert_eq!(order, vec![(2, bob), (3, alice), (3, bob)]);

        assert!(state.expired_debondings(1).unwrap().is_empty());
    }

    #[test]
    fn sequence_numbers_are_monotonic_per_pair() {
        let store = MemoryStore::new();
        let mut overlay = Overlay::new(store.head_snapshot());
        let mut state = StakingState::new(&mut overlay);

        let delegator = test_address(1);
        let escrow = test_address(2);
        let entry = DebondingDelegation {
            shares: Quantity::from_u64(1),
            debond_end_epoch: 5,
        };
        assert_eq!(state.add_debonding(&delegator, &escrow, &entry).unwrap(), 0);
        assert_eq!(state.add_debonding(&delegator, &escrow, &entry).unwrap(), 1);
        state.remove_debonding(5, &delegator, &escrow, 0);
        assert_eq!(state.add_debonding(&delegator, &escrow, &entry).unwrap(), 2);
    }

    #[test]
    fn take_escrow_is_pro_rata_and_preserves_shares() {
        let store = MemoryStore::new();
        let mut overlay = Overlay::new(store.head_snapshot());
        let mut state = StakingState::new(&mut overlay);

        let escrow = test_address(3);
        let mut account = Account::default();
        account.escrow.active.balance = Quantity::from_u64(600);
        account.escrow.active.total_shares = Quantity::from_u64(600);
        account.escrow.debonding.balance = Quantity::from_u64(300);
        account.escrow.debonding.total_shares = Quantity::from_u64(300);
        state.set_account(&escrow, &account).unwrap();
        state.set_common_pool(&Quantity::zero()).unwrap();

        let event = state
            .take_escrow(&escrow, &Quantity::from_u64(450))
            .unwrap()
            .unwrap();
        assert_eq!(event.tokens, Quantity::from_u64(450));

        let account = state.account(&escrow).unwrap();
        assert_eq!(account.escrow.active.balance, Quantity::from_u64(300));
        assert_eq!(account.escrow.debonding.balance, Quantity::from_u64(150));
        assert_eq!(account.escrow.active.total_shares, Quantity::from_u64(600));
        assert_eq!(
            account.escrow.debonding.total_shares,
            Quantity::from_u64(300)
        );
        assert_eq!(state.common_pool().unwrap(), Quantity::from_u64(450));
    }

    #[test]
    fn epoch_signing_eligibility_threshold() {
        let mut signing = EpochSigning::default();
        let alice = test_address(1);
        let bob = test_address(2);
        for _ in 0..3 {
            signing.update(&[alice]);
        }
        signing.update(&[alice, bob]);
        // Threshold 1/2: alice signed 4/4, bob 1/4.
        assert_eq!(signing.eligible_entities(1, 2), vec![alice]);
    }
}
