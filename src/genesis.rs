use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{common_pool_address, fee_accumulator_address, Address};
use crate::epochtime::{self, EpochTimeParameters};
use crate::errors::{CoreError, CoreResult};
use crate::quantity::Quantity;
use crate::state::staking::StakingState;
use crate::state::{get_typed, set_typed, StateRead, StateWrite};
use crate::types::committee::SchedulerParameters;
use crate::types::registry::{Node, Runtime};
use crate::types::staking::{Account, DebondingDelegation, Delegation, StakingParameters};
use crate::types::transaction::GasCosts;
use crate::types::{EpochTime, PublicKey};

const CONSENSUS_PARAMETERS_KEY: &[u8] = b"consensus/parameters";

fn default_halt_epoch() -> EpochTime {
    EpochTime::MAX
}

/// Consensus engine limits, shared by every application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusEngineParameters {
    #[serde(default)]
    pub max_tx_size: u64,
    #[serde(default)]
    pub max_block_size: u64,
    #[serde(default)]
    pub max_block_gas: u64,
    #[serde(default)]
    pub gas_costs: GasCosts,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryGenesis {
    #[serde(default)]
    pub entities: Vec<PublicKey>,
    #[serde(default)]
    pub runtimes: Vec<Runtime>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingGenesis {
    #[serde(default)]
    pub params: StakingParameters,
    #[serde(default)]
    pub total_supply: Quantity,
    #[serde(default)]
    pub common_pool: Quantity,
    #[serde(default)]
    pub last_block_fees: Quantity,
    #[serde(default)]
    pub ledger: BTreeMap<Address, Account>,
    #[serde(default)]
    pub delegations: BTreeMap<Address, BTreeMap<Address, Delegation>>,
    #[serde(default)]
    pub debonding_delegations: BTreeMap<Address, BTreeMap<Address, Vec<DebondingDelegation>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerGenesis {
    #[serde(default)]
    pub params: SchedulerParameters,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochTimeGenesis {
    #[serde(default)]
    pub params: EpochTimeParameters,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusGenesis {
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub params: ConsensusEngineParameters,
}

/// The genesis document the chain is initialized from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: String,
    pub time: DateTime<Utc>,
    #[serde(default = "default_halt_epoch")]
    pub halt_epoch: EpochTime,
    #[serde(default)]
    pub registry: RegistryGenesis,
    #[serde(default)]
    pub staking: StakingGenesis,
    #[serde(default)]
    pub scheduler: SchedulerGenesis,
    #[serde(default)]
    pub epochtime: EpochTimeGenesis,
    #[serde(default)]
    pub consensus: ConsensusGenesis,
}

impl Genesis {
    /// Self-consistency check; every replica must refuse a document that
    /// fails it.
    pub fn sanity_check(&self) -> CoreResult<()> {
        if self.chain_id.is_empty() {
            return Err(CoreError::Genesis("empty chain id".into()));
        }

        let staking = &self.staking;
        for sentinel in [common_pool_address(), fee_accumulator_address()] {
            if staking.ledger.contains_key(&sentinel) {
                return Err(CoreError::Genesis(format!(
                    "reserved address in ledger: {sentinel}"
                )));
            }
        }

        // Total supply invariant.
        let mut sum = staking.common_pool.clone();
        sum.add(&staking.last_block_fees);
        for account in staking.ledger.values() {
            sum.add(&account.general.balance);
            sum.add(&account.escrow.active.balance);
            sum.add(&account.escrow.debonding.balance);
        }
        if sum != staking.total_supply {
            return Err(CoreError::Genesis(format!(
                "total supply mismatch: declared {}, accounted {}",
                staking.total_supply, sum
            )));
        }

        // Delegation shares must add up to the escrow share pools.
        let mut active_shares: BTreeMap<Address, Quantity> = BTreeMap::new();
        for delegations in staking.delegations.values() {
            for (escrow, delegation) in delegations {
                active_shares
                    .entry(*escrow)
                    .or_default()
                    .add(&delegation.shares);
            }
        }
        let mut debonding_shares: BTreeMap<Address, Quantity> = BTreeMap::new();
        for delegations in staking.debonding_delegations.values() {
            for (escrow, entries) in delegations {
                for entry in entries {
                    debonding_shares
                        .entry(*escrow)
                        .or_default()
                        .add(&entry.shares);
                }
            }
        }
        for (escrow, account) in &staking.ledger {
            let declared = active_shares.remove(escrow).unwrap_or_default();
            if declared != account.escrow.active.total_shares {
                return Err(CoreError::Genesis(format!(
                    "active share mismatch for {escrow}"
                )));
            }
            let declared = debonding_shares.remove(escrow).unwrap_or_default();
            if declared != account.escrow.debonding.total_shares {
                return Err(CoreError::Genesis(format!(
                    "debonding share mismatch for {escrow}"
                )));
            }
        }
        if let Some(escrow) = active_shares.keys().chain(debonding_shares.keys()).next() {
            return Err(CoreError::Genesis(format!(
                "delegation to unknown escrow account: {escrow}"
            )));
        }

        // Registry references.
        for node in &self.registry.nodes {
            if !self.registry.entities.contains(&node.entity_id) {
                return Err(CoreError::Genesis(format!(
                    "node {} references unknown entity {}",
                    node.id, node.entity_id
                )));
            }
            for node_runtime in &node.runtimes {
                if !self
                    .registry
                    .runtimes
                    .iter()
                    .any(|runtime| runtime.id == node_runtime.id)
                {
                    return Err(CoreError::Genesis(format!(
                        "node {} references unknown runtime {}",
                        node.id, node_runtime.id
                    )));
                }
            }
        }

        let scheduler = &self.scheduler.params;
        if scheduler.min_validators > scheduler.max_validators {
            return Err(CoreError::Genesis(
                "min_validators exceeds max_validators".into(),
            ));
        }

        Ok(())
    }

    /// Writes the initial state. Assumes [`Genesis::sanity_check`] passed.
    pub fn init_state<S: StateWrite>(&self, state: &mut S) -> CoreResult<()> {
        set_typed(state, CONSENSUS_PARAMETERS_KEY.to_vec(), &self.consensus.params)?;

        let genesis_time = self.time.timestamp().max(0) as u64;
        epochtime::init(state, &self.epochtime.params, genesis_time)?;

        let mut staking = StakingState::new(&mut *state);
        staking.set_parameters(&self.staking.params)?;
        staking.set_total_supply(&self.staking.total_supply)?;
        staking.set_common_pool(&self.staking.common_pool)?;
        staking.set_last_block_fees(&self.staking.last_block_fees)?;

        for (address, account) in &self.staking.ledger {
            staking.set_account(address, account)?;
        }
        for (delegator, delegations) in &self.staking.delegations {
            for (escrow, delegation) in delegations {
                staking.set_delegation(delegator, escrow, delegation)?;
            }
        }
        for (delegator, delegations) in &self.staking.debonding_delegations {
            for (escrow, entries) in delegations {
                for entry in entries {
                    staking.add_debonding(delegator, escrow, entry)?;
                }
            }
        }

        let mut scheduler = crate::state::scheduler::SchedulerState::new(&mut *state);
        scheduler.set_parameters(&self.scheduler.params)?;
        Ok(())
    }
}

pub fn consensus_parameters<S: StateRead>(state: &S) -> CoreResult<ConsensusEngineParameters> {
    get_typed(state, CONSENSUS_PARAMETERS_KEY)?
        .ok_or_else(|| CoreError::StateCorruption("missing consensus parameters".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::staking::SharePool;

    fn base_genesis() -> Genesis {
        Genesis {
            chain_id: "kestrel-test".to_string(),
            time: DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap(),
            halt_epoch: u64::MAX,
            registry: RegistryGenesis::default(),
            staking: StakingGenesis::default(),
            scheduler: SchedulerGenesis::default(),
            epochtime: EpochTimeGenesis {
                params: EpochTimeParameters { interval: 60 },
            },
            consensus: ConsensusGenesis::default(),
        }
    }

    fn address(tag: u8) -> Address {
        Address::from_bytes(&[tag; 20]).unwrap()
    }

    #[test]
    fn supply_invariant_is_enforced() {
        let mut genesis = base_genesis();
        genesis.staking.total_supply = Quantity::from_u64(1000);
        genesis.staking.common_pool = Quantity::from_u64(400);
        let mut account = Account::default();
        account.general.balance = Quantity::from_u64(600);
        genesis.staking.ledger.insert(address(1), account);
        genesis.sanity_check().unwrap();

        genesis.staking.total_supply = Quantity::from_u64(999);
        assert!(genesis.sanity_check().is_err());
    }

    #[test]
    fn delegation_sums_must_match_share_pools() {
        let mut genesis = base_genesis();
        let escrow = address(2);
        let delegator = address(1);

        let mut account = Account::default();
        account.escrow.active = SharePool {
            balance: Quantity::from_u64(100),
            total_shares: Quantity::from_u64(100),
        };
        genesis.staking.ledger.insert(escrow, account);
        genesis.staking.total_supply = Quantity::from_u64(100);
        genesis.staking.delegations.insert(
            delegator,
            BTreeMap::from([(
                escrow,
                Delegation {
                    shares: Quantity::from_u64(90),
                },
            )]),
        );
        assert!(genesis.sanity_check().is_err());

        genesis
            .staking
            .delegations
            .get_mut(&delegator)
            .unwrap()
            .get_mut(&escrow)
            .unwrap()
            .shares = Quantity::from_u64(100);
        genesis.sanity_check().unwrap();
    }

    #[test]
    fn unknown_entity_reference_is_rejected() {
        let mut genesis = base_genesis();
        genesis.registry.nodes.push(Node {
            id: PublicKey([1u8; 32]),
            entity_id: PublicKey([2u8; 32]),
            consensus_id: PublicKey([3u8; 32]),
            expiration: 10,
            roles: crate::types::registry::ROLE_VALIDATOR,
            runtimes: Vec::new(),
        });
        assert!(genesis.sanity_check().is_err());

        genesis.registry.entities.push(PublicKey([2u8; 32]));
        genesis.sanity_check().unwrap();
    }
}
