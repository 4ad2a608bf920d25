use std::collections::BTreeMap;

use crate::errors::{CoreError, CoreResult};
use crate::state::{get_typed, set_typed, StateRead, StateWrite};
use crate::types::committee::{Committee, CommitteeKind, SchedulerParameters};
use crate::types::{PublicKey, RuntimeId};

const COMMITTEES_PREFIX: &[u8] = b"scheduler/committees/";
const PENDING_VALIDATORS_KEY: &[u8] = b"scheduler/pending_validators";
const CURRENT_VALIDATORS_KEY: &[u8] = b"scheduler/current_validators";
const PARAMETERS_KEY: &[u8] = b"scheduler/parameters";

/// Consensus validator set: consensus public key to voting power.
pub type ValidatorSet = BTreeMap<PublicKey, i64>;

fn committee_key(kind: CommitteeKind, runtime_id: &RuntimeId) -> Vec<u8> {
    let mut key = COMMITTEES_PREFIX.to_vec();
    key.push(kind.as_key_byte());
    key.push(b'/');
    key.extend_from_slice(runtime_id.as_bytes());
    key
}

fn committees_end() -> Vec<u8> {
    let mut end = COMMITTEES_PREFIX.to_vec();
    *end.last_mut().expect("non-empty prefix") += 1;
    end
}

/// Typed scheduler view over a state tree.
pub struct SchedulerState<S> {
    state: S,
}

impl<S: StateRead> SchedulerState<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    pub fn parameters(&self) -> CoreResult<SchedulerParameters> {
        get_typed(&self.state, PARAMETERS_KEY)?.ok_or_else(|| {
            CoreError::StateCorruption("missing scheduler consensus parameters".into())
        })
    }

    pub fn committee(
        &self,
        kind: CommitteeKind,
        runtime_id: &RuntimeId,
    ) -> CoreResult<Option<Committee>> {
        get_typed(&self.state, &committee_key(kind, runtime_id))
    }

    pub fn all_committees(&self) -> CoreResult<Vec<Committee>> {
        self.state
            .range(COMMITTEES_PREFIX, &committees_end())
            .into_iter()
            .map(|(_, value)| {
                bincode::deserialize(&value).map_err(|err| {
                    CoreError::StateCorruption(format!("undecodable committee: {err}"))
                })
            })
            .collect()
    }

    pub fn pending_validators(&self) -> CoreResult<Option<ValidatorSet>> {
        get_typed(&self.state, PENDING_VALIDATORS_KEY)
    }

    pub fn current_validators(&self) -> CoreResult<ValidatorSet> {
        Ok(get_typed(&self.state, CURRENT_VALIDATORS_KEY)?.unwrap_or_default())
    }
}

impl<S: StateWrite> SchedulerState<S> {
    pub fn set_parameters(&mut self, parameters: &SchedulerParameters) -> CoreResult<()> {
        set_typed(&mut self.state, PARAMETERS_KEY.to_vec(), parameters)
    }

    pub fn set_committee(&mut self, committee: &Committee) -> CoreResult<()> {
        set_typed(
            &mut self.state,
            committee_key(committee.kind, &committee.runtime_id),
            committee,
        )
    }

    pub fn drop_committee(&mut self, kind: CommitteeKind, runtime_id: &RuntimeId) {
        self.state.remove(&committee_key(kind, runtime_id));
    }

    pub fn set_pending_validators(&mut self, validators: &ValidatorSet) -> CoreResult<()> {
        set_typed(&mut self.state, PENDING_VALIDATORS_KEY.to_vec(), validators)
    }

    pub fn clear_pending_validators(&mut self) {
        self.state.remove(PENDING_VALIDATORS_KEY);
    }

    pub fn set_current_validators(&mut self, validators: &ValidatorSet) -> CoreResult<()> {
        set_typed(&mut self.state, CURRENT_VALIDATORS_KEY.to_vec(), validators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStore, Overlay};
    use crate::types::committee::{CommitteeNode, Role};

    #[test]
    fn committees_round_trip_and_drop() {
        let store = MemoryStore::new();
        let mut overlay = Overlay::new(store.head_snapshot());
        let mut state = SchedulerState::new(&mut overlay);

        let runtime_id = RuntimeId([7u8; 32]);
        let committee = Committee {
            kind: CommitteeKind::ComputeExecutor,
            runtime_id,
            members: vec![CommitteeNode {
                role: Role::Worker,
                public_key: PublicKey([1u8; 32]),
            }],
            valid_for: 4,
        };
        state.set_committee(&committee).unwrap();
        assert_eq!(
            state
                .committee(CommitteeKind::ComputeExecutor, &runtime_id)
                .unwrap(),
            Some(committee.clone())
        );
        assert_eq!(state.all_committees().unwrap(), vec![committee]);

        state.drop_committee(CommitteeKind::ComputeExecutor, &runtime_id);
        assert_eq!(
            state
                .committee(CommitteeKind::ComputeExecutor, &runtime_id)
                .unwrap(),
            None
        );
    }
}
