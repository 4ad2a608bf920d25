use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};
use crate::state::{get_typed, set_typed, StateRead, StateWrite};
use crate::timer;
use crate::types::EpochTime;

pub const APP_NAME: &str = "epochtime";

const INTERVAL_TIMER_ID: &str = "interval";
const CURRENT_KEY: &[u8] = b"epochtime/current";
const PARAMETERS_KEY: &[u8] = b"epochtime/parameters";

/// Epoch-time consensus parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochTimeParameters {
    /// Seconds between epoch transitions.
    pub interval: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochState {
    pub epoch: EpochTime,
    pub height: u64,
}

pub fn current_epoch<S: StateRead>(state: &S) -> CoreResult<EpochTime> {
    Ok(get_typed::<EpochState, _>(state, CURRENT_KEY)?
        .unwrap_or_default()
        .epoch)
}

pub fn parameters<S: StateRead>(state: &S) -> CoreResult<EpochTimeParameters> {
    get_typed(state, PARAMETERS_KEY)?
        .ok_or_else(|| CoreError::StateCorruption("missing epochtime parameters".into()))
}

/// Writes the genesis epoch state and arms the interval timer.
pub fn init<S: StateWrite>(
    state: &mut S,
    params: &EpochTimeParameters,
    genesis_time: u64,
) -> CoreResult<()> {
    set_typed(state, PARAMETERS_KEY.to_vec(), params)?;
    set_typed(
        state,
        CURRENT_KEY.to_vec(),
        &EpochState {
            epoch: 0,
            height: 0,
        },
    )?;
    timer::reset(
        state,
        APP_NAME,
        INTERVAL_TIMER_ID,
        genesis_time,
        params.interval,
        Vec::new(),
    )
}

/// Advances the epoch when the interval timer fires and re-arms it.
pub fn on_timer<S: StateWrite>(state: &mut S, now: u64, height: u64) -> CoreResult<EpochTime> {
    let params = parameters(state)?;
    let current: EpochState = get_typed(state, CURRENT_KEY)?.unwrap_or_default();
    let next = EpochState {
        epoch: current.epoch + 1,
        height,
    };
    set_typed(state, CURRENT_KEY.to_vec(), &next)?;
    timer::reset(
        state,
        APP_NAME,
        INTERVAL_TIMER_ID,
        now,
        params.interval,
        Vec::new(),
    )?;
    Ok(next.epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStore, Overlay};

    #[test]
    fn epochs_advance_with_the_interval_timer() {
        let store = MemoryStore::new();
        let mut overlay = Overlay::new(store.head_snapshot());

        init(
            &mut overlay,
            &EpochTimeParameters { interval: 100 },
            1_000,
        )
        .unwrap();
        assert_eq!(current_epoch(&overlay).unwrap(), 0);
        assert!(timer::expired(&overlay, 1_099).unwrap().is_empty());

        let fired = timer::expired(&overlay, 1_100).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].app, APP_NAME);

        let epoch = on_timer(&mut overlay, 1_100, 12).unwrap();
        assert_eq!(epoch, 1);
        assert_eq!(current_epoch(&overlay).unwrap(), 1);

        // Re-armed for the next interval.
        assert!(timer::expired(&overlay, 1_199).unwrap().is_empty());
        assert_eq!(timer::expired(&overlay, 1_200).unwrap().len(), 1);
    }
}
