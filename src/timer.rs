use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};
use crate::state::{get_typed, set_typed, StateRead, StateWrite};

const ID_PREFIX: &[u8] = b"timers/id/";
const DEADLINE_PREFIX: &[u8] = b"timers/deadline/";

/// Persistent per-application timer.
///
/// Timers live in the state tree under two indices: the primary record under
/// `timers/id/` and an ordered traversal index under `timers/deadline/`.
/// Mutations go through the block overlay, so both indices move atomically
/// with the enclosing transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub id: String,
    pub app: String,
    pub armed: bool,
    pub deadline: u64,
    #[serde(default)]
    pub data: Vec<u8>,
}

fn scoped_id(app: &str, id: &str) -> String {
    format!("{app}:{id}")
}

fn id_key(scoped: &str) -> Vec<u8> {
    let mut key = ID_PREFIX.to_vec();
    key.extend_from_slice(scoped.as_bytes());
    key
}

fn deadline_key(deadline: u64, scoped: &str) -> Vec<u8> {
    let mut key = DEADLINE_PREFIX.to_vec();
    key.extend_from_slice(&deadline.to_be_bytes());
    key.push(b'/');
    key.extend_from_slice(scoped.as_bytes());
    key
}

/// (Re)arms a timer to fire `duration` seconds after `now`.
pub fn reset<S: StateWrite>(
    state: &mut S,
    app: &str,
    id: &str,
    now: u64,
    duration: u64,
    data: Vec<u8>,
) -> CoreResult<()> {
    let scoped = scoped_id(app, id);
    if let Some(existing) = get_typed::<TimerState, _>(state, &id_key(&scoped))? {
        if existing.armed {
            state.remove(&deadline_key(existing.deadline, &scoped));
        }
    }
    let timer = TimerState {
        id: scoped.clone(),
        app: app.to_string(),
        armed: true,
        deadline: now + duration,
        data,
    };
    set_typed(state, id_key(&scoped), &timer)?;
    state.set(deadline_key(timer.deadline, &scoped), scoped.into_bytes());
    Ok(())
}

/// Disarms a timer, keeping its primary record.
pub fn stop<S: StateWrite>(state: &mut S, app: &str, id: &str) -> CoreResult<()> {
    let scoped = scoped_id(app, id);
    let Some(mut timer) = get_typed::<TimerState, _>(state, &id_key(&scoped))? else {
        return Ok(());
    };
    if timer.armed {
        state.remove(&deadline_key(timer.deadline, &scoped));
        timer.armed = false;
        set_typed(state, id_key(&scoped), &timer)?;
    }
    Ok(())
}

/// Armed timers whose deadline has passed, ordered by deadline ascending and
/// then id lexicographically.
pub fn expired<S: StateRead>(state: &S, now: u64) -> CoreResult<Vec<TimerState>> {
    let mut end = DEADLINE_PREFIX.to_vec();
    end.extend_from_slice(&(now + 1).to_be_bytes());
    let mut timers = Vec::new();
    for (_, value) in state.range(DEADLINE_PREFIX, &end) {
        let scoped = String::from_utf8(value)
            .map_err(|_| CoreError::StateCorruption("malformed timer index entry".into()))?;
        let timer: TimerState = get_typed(state, &id_key(&scoped))?
            .ok_or_else(|| CoreError::StateCorruption(format!("dangling timer index: {scoped}")))?;
        timers.push(timer);
    }
    Ok(timers)
}
