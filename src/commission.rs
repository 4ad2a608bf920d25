use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};
use crate::quantity::Quantity;
use crate::types::EpochTime;

/// Commission rates are expressed in parts of this denominator.
pub const RATE_DENOMINATOR: u64 = 1_000_000_000;

/// A commission rate taking effect at a given epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRateStep {
    pub start: EpochTime,
    pub rate: Quantity,
}

/// Bounds on the commission rate taking effect at a given epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRateBoundStep {
    pub start: EpochTime,
    pub rate_min: Quantity,
    pub rate_max: Quantity,
}

/// Step-wise commission schedule of an escrow account.
///
/// Both step vectors are kept sorted by ascending start epoch; the step in
/// effect at an epoch is the last one whose start has passed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSchedule {
    #[serde(default)]
    pub rates: Vec<CommissionRateStep>,
    #[serde(default)]
    pub bounds: Vec<CommissionRateBoundStep>,
}

/// Consensus rules governing commission schedule amendments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionScheduleRules {
    /// Rate steps may only start at epochs that are a multiple of this
    /// interval. Zero disables the alignment requirement.
    #[serde(default)]
    pub rate_change_interval: EpochTime,
    /// Bound steps must start at least this many epochs in the future.
    #[serde(default)]
    pub rate_bound_lead: EpochTime,
    #[serde(default)]
    pub max_rate_steps: usize,
    #[serde(default)]
    pub max_bound_steps: usize,
}

impl CommissionSchedule {
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty() && self.bounds.is_empty()
    }

    /// The rate in effect at `now`, if any.
    pub fn current_rate(&self, now: EpochTime) -> Option<&Quantity> {
        let mut current = None;
        for step in &self.rates {
            if step.start > now {
                break;
            }
            current = Some(&step.rate);
        }
        current
    }

    fn current_bound(&self, now: EpochTime) -> Option<&CommissionRateBoundStep> {
        let mut current = None;
        for step in &self.bounds {
            if step.start > now {
                break;
            }
            current = Some(step);
        }
        current
    }

    /// Drops steps that have been fully superseded before `now`, keeping the
    /// one currently in effect.
    pub fn prune(&mut self, now: EpochTime) {
        while self.rates.len() > 1 && self.rates[1].start <= now {
            self.rates.remove(0);
        }
        while self.bounds.len() > 1 && self.bounds[1].start <= now {
            self.bounds.remove(0);
        }
    }

    fn validate_basic(&self) -> CoreResult<()> {
        let denominator = Quantity::from_u64(RATE_DENOMINATOR);
        let mut last_start = None;
        for step in &self.rates {
            if last_start.is_some_and(|prev| step.start <= prev) {
                return Err(CoreError::InvalidArgument);
            }
            if step.rate > denominator {
                return Err(CoreError::InvalidArgument);
            }
            last_start = Some(step.start);
        }
        let mut last_start = None;
        for step in &self.bounds {
            if last_start.is_some_and(|prev| step.start <= prev) {
                return Err(CoreError::InvalidArgument);
            }
            if step.rate_max > denominator || step.rate_min > step.rate_max {
                return Err(CoreError::InvalidArgument);
            }
            last_start = Some(step.start);
        }
        Ok(())
    }

    /// Applies an amendment after validating it against the rules.
    ///
    /// Only the future may change: every amended step must start after `now`
    /// (bound steps with the configured lead), rate starts must be aligned
    /// to the change interval, the merged schedule must stay within the step
    /// count limits and every future rate must respect the bound in effect
    /// at its start. On failure the schedule is left unchanged.
    pub fn amend(
        &mut self,
        amendment: &CommissionSchedule,
        rules: &CommissionScheduleRules,
        now: EpochTime,
    ) -> CoreResult<()> {
        if amendment.is_empty() {
            return Err(CoreError::InvalidArgument);
        }
        amendment.validate_basic()?;

        for step in &amendment.rates {
            if step.start <= now {
                return Err(CoreError::InvalidArgument);
            }
            if rules.rate_change_interval > 0 && step.start % rules.rate_change_interval != 0 {
                return Err(CoreError::InvalidArgument);
            }
        }
        for step in &amendment.bounds {
            if step.start <= now.saturating_add(rules.rate_bound_lead) {
                return Err(CoreError::InvalidArgument);
            }
        }

        let mut merged = self.clone();
        merged.prune(now);
        if let Some(first) = amendment.rates.first() {
            merged.rates.retain(|step| step.start < first.start);
            merged.rates.extend(amendment.rates.iter().cloned());
        }
        if let Some(first) = amendment.bounds.first() {
            merged.bounds.retain(|step| step.start < first.start);
            merged.bounds.extend(amendment.bounds.iter().cloned());
        }
        merged.validate_basic()?;

        if rules.max_rate_steps > 0 && merged.rates.len() > rules.max_rate_steps {
            return Err(CoreError::InvalidArgument);
        }
        if rules.max_bound_steps > 0 && merged.bounds.len() > rules.max_bound_steps {
            return Err(CoreError::InvalidArgument);
        }

        for step in &merged.rates {
            if step.start <= now {
                continue;
            }
            if let Some(bound) = merged.current_bound(step.start) {
                if step.rate < bound.rate_min || step.rate > bound.rate_max {
                    return Err(CoreError::InvalidArgument);
                }
            }
        }

        *self = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> CommissionScheduleRules {
        CommissionScheduleRules {
            rate_change_interval: 10,
            rate_bound_lead: 30,
            max_rate_steps: 4,
            max_bound_steps: 4,
        }
    }

    fn percent(p: u64) -> Quantity {
        Quantity::from_u64(p * RATE_DENOMINATOR / 100)
    }

    #[test]
    fn current_rate_picks_latest_started_step() {
        let schedule = CommissionSchedule {
            rates: vec![
                CommissionRateStep {
                    start: 0,
                    rate: percent(5),
                },
                CommissionRateStep {
                    start: 20,
                    rate: percent(10),
                },
            ],
            bounds: Vec::new(),
        };
        assert_eq!(schedule.current_rate(0), Some(&percent(5)));
        assert_eq!(schedule.current_rate(19), Some(&percent(5)));
        assert_eq!(schedule.current_rate(20), Some(&percent(10)));
    }

    #[test]
    fn amendment_must_be_in_the_future() {
        let mut schedule = CommissionSchedule::default();
        let amendment = CommissionSchedule {
            rates: vec![CommissionRateStep {
                start: 0,
                rate: percent(5),
            }],
            bounds: Vec::new(),
        };
        assert!(matches!(
            schedule.amend(&amendment, &rules(), 5),
            Err(CoreError::InvalidArgument)
        ));
    }

    #[test]
    fn amendment_respects_alignment_and_bounds() {
        let mut schedule = CommissionSchedule {
            rates: Vec::new(),
            bounds: vec![CommissionRateBoundStep {
                start: 0,
                rate_min: percent(0),
                rate_max: percent(20),
            }],
        };

        // Misaligned start.
        let misaligned = CommissionSchedule {
            rates: vec![CommissionRateStep {
                start: 15,
                rate: percent(5),
            }],
            bounds: Vec::new(),
        };
        assert!(schedule.amend(&misaligned, &rules(), 5).is_err());

        // Rate above the bound in effect.
        let excessive = CommissionSchedule {
            rates: vec![CommissionRateStep {
                start: 20,
                rate: percent(50),
            }],
            bounds: Vec::new(),
        };
        assert!(schedule.amend(&excessive, &rules(), 5).is_err());

        let acceptable = CommissionSchedule {
            rates: vec![CommissionRateStep {
                start: 20,
                rate: percent(10),
            }],
            bounds: Vec::new(),
        };
        schedule.amend(&acceptable, &rules(), 5).unwrap();
        assert_eq!(schedule.current_rate(20), Some(&percent(10)));
    }

    #[test]
    fn amendment_replaces_overlapping_future_steps() {
        let mut schedule = CommissionSchedule {
            rates: vec![
                CommissionRateStep {
                    start: 0,
                    rate: percent(5),
                },
                CommissionRateStep {
                    start: 40,
                    rate: percent(15),
                },
            ],
            bounds: Vec::new(),
        };
        let amendment = CommissionSchedule {
            rates: vec![CommissionRateStep {
                start: 30,
                rate: percent(8),
            }],
            bounds: Vec::new(),
        };
        schedule.amend(&amendment, &rules(), 5).unwrap();
        assert_eq!(schedule.rates.len(), 2);
        assert_eq!(schedule.current_rate(45), Some(&percent(8)));
    }

    #[test]
    fn bound_amendment_requires_lead_time() {
        let mut schedule = CommissionSchedule::default();
        let amendment = CommissionSchedule {
            rates: Vec::new(),
            bounds: vec![CommissionRateBoundStep {
                start: 20,
                rate_min: percent(0),
                rate_max: percent(10),
            }],
        };
        // now + rate_bound_lead = 35 > 20.
        assert!(schedule.amend(&amendment, &rules(), 5).is_err());

        let amendment = CommissionSchedule {
            rates: Vec::new(),
            bounds: vec![CommissionRateBoundStep {
                start: 40,
                rate_min: percent(0),
                rate_max: percent(10),
            }],
        };
        schedule.amend(&amendment, &rules(), 5).unwrap();
    }
}
