//! Repairs the device's "today" energy counters.
//!
//! The EZ1 resets `e1`/`e2` at local midnight, and a reboot during the day
//! resets them too. The accumulator folds a mid-day regression into a carry
//! so the published value never goes backwards within a day.

use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccumulatorState {
    pub raw_previous: Option<f64>,
    pub carry_base: f64,
    pub last_reset_day: Option<NaiveDate>,
}

/// One accumulator per tracked "today" channel.
#[derive(Debug, Clone, Default)]
pub struct EnergyAccumulator {
    state: AccumulatorState,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    /// Feed a raw reading taken on `today` and return the repaired value.
    pub fn update(&mut self, raw: f64, today: NaiveDate) -> f64 {
        let state = &mut self.state;

        if state.last_reset_day != Some(today) {
            // New day, the device counter restarted as well
            state.carry_base = 0.0;
            state.last_reset_day = Some(today);
        } else if let Some(previous) = state.raw_previous {
            if raw < previous {
                tracing::debug!(
                    previous,
                    raw,
                    carry = state.carry_base + previous,
                    "today counter regressed, carrying previous value"
                );
                state.carry_base += previous;
            }
        }

        state.raw_previous = Some(raw);
        raw + state.carry_base
    }
}
