//! Collision-free, time-ordered snapshot names.
//!
//! Names have the form `{base}_{YYYYMMDD}_{seq:03}.parquet`. The counter is
//! shared by all base names of the process and restarts at 1 when the calendar
//! date changes. Sequencing is process-local: concurrent processes must use
//! different base names.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use glacier_resources::SNAPSHOT_EXTENSION;

/// Source of the current calendar date.
pub trait Clock: Send + Sync + 'static {
    fn today(&self) -> NaiveDate;
}

impl<C: Clock> Clock for Arc<C> {
    fn today(&self) -> NaiveDate {
        self.as_ref().today()
    }
}

/// Reads the date from the system clock, in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    today: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = today;
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
struct SequenceState {
    date: Option<NaiveDate>,
    counter: u32,
}

pub struct FilenameSequencer {
    clock: Box<dyn Clock>,
    state: Mutex<SequenceState>,
}

impl FilenameSequencer {
    pub fn new(clock: impl Clock) -> Self {
        Self {
            clock: Box::new(clock),
            state: Mutex::new(SequenceState {
                date: None,
                counter: 0,
            }),
        }
    }

    /// Returns the next snapshot name for `base_name`.
    pub fn next(&self, base_name: &str) -> String {
        let (date, counter) = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let today = self.clock.today();

            if state.date != Some(today) {
                state.date = Some(today);
                state.counter = 0;
            }

            state.counter += 1;
            (today, state.counter)
        };

        format_snapshot_name(base_name, date, counter)
    }
}

impl Default for FilenameSequencer {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

/// Formats a snapshot name. Counters above 999 widen the sequence field.
pub fn format_snapshot_name(base_name: &str, date: NaiveDate, seq: u32) -> String {
    format!(
        "{base_name}_{}_{seq:03}.{SNAPSHOT_EXTENSION}",
        date.format("%Y%m%d")
    )
}
