//! Wall-clock access for policy checks and timestamps.
//!
//! Components take an `Arc<dyn Clock>` so tests can pin "now".

use chrono::{DateTime, Local, NaiveTime, Utc};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    /// Current instant, used for record timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current local time-of-day, used for quiet-hours evaluation.
    fn local_time(&self) -> NaiveTime;
}

/// Reads the host clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Clock frozen at a given instant and local time-of-day.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub instant: DateTime<Utc>,
    pub time_of_day: NaiveTime,
}

impl FixedClock {
    pub fn at(time_of_day: NaiveTime) -> Self {
        Self {
            instant: Utc::now(),
            time_of_day,
        }
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.instant
    }

    fn local_time(&self) -> NaiveTime {
        self.time_of_day
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
