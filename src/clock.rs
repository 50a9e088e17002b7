//! Time source shared by the cache, coordinator, loader and version checks.

use chrono::{DateTime, Utc};
use std::sync::Arc;
#[cfg(test)]
use {
  chrono::Duration,
  std::sync::{Mutex, PoisonError},
};

/// Source of "now" for every time-dependent decision in the data layer.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }

  pub fn advance_millis(&self, millis: i64) {
    self.advance(Duration::milliseconds(millis));
  }
}

#[cfg(test)]
impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);

    clock.advance_millis(250);
    assert_eq!(clock.now() - start, Duration::milliseconds(250));
  }
}
