//! Time-boxed polling of incremental work.

use std::time::{Duration, Instant};

/// Calls a step function until it runs out of work or the budget elapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameBudget {
    pub budget: Duration,
}

impl FrameBudget {
    pub const EXPORT: Duration = Duration::from_millis(100);
    pub const ANIMATION: Duration = Duration::from_millis(30);

    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn export() -> Self {
        Self::new(Self::EXPORT)
    }

    pub fn animation() -> Self {
        Self::new(Self::ANIMATION)
    }

    /// Returns whether work remains.
    pub fn run(&self, step: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        self.run_with(|| start.elapsed(), step)
    }

    /// Like [`FrameBudget::run`] with the elapsed time supplied by `elapsed`.
    /// The step always runs at least once.
    pub fn run_with(&self, mut elapsed: impl FnMut() -> Duration, mut step: impl FnMut() -> bool) -> bool {
        loop {
            if !step() {
                return false;
            }
            if elapsed() >= self.budget {
                return true;
            }
        }
    }

    /// Fallible variant of [`FrameBudget::run`]; the first error ends the frame.
    pub fn try_run<E>(&self, mut step: impl FnMut() -> Result<bool, E>) -> Result<bool, E> {
        let start = Instant::now();
        loop {
            if !step()? {
                return Ok(false);
            }
            if start.elapsed() >= self.budget {
                return Ok(true);
            }
        }
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::animation()
    }
}
