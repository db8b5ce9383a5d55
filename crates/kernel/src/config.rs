use std::fmt;
use std::time::Duration;
use tickwork_common::StatNum;

/// Scheduler tuning for one world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Record per-class tick counts and timings in [`StepStats::classes`].
    pub profile: bool,
    /// Upper bound on full teardown sweeps. Destroy hooks that keep spawning
    /// replacements would otherwise never let teardown finish.
    pub destroy_pass_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            profile: false,
            destroy_pass_limit: 16,
        }
    }
}

/// Per-class numbers gathered when profiling is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassStats {
    pub stat: StatNum,
    pub ticked: usize,
    pub elapsed: Duration,
}

/// What one call to `run_step` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepStats {
    pub tick: u64,
    /// Thinkers whose hooks ran this step.
    pub ticked: usize,
    /// Fresh thinkers folded into stable lists (before and after the pass).
    pub settled: usize,
    /// Only filled in when [`SchedulerConfig::profile`] is set.
    pub classes: Vec<ClassStats>,
    pub elapsed: Duration,
}

impl fmt::Display for StepStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick={} ticked={} settled={} time={:?}",
            self.tick, self.ticked, self.settled, self.elapsed
        )?;
        for class in &self.classes {
            write!(f, "\n  stat {:>3}: {:>5} in {:?}", class.stat, class.ticked, class.elapsed)?;
        }
        Ok(())
    }
}
