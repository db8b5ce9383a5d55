use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest status number that is ticked.
pub const MAX_STATNUM: u8 = 127;

/// Status number out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("status number {0} is outside 0..=128")]
pub struct StatNumError(pub i64);

/// Priority class of a thinker ("status number").
///
/// Classes `0..=MAX_STATNUM` are ticked in ascending order each step.
/// [`StatNum::PASSIVE`] is one past the last ticking class: members are
/// enumerable and GC-visible but never ticked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct StatNum(u8);

impl StatNum {
    /// Lowest class; ticks first.
    pub const FIRST: StatNum = StatNum(0);
    /// Reserved for the engine's own bookkeeping thinkers.
    pub const INFO: StatNum = StatNum(1);
    /// Thinkers that must run before everything in the world.
    pub const FIRST_THINKING: StatNum = StatNum(32);
    /// Scrolling/sector effects.
    pub const SCROLLER: StatNum = StatNum(64);
    /// Player-controlled entities.
    pub const PLAYER: StatNum = StatNum(90);
    /// Class used when nothing more specific is asked for.
    pub const DEFAULT: StatNum = StatNum(100);
    /// Light-like objects that are tracked but never ticked.
    pub const PASSIVE: StatNum = StatNum(MAX_STATNUM + 1);

    /// Validate a raw class number.
    pub fn new(raw: i64) -> Result<Self, StatNumError> {
        if (0..=Self::PASSIVE.0 as i64).contains(&raw) {
            Ok(Self(raw as u8))
        } else {
            Err(StatNumError(raw))
        }
    }

    /// A ticking class. Rejects [`StatNum::PASSIVE`].
    pub fn ticking(raw: i64) -> Result<Self, StatNumError> {
        match Self::new(raw)? {
            s if s.is_passive() => Err(StatNumError(raw)),
            s => Ok(s),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_passive(self) -> bool {
        self == Self::PASSIVE
    }

    /// All ticking classes in tick order.
    pub fn ticking_classes() -> impl DoubleEndedIterator<Item = StatNum> {
        (0..=MAX_STATNUM).map(StatNum)
    }

    /// Every class including the passive one.
    pub fn all() -> impl DoubleEndedIterator<Item = StatNum> {
        (0..=Self::PASSIVE.0).map(StatNum)
    }
}

impl Default for StatNum {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for StatNum {
    type Error = StatNumError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<StatNum> for i64 {
    fn from(stat: StatNum) -> Self {
        stat.0 as i64
    }
}

impl fmt::Display for StatNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_passive() {
            f.write_str("passive")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
