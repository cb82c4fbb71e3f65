#![forbid(unsafe_code)]

//! Lane algebra: priority channels packed into a 31-bit mask.
//!
//! A [`Lanes`] value is a set of independent priority channels. A single
//! channel is still a `Lanes` value with exactly one bit set; the [`Lane`]
//! alias only documents intent at call sites.
//!
//! # Layout
//!
//! ```text
//! bit  0        SYNC               discrete input, flushed at end of turn
//! bit  1        INPUT_CONTINUOUS   drag / scroll style input
//! bit  2        DEFAULT            updates outside any event
//! bits 3..=18   TRANSITION_1..16   non-urgent transitions (round-robin)
//! bits 19..=22  RETRY_1..4         suspense retries (round-robin)
//! bit  23       IDLE
//! bit  24       OFFSCREEN
//! bit  25       DEFERRED
//! ```
//!
//! Lower bit index means higher priority. Synchronous lanes are promoted
//! ahead of everything else before the lowest-bit rule applies.
//!
//! # Invariants
//!
//! - Only the low [`TOTAL_LANES`] bits are ever set.
//! - [`Lanes::highest_priority_lane`] of an empty set is [`Lanes::NONE`].
//! - Lane-to-class mapping is fixed; it never depends on runtime state.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Index, IndexMut, Not};
use std::time::Duration;

/// Number of usable lane bits.
pub const TOTAL_LANES: usize = 31;

const VALID_BITS: u32 = (1 << TOTAL_LANES) - 1;

/// A set of priority lanes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Lanes(u32);

/// A single lane (a [`Lanes`] value with at most one bit set).
pub type Lane = Lanes;

impl Lanes {
    /// No lanes.
    pub const NONE: Self = Self(0);

    /// Discrete user input; always rendered without yielding.
    pub const SYNC: Self = Self(1 << 0);
    /// Continuous input such as pointer moves.
    pub const INPUT_CONTINUOUS: Self = Self(1 << 1);
    /// Updates that originate outside any event handler.
    pub const DEFAULT: Self = Self(1 << 2);

    pub const TRANSITION_1: Self = Self(1 << 3);
    pub const TRANSITION_2: Self = Self(1 << 4);
    pub const TRANSITION_3: Self = Self(1 << 5);
    pub const TRANSITION_4: Self = Self(1 << 6);
    pub const TRANSITION_5: Self = Self(1 << 7);
    pub const TRANSITION_6: Self = Self(1 << 8);
    pub const TRANSITION_7: Self = Self(1 << 9);
    pub const TRANSITION_8: Self = Self(1 << 10);
    pub const TRANSITION_9: Self = Self(1 << 11);
    pub const TRANSITION_10: Self = Self(1 << 12);
    pub const TRANSITION_11: Self = Self(1 << 13);
    pub const TRANSITION_12: Self = Self(1 << 14);
    pub const TRANSITION_13: Self = Self(1 << 15);
    pub const TRANSITION_14: Self = Self(1 << 16);
    pub const TRANSITION_15: Self = Self(1 << 17);
    pub const TRANSITION_16: Self = Self(1 << 18);

    pub const RETRY_1: Self = Self(1 << 19);
    pub const RETRY_2: Self = Self(1 << 20);
    pub const RETRY_3: Self = Self(1 << 21);
    pub const RETRY_4: Self = Self(1 << 22);

    /// Work that should only happen when nothing else is pending.
    pub const IDLE: Self = Self(1 << 23);
    /// Work for hidden subtrees.
    pub const OFFSCREEN: Self = Self(1 << 24);
    /// Deferred values spawned from another render.
    pub const DEFERRED: Self = Self(1 << 25);

    /// Lanes that are promoted ahead of every other class.
    pub const SYNC_LANES: Self = Self::SYNC;
    /// All transition lanes.
    pub const TRANSITION_LANES: Self = Self(0xFFFF << 3);
    /// All retry lanes.
    pub const RETRY_LANES: Self = Self(0b1111 << 19);
    /// Every lane that is not idle, offscreen, or deferred.
    pub const NON_IDLE_LANES: Self = Self((1 << 23) - 1);
    /// Lanes that block the main thread and are never time-sliced.
    pub const BLOCKING_LANES: Self =
        Self(Self::SYNC.0 | Self::INPUT_CONTINUOUS.0 | Self::DEFAULT.0);

    /// Build from raw bits, discarding anything above [`TOTAL_LANES`].
    #[inline]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & VALID_BITS)
    }

    /// Raw bit representation.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Lane at a bit index.
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        debug_assert!(index < TOTAL_LANES);
        Self(1 << index)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two lane sets.
    #[inline]
    pub const fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection of two lane sets.
    #[inline]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// `self` without the lanes in `other`.
    #[inline]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True if the two sets share at least one lane.
    #[inline]
    pub const fn includes_some(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every lane in `self` is also in `set`.
    #[inline]
    pub const fn is_subset_of(self, set: Self) -> bool {
        self.0 & set.0 == self.0
    }

    /// Number of lanes in the set.
    #[inline]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// The single highest-priority lane, or [`Lanes::NONE`] for an empty set.
    ///
    /// Synchronous lanes win regardless of position; otherwise the lowest
    /// set bit wins.
    #[inline]
    pub const fn highest_priority_lane(self) -> Lane {
        let sync = self.0 & Self::SYNC_LANES.0;
        let pool = if sync != 0 { sync } else { self.0 };
        Self(pool & pool.wrapping_neg())
    }

    /// The group of lanes that should be rendered together with the highest
    /// priority lane: all pending transitions batch as one, likewise retries.
    pub const fn highest_priority_lanes(self) -> Lanes {
        let sync = self.0 & Self::SYNC_LANES.0;
        if sync != 0 {
            return Self(sync);
        }
        let lane = self.highest_priority_lane();
        if lane.0 & Self::TRANSITION_LANES.0 != 0 {
            Self(self.0 & Self::TRANSITION_LANES.0)
        } else if lane.0 & Self::RETRY_LANES.0 != 0 {
            Self(self.0 & Self::RETRY_LANES.0)
        } else {
            lane
        }
    }

    /// Index of an arbitrary set lane (the most significant one).
    ///
    /// Callers must pass a non-empty set.
    #[inline]
    pub const fn pick_arbitrary_lane_index(self) -> usize {
        debug_assert!(self.0 != 0);
        31 - self.0.leading_zeros() as usize
    }

    /// Bit index of a single lane.
    #[inline]
    pub const fn index(self) -> usize {
        debug_assert!(self.0.count_ones() == 1);
        self.0.trailing_zeros() as usize
    }

    /// Iterate the individual lanes, highest bit first.
    pub fn iter(self) -> LaneIter {
        LaneIter(self.0)
    }

    // -- class predicates ----------------------------------------------------

    #[inline]
    pub const fn includes_sync_lane(self) -> bool {
        self.0 & Self::SYNC_LANES.0 != 0
    }

    #[inline]
    pub const fn includes_blocking_lane(self) -> bool {
        self.0 & Self::BLOCKING_LANES.0 != 0
    }

    #[inline]
    pub const fn includes_non_idle_work(self) -> bool {
        self.0 & Self::NON_IDLE_LANES.0 != 0
    }

    /// Non-empty and made only of transition lanes.
    #[inline]
    pub const fn includes_only_transitions(self) -> bool {
        self.0 != 0 && self.0 & Self::TRANSITION_LANES.0 == self.0
    }

    /// Non-empty and made only of retry lanes.
    #[inline]
    pub const fn includes_only_retries(self) -> bool {
        self.0 != 0 && self.0 & Self::RETRY_LANES.0 == self.0
    }

    /// Non-empty and made only of transition or retry lanes.
    #[inline]
    pub const fn includes_only_non_urgent(self) -> bool {
        let non_urgent = Self::TRANSITION_LANES.0 | Self::RETRY_LANES.0 | Self::IDLE.0;
        self.0 != 0 && self.0 & non_urgent == self.0
    }

    #[inline]
    pub const fn is_transition(self) -> bool {
        self.0 & Self::TRANSITION_LANES.0 != 0
    }
}

impl BitOr for Lanes {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl BitOrAssign for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Lanes {
    type Output = Self;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl BitAndAssign for Lanes {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Lanes {
    type Output = Self;
    #[inline]
    fn not(self) -> Self {
        Self(!self.0 & VALID_BITS)
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

impl fmt::Display for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for lane in LaneIter(self.0).collect::<Vec<_>>().into_iter().rev() {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(lane_label(lane))?;
        }
        Ok(())
    }
}

fn lane_label(lane: Lane) -> &'static str {
    match lane {
        Lanes::SYNC => "sync",
        Lanes::INPUT_CONTINUOUS => "input-continuous",
        Lanes::DEFAULT => "default",
        Lanes::IDLE => "idle",
        Lanes::OFFSCREEN => "offscreen",
        Lanes::DEFERRED => "deferred",
        l if l.is_transition() => "transition",
        l if l.includes_some(Lanes::RETRY_LANES) => "retry",
        _ => "unknown",
    }
}

/// Iterator over the single lanes in a set.
#[derive(Debug, Clone)]
pub struct LaneIter(u32);

impl Iterator for LaneIter {
    type Item = Lane;

    fn next(&mut self) -> Option<Lane> {
        if self.0 == 0 {
            return None;
        }
        let index = 31 - self.0.leading_zeros();
        let lane = 1 << index;
        self.0 &= !lane;
        Some(Lanes(lane))
    }
}

// =============================================================================
// Per-lane storage
// =============================================================================

/// One value per lane, indexed by lane bit.
#[derive(Clone, PartialEq, Eq)]
pub struct LaneMap<T>([T; TOTAL_LANES]);

impl<T: Copy> LaneMap<T> {
    pub fn new(initial: T) -> Self {
        Self([initial; TOTAL_LANES])
    }
}

impl<T> LaneMap<T> {
    /// Value stored for a single lane.
    #[inline]
    pub fn get(&self, lane: Lane) -> &T {
        &self.0[lane.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, lane: Lane) -> &mut T {
        &mut self.0[lane.index()]
    }
}

impl<T> Index<usize> for LaneMap<T> {
    type Output = T;
    #[inline]
    fn index(&self, index: usize) -> &T {
        &self.0[index]
    }
}

impl<T> IndexMut<usize> for LaneMap<T> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.0[index]
    }
}

impl<T: fmt::Debug> fmt::Debug for LaneMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

// =============================================================================
// Priorities
// =============================================================================

/// Priority of the host event that produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPriority {
    /// Clicks, key presses: one discrete event at a time.
    Discrete,
    /// Pointer moves, scrolls.
    Continuous,
    /// Anything outside an event.
    Default,
    Idle,
}

impl EventPriority {
    /// Lane an update at this priority is assigned.
    pub const fn lane(self) -> Lane {
        match self {
            Self::Discrete => Lanes::SYNC,
            Self::Continuous => Lanes::INPUT_CONTINUOUS,
            Self::Default => Lanes::DEFAULT,
            Self::Idle => Lanes::IDLE,
        }
    }

    /// Event priority implied by the highest lane of a set.
    pub const fn from_lanes(lanes: Lanes) -> Self {
        let lane = lanes.highest_priority_lane();
        if lane.0 == 0 || lane.0 == Lanes::SYNC.0 {
            Self::Discrete
        } else if lane.0 == Lanes::INPUT_CONTINUOUS.0 {
            Self::Continuous
        } else if lane.includes_non_idle_work() {
            Self::Default
        } else {
            Self::Idle
        }
    }

    /// Host task priority used for work at this event priority.
    pub const fn scheduler_priority(self) -> SchedulerPriority {
        match self {
            Self::Discrete => SchedulerPriority::Immediate,
            Self::Continuous => SchedulerPriority::UserBlocking,
            Self::Default => SchedulerPriority::Normal,
            Self::Idle => SchedulerPriority::Idle,
        }
    }
}

/// Priority of a task queued with the host scheduler. Ordered most urgent
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchedulerPriority {
    Immediate,
    UserBlocking,
    Normal,
    Idle,
}

// =============================================================================
// Configuration
// =============================================================================

/// Default starvation window for sync and continuous lanes.
pub const DEFAULT_SYNC_EXPIRATION: Duration = Duration::from_millis(250);

/// Default starvation window for default and transition lanes.
pub const DEFAULT_TRANSITION_EXPIRATION: Duration = Duration::from_millis(5000);

/// Starvation timeouts per lane class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    /// Window after which a pending sync or continuous lane is expired.
    pub sync_expiration: Duration,
    /// Window after which a pending default or transition lane is expired.
    pub transition_expiration: Duration,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            sync_expiration: DEFAULT_SYNC_EXPIRATION,
            transition_expiration: DEFAULT_TRANSITION_EXPIRATION,
        }
    }
}

impl LaneConfig {
    /// Deadline for a lane first scheduled at `now`. Retry, idle, offscreen
    /// and deferred lanes never expire.
    pub fn compute_expiration_time(&self, lane: Lane, now: Duration) -> Option<Duration> {
        if lane == Lanes::SYNC || lane == Lanes::INPUT_CONTINUOUS {
            Some(now + self.sync_expiration)
        } else if lane == Lanes::DEFAULT || lane.is_transition() {
            Some(now + self.transition_expiration)
        } else {
            None
        }
    }
}

// =============================================================================
// Round-robin claims
// =============================================================================

/// Hands out transition and retry lanes round-robin so that independent
/// transitions do not share a lane.
#[derive(Debug, Clone)]
pub struct LaneCursor {
    next_transition: Lane,
    next_retry: Lane,
}

impl Default for LaneCursor {
    fn default() -> Self {
        Self {
            next_transition: Lanes::TRANSITION_1,
            next_retry: Lanes::RETRY_1,
        }
    }
}

impl LaneCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim_next_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition;
        self.next_transition = Lanes(lane.0 << 1);
        if !self.next_transition.includes_some(Lanes::TRANSITION_LANES) {
            self.next_transition = Lanes::TRANSITION_1;
        }
        lane
    }

    pub fn claim_next_retry_lane(&mut self) -> Lane {
        let lane = self.next_retry;
        self.next_retry = Lanes(lane.0 << 1);
        if !self.next_retry.includes_some(Lanes::RETRY_LANES) {
            self.next_retry = Lanes::RETRY_1;
        }
        lane
    }
}
