#![forbid(unsafe_code)]

//! Per-root lane bookkeeping.
//!
//! A root tracks which lanes have pending work, which of those are parked
//! waiting on data (`suspended`), which parked lanes have since been
//! unblocked (`pinged`), and which have waited so long they must now run
//! without yielding (`expired`).
//!
//! # Invariants
//!
//! - `suspended`, `pinged` and `expired` are subsets of `pending` whenever
//!   [`RootLanes::mark_finished`] has run since the last update.
//! - An entanglement record for lane `i` always contains `i` itself once
//!   `i` has been entangled with anything.
//! - Expiration deadlines exist only for pending lanes.

use std::time::Duration;

use crate::lane::{Lane, LaneConfig, LaneMap, Lanes};

/// Lane state owned by one root.
#[derive(Debug, Clone)]
pub struct RootLanes {
    pub pending: Lanes,
    pub suspended: Lanes,
    pub pinged: Lanes,
    pub expired: Lanes,
    /// Lanes retried once after an error; they are not retried again.
    pub error_recovery_disabled: Lanes,
    /// Union of all lanes that have an entanglement record.
    pub entangled: Lanes,
    entanglements: LaneMap<Lanes>,
    expiration_times: LaneMap<Option<Duration>>,
}

impl Default for RootLanes {
    fn default() -> Self {
        Self {
            pending: Lanes::NONE,
            suspended: Lanes::NONE,
            pinged: Lanes::NONE,
            expired: Lanes::NONE,
            error_recovery_disabled: Lanes::NONE,
            entangled: Lanes::NONE,
            entanglements: LaneMap::new(Lanes::NONE),
            expiration_times: LaneMap::new(None),
        }
    }
}

impl RootLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new update. Any non-idle update may unblock suspended work,
    /// so the suspended and pinged sets are cleared.
    pub fn mark_updated(&mut self, lane: Lane) {
        self.pending |= lane;
        if lane != Lanes::IDLE {
            self.suspended = Lanes::NONE;
            self.pinged = Lanes::NONE;
        }
    }

    /// Park lanes that are waiting on data.
    pub fn mark_suspended(&mut self, lanes: Lanes) {
        self.suspended |= lanes;
        self.pinged = self.pinged.remove(lanes);
        for lane in lanes.iter() {
            *self.expiration_times.get_mut(lane) = None;
        }
    }

    /// Unblock parked lanes whose data became available.
    pub fn mark_pinged(&mut self, lanes: Lanes) {
        self.pinged |= self.suspended & lanes;
    }

    /// A commit finished; only `remaining` lanes still have work.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending.remove(remaining);

        self.pending = remaining;
        self.suspended = Lanes::NONE;
        self.pinged = Lanes::NONE;
        self.expired &= remaining;
        self.entangled &= remaining;
        self.error_recovery_disabled &= remaining;

        for lane in no_longer_pending.iter() {
            *self.entanglements.get_mut(lane) = Lanes::NONE;
            *self.expiration_times.get_mut(lane) = None;
        }
    }

    /// Entangle every lane in `lanes` with each other and, transitively,
    /// with every lane already entangled with any of them.
    pub fn mark_entangled(&mut self, lanes: Lanes) {
        let mut group = lanes;
        loop {
            let widened = (self.entangled & group)
                .iter()
                .fold(group, |acc, lane| acc | *self.entanglements.get(lane));
            if widened == group {
                break;
            }
            group = widened;
        }

        self.entangled |= group;
        for lane in group.iter() {
            *self.entanglements.get_mut(lane) |= group;
        }
    }

    /// `render_lanes` plus everything entangled with them.
    pub fn entangled_lanes_for(&self, render_lanes: Lanes) -> Lanes {
        let mut result = render_lanes;
        for lane in (self.entangled & render_lanes).iter() {
            result |= *self.entanglements.get(lane);
        }
        result
    }

    /// True if rendering `lane` must also finish `other`.
    pub fn is_entangled(&self, lane: Lane, other: Lane) -> bool {
        self.entangled_lanes_for(lane).includes_some(other)
    }

    /// Choose the lanes to render next.
    ///
    /// `wip_lanes` are the lanes of an in-progress render; if the new
    /// candidate is not more urgent, the in-progress lanes are kept so the
    /// partial render is not thrown away.
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        if self.pending.is_empty() {
            return Lanes::NONE;
        }

        let non_idle = self.pending & Lanes::NON_IDLE_LANES;
        let next = if !non_idle.is_empty() {
            let unblocked = non_idle.remove(self.suspended);
            if !unblocked.is_empty() {
                unblocked.highest_priority_lanes()
            } else {
                (non_idle & self.pinged).highest_priority_lanes()
            }
        } else {
            let unblocked = self.pending.remove(self.suspended);
            if !unblocked.is_empty() {
                unblocked.highest_priority_lanes()
            } else {
                self.pinged.highest_priority_lanes()
            }
        };

        if next.is_empty() {
            return Lanes::NONE;
        }

        if !wip_lanes.is_empty()
            && wip_lanes != next
            && !wip_lanes.includes_some(self.suspended)
        {
            let next_lane = next.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            if next_lane.bits() >= wip_lane.bits() {
                return wip_lanes;
            }
        }

        next
    }

    /// Stamp deadlines on newly pending lanes and expire lanes whose
    /// deadline has passed. Retry lanes are never stamped.
    pub fn mark_starved_lanes_as_expired(&mut self, now: Duration, config: &LaneConfig) {
        let candidates = self.pending.remove(Lanes::RETRY_LANES);
        for lane in candidates.iter() {
            match *self.expiration_times.get(lane) {
                None => {
                    if !lane.includes_some(self.suspended) || lane.includes_some(self.pinged) {
                        *self.expiration_times.get_mut(lane) =
                            config.compute_expiration_time(lane, now);
                    }
                }
                Some(deadline) if deadline <= now => {
                    self.expired |= lane;
                }
                Some(_) => {}
            }
        }
    }

    /// Deadline recorded for a lane, if any.
    pub fn expiration_time(&self, lane: Lane) -> Option<Duration> {
        *self.expiration_times.get(lane)
    }

    pub fn includes_expired(&self, lanes: Lanes) -> bool {
        self.expired.includes_some(lanes)
    }

    /// Lanes to retry synchronously after a render in `attempted` errored,
    /// or none if those lanes already had their one retry.
    pub fn lanes_to_retry_on_error(&self, attempted: Lanes) -> Lanes {
        if self.error_recovery_disabled.includes_some(attempted) {
            return Lanes::NONE;
        }
        let everything_but_offscreen = self.pending.remove(Lanes::OFFSCREEN);
        if !everything_but_offscreen.is_empty() {
            everything_but_offscreen
        } else if self.pending.includes_some(Lanes::OFFSCREEN) {
            Lanes::OFFSCREEN
        } else {
            Lanes::NONE
        }
    }
}
