//! # Refresh Scheduler
//!
//! ## Purpose
//!
//! Decides when to re-probe a cached neighbor and tracks each neighbor's
//! timer through an `Idle` -> `Armed` -> `Fired`/`Cancelled` life cycle. The
//! interval is `base_reachable_time_ms / 4000 + uniform(0, 2)` seconds,
//! matching the jittered reachable-time convention the kernel itself uses
//! for NUD, so refresh probes don't all land in the same tick.
//!
//! ## How it works
//!
//! `Scheduler` doesn't own a timerfd; it hands back `Duration`s for the
//! caller (the event loop) to arm a real timer with, and tracks only the
//! logical state transition. This keeps the state machine testable without
//! a clock source beyond `rand` for jitter.

use crate::cache::{Ifindex, TimerSlot};
use crate::ident::Ip128;
use rand::Rng;
use std::time::Duration;

/// Computes the jittered refresh interval for a given `base_reachable_time_ms`
/// (as read from the interface's `neigh/<if>/base_reachable_time_ms` sysctl).
pub fn refresh_interval(base_reachable_time_ms: u64, rng: &mut impl Rng) -> Duration {
    let base_secs = base_reachable_time_ms / 4000;
    let jitter_secs: u64 = rng.gen_range(0..=2);
    Duration::from_secs(base_secs + jitter_secs)
}

/// Tracks one neighbor's timer slot through its state machine. Owns no
/// cache state directly; `Topology`/the event loop hold the source of
/// truth (`Neighbor::timer`) and call these transitions to keep it honest.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_timer_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { next_timer_id: 1 }
    }

    /// Arms a new timer for `ifindex`/`ip`, returning the handle to store in
    /// `Neighbor::timer` and the interval the caller should schedule a
    /// timerfd expiry for.
    pub fn arm(&mut self, base_reachable_time_ms: u64, rng: &mut impl Rng) -> (TimerSlot, Duration) {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        (TimerSlot::Armed { timer_id: id }, refresh_interval(base_reachable_time_ms, rng))
    }

    /// Cancels an armed timer; idle timers are left as-is (cancelling an
    /// idle timer is not an error, just a no-op).
    pub fn cancel(&self, slot: TimerSlot) -> TimerSlot {
        match slot {
            TimerSlot::Armed { .. } => TimerSlot::Idle,
            TimerSlot::Idle => TimerSlot::Idle,
        }
    }

    /// True if `timer_id` is the one currently armed for this slot; used by
    /// the event loop to ignore a stale timer expiry after a neighbor was
    /// re-armed or removed between schedule and fire.
    pub fn is_current(&self, slot: TimerSlot, timer_id: u64) -> bool {
        matches!(slot, TimerSlot::Armed { timer_id: t } if t == timer_id)
    }
}

/// One neighbor due for a refresh probe, handed from the scheduler to the
/// packet layer.
#[derive(Debug, Clone)]
pub struct RefreshTarget {
    pub ifindex: Ifindex,
    pub target_ip: Ip128,
    pub src_ip: Ip128,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn refresh_interval_is_base_plus_jitter() {
        let mut rng = StdRng::seed_from_u64(42);
        let d = refresh_interval(8000, &mut rng);
        assert!(d.as_secs() >= 2 && d.as_secs() <= 4);
    }

    #[test]
    fn arm_then_cancel_returns_to_idle() {
        let mut sched = Scheduler::new();
        let mut rng = StdRng::seed_from_u64(7);
        let (slot, _interval) = sched.arm(8000, &mut rng);
        assert!(matches!(slot, TimerSlot::Armed { .. }));
        let idle = sched.cancel(slot);
        assert_eq!(idle, TimerSlot::Idle);
    }

    #[test]
    fn stale_timer_id_is_not_current() {
        let mut sched = Scheduler::new();
        let mut rng = StdRng::seed_from_u64(1);
        let (slot_a, _) = sched.arm(8000, &mut rng);
        let (slot_b, _) = sched.arm(8000, &mut rng);
        let TimerSlot::Armed { timer_id: id_a } = slot_a else { unreachable!() };
        assert!(sched.is_current(slot_b, id_a + 1));
        assert!(!sched.is_current(slot_b, id_a));
    }

    #[test]
    fn cancelling_idle_is_noop() {
        let sched = Scheduler::new();
        assert_eq!(sched.cancel(TimerSlot::Idle), TimerSlot::Idle);
    }
}
