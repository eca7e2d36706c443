//! Cross-worker shared state.
//!
//! The incumbent is guarded by a lock; both global bounds are mirrored
//! into atomics (f64 bit patterns) so the hot fathoming path reads them
//! lock-free. Readers tolerate transiently stale values: a stale upper
//! bound is always at or above the truth, so fathoming stays
//! conservative.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::model::IncumbentTracker;

/// Shared bounds, incumbent and stop flag for one run.
pub struct SharedState {
    /// Bit pattern of the incumbent objective (monotone non-increasing).
    upb_bits: AtomicU64,
    /// Bit pattern of the global lower bound (monotone non-decreasing,
    /// written only by the coordinator).
    lob_bits: AtomicU64,
    stop: AtomicBool,
    incumbent: Mutex<IncumbentTracker>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// Fresh state: no incumbent, infinite bounds.
    pub fn new() -> Self {
        Self {
            upb_bits: AtomicU64::new(f64::INFINITY.to_bits()),
            lob_bits: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            stop: AtomicBool::new(false),
            incumbent: Mutex::new(IncumbentTracker::new()),
        }
    }

    /// Current incumbent objective (`+inf` when none).
    pub fn obj_upb(&self) -> f64 {
        f64::from_bits(self.upb_bits.load(Ordering::Acquire))
    }

    /// Current global lower bound.
    pub fn obj_lob(&self) -> f64 {
        f64::from_bits(self.lob_bits.load(Ordering::Acquire))
    }

    /// Raise the global lower bound; lower values are ignored so the
    /// bound stays monotone under stale coordinator aggregates.
    pub fn raise_lob(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        let _ = self
            .lob_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let current = f64::from_bits(bits);
                (value > current).then(|| value.to_bits())
            });
    }

    /// Install a better incumbent under the lock. Returns whether the
    /// candidate won.
    pub fn try_update_incumbent(&self, x: &[f64], objective: f64) -> bool {
        let mut tracker = self.incumbent.lock();
        let improved = tracker.update(x, objective);
        if improved {
            self.upb_bits
                .store(tracker.objective.to_bits(), Ordering::Release);
        }
        improved
    }

    /// Snapshot of the incumbent, if any.
    pub fn incumbent(&self) -> Option<(Vec<f64>, f64)> {
        let tracker = self.incumbent.lock();
        tracker.primal.clone().map(|x| (x, tracker.objective))
    }

    /// Number of incumbent replacements so far.
    pub fn incumbent_updates(&self) -> u64 {
        self.incumbent.lock().updates
    }

    /// Ask every worker to wind down.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Polled by workers between nodes.
    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_start_infinite() {
        let shared = SharedState::new();
        assert!(shared.obj_upb().is_infinite() && shared.obj_upb() > 0.0);
        assert!(shared.obj_lob().is_infinite() && shared.obj_lob() < 0.0);
    }

    #[test]
    fn test_lob_is_monotone() {
        let shared = SharedState::new();
        shared.raise_lob(1.0);
        shared.raise_lob(0.5);
        assert_eq!(shared.obj_lob(), 1.0);
        shared.raise_lob(2.0);
        assert_eq!(shared.obj_lob(), 2.0);
    }

    #[test]
    fn test_incumbent_updates_upper_bound() {
        let shared = SharedState::new();
        assert!(shared.try_update_incumbent(&[1.0], 5.0));
        assert_eq!(shared.obj_upb(), 5.0);

        // Worse candidates lose and leave the bound alone.
        assert!(!shared.try_update_incumbent(&[2.0], 7.0));
        assert_eq!(shared.obj_upb(), 5.0);

        assert!(shared.try_update_incumbent(&[3.0], 2.0));
        assert_eq!(shared.obj_upb(), 2.0);
        let (x, obj) = shared.incumbent().unwrap();
        assert_eq!(x, vec![3.0]);
        assert_eq!(obj, 2.0);
    }

    #[test]
    fn test_stop_flag() {
        let shared = SharedState::new();
        assert!(!shared.stopped());
        shared.request_stop();
        assert!(shared.stopped());
    }
}
