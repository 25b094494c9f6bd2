//! Tick bookkeeping for loaded places.
//!
//! Loaded places are tracked weakly, so tracking never keeps a place in
//! memory. Each tick round rotates two lists: handles added since the
//! last round (ticked first, so a freshly loaded place never waits a
//! full interval) and the standing set, whose survivors are carried
//! forward. A handle whose place was unloaded or destroyed simply drops
//! out during rotation.

use std::sync::{Mutex, PoisonError};

use mudlark_entity::WeakEntity;

use crate::place::Place;

/// Tracker of weak place handles for the tick loop.
pub type PlaceTracker = TickRoster<WeakEntity<Place>>;

/// A two-list roster rotating tracked handles through tick rounds.
///
/// Generic over the handle type; the world uses [`PlaceTracker`].
pub struct TickRoster<T> {
    fresh: Mutex<Vec<T>>,
    standing: Mutex<Vec<T>>,
}

impl<T> Default for TickRoster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TickRoster<T> {
    /// Create an empty roster.
    pub const fn new() -> Self {
        Self {
            fresh: Mutex::new(Vec::new()),
            standing: Mutex::new(Vec::new()),
        }
    }

    fn lock(mutex: &Mutex<Vec<T>>) -> std::sync::MutexGuard<'_, Vec<T>> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a handle; it is ticked first in the next round.
    ///
    /// Also used during a round to carry standing survivors forward.
    pub fn track(&self, handle: T) {
        Self::lock(&self.fresh).push(handle);
    }

    /// Take every handle added since the last round started.
    pub fn take_fresh(&self) -> Vec<T> {
        std::mem::take(&mut *Self::lock(&self.fresh))
    }

    /// Take the standing set, leaving it empty.
    pub fn take_standing(&self) -> Vec<T> {
        std::mem::take(&mut *Self::lock(&self.standing))
    }

    /// Install the next round's standing set.
    pub fn set_standing(&self, handles: Vec<T>) {
        *Self::lock(&self.standing) = handles;
    }

    /// Number of tracked handles across both lists.
    ///
    /// Dead weak handles are still counted until the next rotation
    /// drops them.
    pub fn len(&self) -> usize {
        Self::lock(&self.fresh)
            .len()
            .saturating_add(Self::lock(&self.standing).len())
    }

    /// Whether no handles are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// One rotation round over a roster of ints, mirroring the world's
    /// tick loop: fresh handles tick first, standing survivors are
    /// carried forward, and the fresh list becomes the standing set.
    fn rotate(roster: &TickRoster<u32>, alive: impl Fn(u32) -> bool, ticked: &mut Vec<u32>) {
        let fresh = roster.take_fresh();
        for handle in &fresh {
            if alive(*handle) {
                ticked.push(*handle);
            }
        }
        for handle in roster.take_standing() {
            if alive(handle) {
                ticked.push(handle);
                roster.track(handle);
            }
        }
        roster.set_standing(fresh);
    }

    #[test]
    fn every_handle_ticks_once_per_round() {
        let roster = TickRoster::new();
        roster.track(1);
        roster.track(2);

        let mut first = Vec::new();
        rotate(&roster, |_| true, &mut first);
        first.sort_unstable();
        assert_eq!(first, vec![1, 2]);

        roster.track(3);
        let mut second = Vec::new();
        rotate(&roster, |_| true, &mut second);
        second.sort_unstable();
        assert_eq!(second, vec![1, 2, 3]);
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn fresh_handles_tick_before_the_standing_set() {
        let roster = TickRoster::new();
        roster.track(10);
        let mut ticked = Vec::new();
        rotate(&roster, |_| true, &mut ticked);

        roster.track(20);
        ticked.clear();
        rotate(&roster, |_| true, &mut ticked);
        // 20 was added after the previous round: it must tick first.
        assert_eq!(ticked, vec![20, 10]);
    }

    #[test]
    fn dead_handles_drop_out_during_rotation() {
        let roster = TickRoster::new();
        roster.track(1);
        roster.track(2);
        let mut ticked = Vec::new();
        rotate(&roster, |_| true, &mut ticked);

        ticked.clear();
        rotate(&roster, |h| h != 1, &mut ticked);
        ticked.clear();
        rotate(&roster, |h| h != 1, &mut ticked);
        assert_eq!(ticked, vec![2]);
        assert_eq!(roster.len(), 1);
    }
}
