//! Thread-local visited sets for beam search.
//!
//! Node handles are dense, so a visited set is an array of epochs:
//! - `insert(id)` is one compare and one write
//! - starting a new search bumps the epoch instead of zeroing memory

use std::cell::RefCell;

const MIN_CAPACITY: usize = 256;
const POOL_SIZE: usize = 4;

thread_local! {
    static POOL: RefCell<Vec<EpochSet>> = const { RefCell::new(Vec::new()) };
}

#[derive(Default)]
struct EpochSet {
    epochs: Vec<u32>,
    current: u32,
}

impl EpochSet {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            epochs: vec![0; capacity.max(MIN_CAPACITY)],
            current: 0,
        }
    }

    fn reset(&mut self) {
        self.current = self.current.wrapping_add(1);
        if self.current == 0 {
            self.epochs.fill(0);
            self.current = 1;
        }
    }
}

/// Visited set borrowed from the thread-local pool, returned on drop
pub struct VisitedGuard {
    set: EpochSet,
}

impl VisitedGuard {
    /// Borrow a cleared set able to hold ids below `capacity` without growing
    pub fn new(capacity: usize) -> Self {
        let mut set = POOL
            .with(|pool| {
                let mut pool = pool.borrow_mut();
                pool.iter()
                    .position(|s| s.epochs.len() >= capacity)
                    .map(|idx| pool.swap_remove(idx))
            })
            .unwrap_or_else(|| EpochSet::with_capacity(capacity));
        set.reset();
        Self { set }
    }

    /// Mark `id` visited; returns false if it already was
    #[inline]
    pub fn insert(&mut self, id: usize) -> bool {
        if id >= self.set.epochs.len() {
            let len = (id + 1).next_power_of_two().max(MIN_CAPACITY);
            self.set.epochs.resize(len, 0);
        }
        let slot = &mut self.set.epochs[id];
        if *slot == self.set.current {
            return false;
        }
        *slot = self.set.current;
        true
    }

    #[inline]
    pub fn contains(&self, id: usize) -> bool {
        self.set.epochs.get(id) == Some(&self.set.current)
    }
}

impl Drop for VisitedGuard {
    fn drop(&mut self) {
        let set = std::mem::take(&mut self.set);
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < POOL_SIZE {
                pool.push(set);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_first_visit() {
        let mut guard = VisitedGuard::new(100);
        assert!(!guard.contains(7));
        assert!(guard.insert(7));
        assert!(!guard.insert(7));
        assert!(guard.contains(7));
        assert!(!guard.contains(8));
    }

    #[test]
    fn test_reuse_is_cleared() {
        {
            let mut guard = VisitedGuard::new(100);
            guard.insert(42);
        }
        let guard = VisitedGuard::new(100);
        assert!(!guard.contains(42));
    }

    #[test]
    fn test_grows_for_large_ids() {
        let mut guard = VisitedGuard::new(16);
        assert!(guard.insert(5000));
        assert!(guard.contains(5000));
        assert!(!guard.contains(5001));
    }
}
