//! Process-wide named locks
//!
//! Some engine operations are not safe to run on two threads at once even
//! when they touch different maps. The engine contract names those critical
//! sections; every caller serializes on the same lock for a given name.

use parking_lot::{Mutex, MutexGuard};

/// Names of the engine's critical sections
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LockName {
    /// Mapfile parsing, including structural edits applied from URL parameters
    Parser,
}

impl LockName {
    const COUNT: usize = 1;

    fn index(self) -> usize {
        match self {
            LockName::Parser => 0,
        }
    }
}

/// One mutex per [`LockName`], shared by every worker thread
#[derive(Debug)]
pub struct EngineLocks {
    locks: Vec<Mutex<()>>,
}

impl EngineLocks {
    /// Create the lock table
    pub fn new() -> Self {
        Self {
            locks: (0..LockName::COUNT).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Block until the named lock is held; it is released when the guard drops
    pub fn acquire(&self, name: LockName) -> MutexGuard<'_, ()> {
        self.locks[name.index()].lock()
    }
}

impl Default for EngineLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_name_serializes_threads() {
        let locks = Arc::new(EngineLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    let _guard = locks.acquire(LockName::Parser);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
