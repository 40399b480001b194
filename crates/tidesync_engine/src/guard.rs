//! Non-blocking single-holder flag.

use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that at most one task can hold at a time.
///
/// Acquisition never waits: a caller that finds the flag held gets `None`
/// and is expected to drop its request.
#[derive(Debug, Default)]
pub(crate) struct BusyFlag {
    held: AtomicBool,
}

impl BusyFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes the flag if it is free.
    pub(crate) fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag: self })
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the [`BusyFlag`] when dropped.
#[derive(Debug)]
pub(crate) struct BusyGuard<'a> {
    flag: &'a BusyFlag,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let flag = BusyFlag::new();
        let guard = flag.try_acquire();
        assert!(guard.is_some());
        assert!(flag.is_held());
        assert!(flag.try_acquire().is_none());

        drop(guard);
        assert!(!flag.is_held());
        assert!(flag.try_acquire().is_some());
    }
}
