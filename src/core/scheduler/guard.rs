use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-agent busy flag. At most one [`CyclePermit`] exists at a time.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard(Arc<AtomicBool>);

impl CycleGuard {
    pub fn try_acquire(&self) -> Option<CyclePermit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit(self.0.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the guard on drop, including when the cycle unwinds.
#[derive(Debug)]
pub struct CyclePermit(Arc<AtomicBool>);

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
