//! The big kernel lock.
//!
//! Serialises every kernel entry. Acquired by the trap dispatcher on user
//! entry (and on the first trap after a CPU leaves the halted state) and
//! released by the arch glue right before returning to user mode.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

const NO_OWNER: u32 = u32::MAX;

pub struct BigKernelLock {
    locked: AtomicBool,
    owner: AtomicU32,
}

impl BigKernelLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    /// Acquire on behalf of `cpu`. Panics if `cpu` already holds the lock.
    pub fn lock(&self, cpu: u32) {
        if self.holding(cpu) {
            panic!("kernel lock: cpu {} acquiring a lock it already holds", cpu);
        }
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        self.owner.store(cpu, Ordering::Relaxed);
    }

    /// Release on behalf of `cpu`. Panics if `cpu` does not hold the lock.
    pub fn unlock(&self, cpu: u32) {
        if !self.holding(cpu) {
            panic!("kernel lock: cpu {} releasing a lock it does not hold", cpu);
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn holding(&self, cpu: u32) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == cpu
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for BigKernelLock {
    fn default() -> Self {
        Self::new()
    }
}
