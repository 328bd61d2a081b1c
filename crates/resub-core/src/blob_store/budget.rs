//! Remaining-quota budget shared by batch writers.
//!
//! Writers reserve an estimate before writing and release it if the write
//! fails, so several saves drawing on one probe of the store stay under quota.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct QuotaBudget {
    remaining: AtomicU64,
}

impl QuotaBudget {
    /// Budget of `quota - used - reserve`, floored at zero.
    pub fn new(quota: u64, used: u64, reserve: u64) -> Self {
        Self {
            remaining: AtomicU64::new(quota.saturating_sub(used).saturating_sub(reserve)),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Reserve `n` bytes if strictly less than the remaining budget is needed.
    /// Returns false (and reserves nothing) otherwise.
    pub fn try_reserve(&self, n: u64) -> bool {
        let mut current = self.remaining.load(Ordering::Relaxed);
        loop {
            if n >= current {
                return false;
            }
            match self.remaining.compare_exchange_weak(
                current,
                current - n,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back a reservation whose write did not happen.
    pub fn release(&self, n: u64) {
        self.remaining.fetch_add(n, Ordering::Release);
    }
}
