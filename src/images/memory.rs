use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("memory budget exhausted: requested {requested} bytes with {in_use} of {limit} in use")]
pub struct MemoryExhausted {
    pub requested: u64,
    pub in_use: u64,
    pub limit: u64,
}

/// Byte budget shared by the steps of one bounded operation.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: u64,
    in_use: AtomicU64,
}

impl MemoryBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            in_use: AtomicU64::new(0),
        }
    }

    /// Claim `bytes` until the returned reservation is dropped.
    pub fn reserve(&self, bytes: u64) -> Result<Reservation<'_>, MemoryExhausted> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.limit {
                return Err(MemoryExhausted {
                    requested: bytes,
                    in_use: current,
                    limit: self.limit,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(Reservation {
                        budget: self,
                        bytes,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[must_use = "the reservation is released as soon as it is dropped"]
#[derive(Debug)]
pub struct Reservation<'a> {
    budget: &'a MemoryBudget,
    bytes: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.budget.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Outcome of a bounded run. Both variants hand the value back, including
/// whatever the operation managed to do to it before running out.
#[derive(Debug)]
pub enum Bounded<T> {
    Complete(T),
    Degraded { value: T, cause: MemoryExhausted },
}

impl<T> Bounded<T> {
    pub fn into_inner(self) -> T {
        match self {
            Bounded::Complete(value) | Bounded::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Bounded::Degraded { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryGuard {
    limit: u64,
}

impl MemoryGuard {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    /// Run `op` against `value` with a fresh budget. Running out of budget
    /// stops `op` early and yields [`Bounded::Degraded`] instead of an error.
    pub fn run<T, F>(&self, mut value: T, op: F) -> Bounded<T>
    where
        F: FnOnce(&mut T, &MemoryBudget) -> Result<(), MemoryExhausted>,
    {
        let budget = MemoryBudget::new(self.limit);
        match op(&mut value, &budget) {
            Ok(()) => Bounded::Complete(value),
            Err(cause) => Bounded::Degraded { value, cause },
        }
    }
}
