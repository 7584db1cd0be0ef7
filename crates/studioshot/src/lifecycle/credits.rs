//! Session credit balance.
//!
//! A transformation reserves one credit before it starts. The reservation is
//! committed (spent) on success and handed back when dropped uncommitted, so
//! concurrent attempts can never overdraw the balance.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct CreditState {
    balance: u32,
    reserved: u32,
}

#[derive(Debug)]
pub struct CreditBalance {
    state: Mutex<CreditState>,
}

impl CreditBalance {
    pub fn new(initial: u32) -> Self {
        Self {
            state: Mutex::new(CreditState {
                balance: initial,
                reserved: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CreditState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Credit lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Credits not yet spent, including ones reserved by in-flight attempts.
    pub fn balance(&self) -> u32 {
        self.lock().balance
    }

    /// Credits a new attempt could still reserve.
    pub fn available(&self) -> u32 {
        let state = self.lock();
        state.balance - state.reserved
    }

    pub fn try_reserve(&self) -> Option<CreditReservation<'_>> {
        let mut state = self.lock();
        if state.balance > state.reserved {
            state.reserved += 1;
            Some(CreditReservation {
                credits: self,
                committed: false,
            })
        } else {
            None
        }
    }

    /// Adds purchased credits and returns the new balance.
    pub fn top_up(&self, amount: u32) -> u32 {
        let mut state = self.lock();
        state.balance = state.balance.saturating_add(amount);
        state.balance
    }
}

/// One credit held for an in-flight transformation.
#[derive(Debug)]
pub struct CreditReservation<'a> {
    credits: &'a CreditBalance,
    committed: bool,
}

impl CreditReservation<'_> {
    /// Spends the credit. Returns the remaining balance.
    pub fn commit(mut self) -> u32 {
        let mut state = self.credits.lock();
        state.reserved -= 1;
        state.balance -= 1;
        self.committed = true;
        state.balance
    }
}

impl Drop for CreditReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.credits.lock().reserved -= 1;
        }
    }
}
